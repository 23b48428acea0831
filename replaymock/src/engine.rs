// vim: tw=80
//! The engine facade: mock creation, recording blocks and the DSL scope.

use fragile::Fragile;
use std::{
    cell::{RefCell, RefMut},
    fmt::Write,
    sync::Arc,
};
use tracing::debug;

use crate::answer::Answer;
use crate::config::EngineConfig;
use crate::detector::MatchedCall;
use crate::error::{MockError, Result};
use crate::invocation::{Invocation, MethodDescriptor};
use crate::matcher::{CaptureList, CapturingSlot, CompareOp, CompositeKind,
                     Matcher};
use crate::recorder::CallRoundRecorder;
use crate::state::{RecordingState, RecordingStateMachine};
use crate::stub::{ClearOptions, MockOptions, StubRepository};
use crate::value::{MockRef, TypeTag, Value};
use crate::verify::VerifyParams;
use predicates::Predicate;

struct Session {
    state: RecordingStateMachine,
    recorder: CallRoundRecorder,
}

impl Session {
    fn reset(&mut self) {
        self.state.reset();
        self.recorder.reset();
    }
}

/// Records stubbing and verification blocks, and answers real calls.
///
/// The engine may be shared between threads, but only the thread that
/// created it can record.  Calls arriving from any other thread are always
/// answered from the stubs.  The engine must be dropped on the thread that
/// created it.
pub struct MockEngine {
    repo: Arc<StubRepository>,
    config: EngineConfig,
    session: Fragile<RefCell<Session>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_repository(Arc::new(StubRepository::new()), config)
    }

    /// An engine whose stubs live in `repo`, which other engines may share.
    pub fn with_repository(repo: Arc<StubRepository>, config: EngineConfig)
        -> Self
    {
        let session = Session {
            state: RecordingStateMachine::new(),
            recorder: CallRoundRecorder::new(repo.clone(), config.seed),
        };
        MockEngine {
            repo,
            config,
            session: Fragile::new(RefCell::new(session)),
        }
    }

    pub fn repository(&self) -> &Arc<StubRepository> {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a mock of `type_name` with the configured default options.
    pub fn mock(&self, type_name: &str) -> MockRef {
        self.mock_with(type_name, self.config.mock_options())
    }

    pub fn mock_with(&self, type_name: &str, options: MockOptions) -> MockRef {
        self.repo.create_mock(type_name, options)
    }

    pub fn relaxed_mock(&self, type_name: &str) -> MockRef {
        let options = MockOptions { relaxed: true, relax_unit: true };
        self.mock_with(type_name, options)
    }

    /// Current state of this thread's recording session.
    pub fn recording_state(&self) -> RecordingState {
        self.session.try_get().ok()
            .and_then(|s| s.try_borrow().ok().map(|s| s.state.state()))
            .unwrap_or(RecordingState::Answering)
    }

    fn session_mut(&self) -> Result<RefMut<'_, Session>> {
        self.session.try_get()
            .map_err(|_| MockError::ForeignThread)?
            .try_borrow_mut()
            .map_err(|_| MockError::BadRecordingSequence {
                state: "busy",
                operation: "re-enter the recording session"
            })
    }

    /// Run `f` on the session, resetting it if `f` fails.
    fn with_session<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut Session) -> Result<T>
    {
        let mut session = self.session_mut()?;
        let r = f(&mut session);
        if r.is_err() {
            debug!("recording session reset after error");
            session.reset();
        }
        r
    }

    fn reset_session(&self) {
        if let Ok(mut session) = self.session_mut() {
            session.reset();
        }
    }

    /// Entry point for every intercepted call.
    ///
    /// While a block is being recorded, the call is recorded and a
    /// placeholder result is returned.  Otherwise the call is logged and
    /// answered by its mock's stub.
    pub fn on_method_call(&self, target: &MockRef, method: &MethodDescriptor,
                          args: Vec<Value>) -> Result<Value>
    {
        if let Ok(cell) = self.session.try_get() {
            if let Ok(mut session) = cell.try_borrow_mut() {
                match session.state.state() {
                    RecordingState::Stubbing | RecordingState::Verifying =>
                        return session.recorder.record_call(target, method,
                                                            args),
                    RecordingState::StubbingAwaitingAnswer => {
                        session.reset();
                        return Err(MockError::BadRecordingSequence {
                            state: "awaiting a stub's answer",
                            operation: "call a mock"
                        });
                    },
                    RecordingState::Answering => ()
                }
            }
        }
        self.repo.dispatch(target, method, args)
    }

    /// Declare a matcher for the next argument of the call being recorded,
    /// and return the placeholder to pass in its place.
    pub fn declare_matcher(&self, matcher: Matcher, ty: &TypeTag)
        -> Result<Value>
    {
        let mut session = self.session_mut()?;
        if !session.state.accepts_rounds() {
            return Err(MockError::BadRecordingSequence {
                state: "answering",
                operation: "declare a matcher"
            });
        }
        session.recorder.declare_matcher(matcher, ty)
    }

    /// Record a stubbing block.  Answer it with the returned handle.
    pub fn every<F>(&self, block: F) -> Result<Stubbing<'_>>
        where F: FnMut(&Scope<'_>) -> Result<()>
    {
        self.with_session(|s| s.state.start_stubbing())?;
        let matched = self.record(block)?;
        let matched = self.with_session(|s| {
            s.state.stubbing_complete(matched).map(<[_]>::to_vec)
        })?;
        Ok(Stubbing { engine: self, matched })
    }

    /// Answer the block most recently recorded by [`every`](Self::every).
    pub fn answer(&self, answer: Answer) -> Result<()> {
        self.with_session(|s| s.state.answer(answer, &self.repo))
    }

    /// Record a verification block and check it against the call log.
    pub fn verify<F>(&self, params: VerifyParams, block: F) -> Result<()>
        where F: FnMut(&Scope<'_>) -> Result<()>
    {
        self.with_session(|s| s.state.start_verification(params))?;
        let matched = self.record(block)?;
        let result = self.with_session(|s| {
            s.state.finish_verification(matched, &self.repo)
        })?;
        if result.matches {
            Ok(())
        } else {
            Err(MockError::VerificationFailed {
                report: result.diagnostic.unwrap_or_default()
            })
        }
    }

    /// Fail if any call on `mocks` was never matched by a successful
    /// verification.
    pub fn confirm_verified(&self, mocks: &[MockRef]) -> Result<()> {
        let mut report = String::new();
        for m in mocks {
            for call in self.repo.unverified_calls(m.id())? {
                let _ = writeln!(report, "    {}", call);
            }
        }
        if report.is_empty() {
            Ok(())
        } else {
            Err(MockError::VerificationFailed {
                report: format!("calls were not verified:\n{}", report)
            })
        }
    }

    pub fn recorded_calls(&self, mock: &MockRef) -> Result<Vec<Invocation>> {
        self.repo.recorded_calls(mock.id())
    }

    pub fn clear(&self, mock: &MockRef, options: ClearOptions) -> Result<()> {
        self.repo.clear(mock.id(), options)
    }

    /// The value `slot` captured.
    pub fn resolve_captured_value(&self, slot: &CapturingSlot)
        -> Result<Value>
    {
        slot.captured().ok_or(MockError::NotCaptured)
    }

    /// Replay `block` until its matchers can be told from its literals.
    /// Any failure leaves the session reset.
    fn record<F>(&self, mut block: F) -> Result<Vec<MatchedCall>>
        where F: FnMut(&Scope<'_>) -> Result<()>
    {
        let r = self.replay(&mut block);
        if r.is_err() {
            self.reset_session();
        }
        r
    }

    fn replay<F>(&self, block: &mut F) -> Result<Vec<MatchedCall>>
        where F: FnMut(&Scope<'_>) -> Result<()>
    {
        let max = self.config.max_rounds.max(1);
        self.record_round(block, 0, max)?;
        let n = self.session_mut()?.recorder.estimate_rounds().min(max);
        debug!(rounds = n, "replaying recording block");
        for round in 1..n {
            self.record_round(block, round, n)?;
        }
        self.session_mut()?
            .recorder
            .round_boundary(n, n)?
            .ok_or(MockError::MissingCalls)
    }

    /// Open round `round` and run `block` once in it, retrying with hinted
    /// return types while that makes progress.
    fn record_round<F>(&self, block: &mut F, round: usize, total: usize)
        -> Result<()>
        where F: FnMut(&Scope<'_>) -> Result<()>
    {
        self.session_mut()?.recorder.round_boundary(round, total)?;
        let scope = Scope { engine: self };
        let mut progress = None;
        loop {
            let e = match block(&scope) {
                Ok(()) => return Ok(()),
                Err(e) => e
            };
            let expected = match e {
                MockError::TypeMismatch { ref expected, .. } =>
                    expected.clone(),
                e => return Err(MockError::Recording {
                    round,
                    source: Box::new(e)
                })
            };
            let mut session = self.session_mut()?;
            let calls = session.recorder.calls_in_round();
            if calls == 0 || progress.map_or(false, |p| calls <= p) {
                return Err(MockError::UnresolvedReturnType {
                    call_index: calls.saturating_sub(1),
                    source: Box::new(e)
                });
            }
            progress = Some(calls);
            debug!(round, call = calls - 1, hint = %expected,
                   "retrying round with a return type hint");
            session.recorder.hint_return_type(calls - 1, expected);
            session.recorder.restart_round();
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// What a recording block sees: calls on mocks, and matcher declarations.
///
/// Every matcher method returns a placeholder value, which must be passed as
/// an argument of the next call.
pub struct Scope<'e> {
    engine: &'e MockEngine,
}

impl<'e> Scope<'e> {
    /// Call `method` on `target`.
    pub fn call(&self, target: &MockRef, method: &MethodDescriptor,
                args: Vec<Value>) -> Result<Value>
    {
        self.engine.on_method_call(target, method, args)
    }

    /// Declare the return type of the next call, when it returns something
    /// more specific than its descriptor says.
    pub fn hint(&self, ty: TypeTag) -> Result<()> {
        self.engine.session_mut()?.recorder.hint_next_return_type(ty);
        Ok(())
    }

    /// Declare an arbitrary matcher whose placeholder has type `ty`.
    pub fn matching(&self, matcher: Matcher, ty: &TypeTag) -> Result<Value> {
        self.engine.declare_matcher(matcher, ty)
    }

    pub fn any(&self, ty: TypeTag) -> Result<Value> {
        self.matching(Matcher::Any, &ty)
    }

    pub fn eq<V: Into<Value>>(&self, value: V) -> Result<Value> {
        let value = value.into();
        let ty = value.type_tag();
        self.matching(Matcher::eq(value), &ty)
    }

    pub fn neq<V: Into<Value>>(&self, value: V) -> Result<Value> {
        let value = value.into();
        let ty = value.type_tag();
        self.matching(Matcher::neq(value), &ty)
    }

    /// Identity rather than value equality.
    pub fn ref_eq<V: Into<Value>>(&self, value: V) -> Result<Value> {
        let value = value.into();
        let ty = value.type_tag();
        self.matching(Matcher::ref_eq(value), &ty)
    }

    fn compare<V: Into<Value>>(&self, op: CompareOp, value: V)
        -> Result<Value>
    {
        let value = value.into();
        let ty = value.type_tag();
        self.matching(Matcher::compare(op, value), &ty)
    }

    pub fn lt<V: Into<Value>>(&self, value: V) -> Result<Value> {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le<V: Into<Value>>(&self, value: V) -> Result<Value> {
        self.compare(CompareOp::Le, value)
    }

    pub fn cmp_eq<V: Into<Value>>(&self, value: V) -> Result<Value> {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ge<V: Into<Value>>(&self, value: V) -> Result<Value> {
        self.compare(CompareOp::Ge, value)
    }

    pub fn gt<V: Into<Value>>(&self, value: V) -> Result<Value> {
        self.compare(CompareOp::Gt, value)
    }

    /// Any non-null instance of `ty`.
    pub fn of_type(&self, ty: TypeTag) -> Result<Value> {
        self.matching(Matcher::TypeCheck(ty.clone()), &ty)
    }

    pub fn is_null(&self, ty: TypeTag) -> Result<Value> {
        self.matching(Matcher::NullCheck { negate: false }, &ty)
    }

    pub fn is_not_null(&self, ty: TypeTag) -> Result<Value> {
        self.matching(Matcher::NullCheck { negate: true }, &ty)
    }

    /// Arguments of type `ty` accepted by `predicate`.
    pub fn matches<P>(&self, ty: TypeTag, predicate: P) -> Result<Value>
        where P: Predicate<Value> + Send + Sync + 'static
    {
        self.matching(Matcher::predicate(ty.clone(), predicate), &ty)
    }

    pub fn capture(&self, slot: &CapturingSlot, ty: TypeTag) -> Result<Value> {
        self.matching(Matcher::capture(slot), &ty)
    }

    pub fn capture_all(&self, list: &CaptureList, ty: TypeTag)
        -> Result<Value>
    {
        self.matching(Matcher::capture_all(list), &ty)
    }

    fn composite(&self, kind: CompositeKind, operands: Vec<Value>)
        -> Result<Value>
    {
        let ty = operands.first().map_or(TypeTag::Any, Value::type_tag);
        self.matching(Matcher::composite(kind, operands), &ty)
    }

    /// Both operands must accept.  Operands are placeholders of matchers
    /// declared earlier, or literals.
    pub fn and(&self, a: Value, b: Value) -> Result<Value> {
        self.composite(CompositeKind::And, vec![a, b])
    }

    pub fn or(&self, a: Value, b: Value) -> Result<Value> {
        self.composite(CompositeKind::Or, vec![a, b])
    }

    pub fn not(&self, a: Value) -> Result<Value> {
        self.composite(CompositeKind::Not, vec![a])
    }

    /// Passed as the first argument, matches every argument not otherwise
    /// specified.
    pub fn all_any(&self) -> Result<Value> {
        self.matching(Matcher::AllAny, &TypeTag::Any)
    }
}

/// A recorded stubbing block, waiting for its answer.
#[must_use = "a stub without an answer leaves the engine awaiting one"]
pub struct Stubbing<'e> {
    engine: &'e MockEngine,
    matched: Vec<MatchedCall>,
}

impl<'e> Stubbing<'e> {
    /// The calls the block resolved to.
    pub fn matched_calls(&self) -> &[MatchedCall] {
        &self.matched
    }

    pub fn then_answer(self, answer: Answer) -> Result<()> {
        self.engine.answer(answer)
    }

    pub fn returns<V: Into<Value>>(self, value: V) -> Result<()> {
        self.then_answer(Answer::constant(value))
    }

    /// Return each value in turn, then keep returning the last.
    pub fn returns_many(self, values: Vec<Value>) -> Result<()> {
        self.then_answer(Answer::many(values))
    }

    pub fn answers<F>(self, f: F) -> Result<()>
        where F: Fn(&Invocation) -> Result<Value> + Send + Sync + 'static
    {
        self.then_answer(Answer::func(f))
    }

    pub fn answers_once<F>(self, f: F) -> Result<()>
        where F: FnOnce(&Invocation) -> Result<Value> + Send + 'static
    {
        self.then_answer(Answer::once(f))
    }

    pub fn throws<S: Into<String>>(self, message: S) -> Result<()> {
        self.then_answer(Answer::throws(message))
    }

    pub fn just_runs(self) -> Result<()> {
        self.then_answer(Answer::just_runs())
    }
}

#[cfg(test)]
mod t {
    use super::*;

    fn get() -> MethodDescriptor {
        MethodDescriptor::new("Calc", "get", [TypeTag::Int], TypeTag::Int)
    }

    #[test]
    fn recording_with_no_calls() {
        let engine = MockEngine::new();
        let e = engine.every(|_| Ok(())).err().unwrap();
        assert!(matches!(e, MockError::MissingCalls));
        assert_eq!(engine.recording_state(), RecordingState::Answering);
    }

    #[test]
    fn declare_outside_recording() {
        let engine = MockEngine::new();
        assert!(matches!(engine.declare_matcher(Matcher::Any, &TypeTag::Int),
            Err(MockError::BadRecordingSequence { .. })));
    }

    #[test]
    fn unanswered_stub_blocks_the_next_session() {
        let engine = MockEngine::new();
        let m = engine.mock("Calc");
        let s = engine.every(|s| s.call(&m, &get(), vec![1.into()]).map(drop))
            .unwrap();
        assert_eq!(s.matched_calls().len(), 1);
        drop(s);
        assert_eq!(engine.recording_state(),
            RecordingState::StubbingAwaitingAnswer);
        let e = engine.every(|s| s.call(&m, &get(), vec![1.into()]).map(drop))
            .err()
            .unwrap();
        assert!(matches!(e, MockError::BadRecordingSequence { .. }));
        assert_eq!(engine.recording_state(), RecordingState::Answering);
    }

    #[test]
    fn block_errors_are_wrapped_with_their_round() {
        let engine = MockEngine::new();
        let e = engine.every(|_| Err(MockError::Thrown("boom".into())))
            .err()
            .unwrap();
        assert!(matches!(e, MockError::Recording { round: 0, .. }));
        assert_eq!(e.root_cause().to_string(), "boom");
    }
}

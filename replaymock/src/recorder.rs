// vim: tw=80
//! Collects the calls made by each replay of a recording block.

use std::{
    collections::{HashMap, HashSet},
    mem,
    sync::Arc,
};
use tracing::{debug, trace};

use crate::chain;
use crate::detector::{self, MatchedCall};
use crate::error::{MockError, Result};
use crate::invocation::{Invocation, MethodDescriptor};
use crate::matcher::Matcher;
use crate::signature::{self, empty_value, SignatureGenerator};
use crate::stub::StubRepository;
use crate::value::{MockId, MockRef, TypeTag, Value};

/// A matcher declared inside a recording block, and the placeholder that was
/// handed out in its place.
#[derive(Clone, Debug)]
pub(crate) struct DeclaredMatcher {
    pub(crate) matcher: Matcher,
    pub(crate) signature: Value,
    /// Operand of a composite, rather than an argument of its own.
    pub(crate) nested: bool,
}

/// One call captured during one round.
#[derive(Clone, Debug)]
pub(crate) struct SignedCall {
    /// The arguments of the invocation are the signature values: literal
    /// arguments and matcher placeholders alike.
    pub(crate) invocation: Invocation,
    pub(crate) matchers: Vec<DeclaredMatcher>,
    /// The chain placeholder this call returned, if any.
    pub(crate) returned: Option<MockRef>,
    pub(crate) return_type: TypeTag,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct CallRound {
    pub(crate) calls: Vec<SignedCall>,
}

/// Per-session recorder state.  Owned by one engine, on one thread.
pub(crate) struct CallRoundRecorder {
    generator: SignatureGenerator,
    repo: Arc<StubRepository>,
    rounds: Vec<CallRound>,
    current: Option<CallRound>,
    pending: Vec<DeclaredMatcher>,
    chain_placeholders: HashSet<MockId>,
    /// Return-type hints learned from type mismatches, by call index.
    hints: HashMap<usize, TypeTag>,
    /// Return type of the next recorded call, as set by the block itself.
    explicit_hint: Option<TypeTag>,
}

impl CallRoundRecorder {
    pub(crate) fn new(repo: Arc<StubRepository>, seed: Option<u64>) -> Self {
        CallRoundRecorder {
            generator: SignatureGenerator::new(seed),
            repo,
            rounds: Vec::new(),
            current: None,
            pending: Vec::new(),
            chain_placeholders: HashSet::new(),
            hints: HashMap::new(),
            explicit_hint: None,
        }
    }

    fn round_mut(&mut self) -> Result<&mut CallRound> {
        self.current.as_mut().ok_or(MockError::BadRecordingSequence {
            state: "no round is open",
            operation: "record"
        })
    }

    /// Register a matcher for the argument about to be passed, and return the
    /// placeholder to pass in its place.
    pub(crate) fn declare_matcher(&mut self, matcher: Matcher, ty: &TypeTag)
        -> Result<Value>
    {
        self.round_mut()?;
        if let Some(c) = matcher.as_composite() {
            for v in c.operand_values() {
                let operand = self.pending.iter_mut()
                    .rev()
                    .find(|d| !d.nested && d.signature.same_identity(v));
                if let Some(d) = operand {
                    d.nested = true;
                }
            }
        }
        let signature = self.generator.next_signature(ty, &self.repo);
        trace!(%matcher, %signature, "declared matcher");
        self.pending.push(DeclaredMatcher {
            matcher,
            signature: signature.clone(),
            nested: false
        });
        Ok(signature)
    }

    /// Declare the return type of the next recorded call.
    pub(crate) fn hint_next_return_type(&mut self, ty: TypeTag) {
        self.explicit_hint = Some(ty);
    }

    /// Declare the return type of call `index` for every later round.
    pub(crate) fn hint_return_type(&mut self, index: usize, ty: TypeTag) {
        debug!(index, %ty, "hinted return type");
        self.hints.insert(index, ty);
    }

    /// Record an intercepted call and return the placeholder result the
    /// block continues with.
    pub(crate) fn record_call(&mut self, target: &MockRef,
                              method: &MethodDescriptor, args: Vec<Value>)
        -> Result<Value>
    {
        self.round_mut()?;
        if let Some(m) = args.iter()
            .filter_map(|a| match a {
                Value::Mock(m) => Some(m),
                _ => None
            }).find(|m| self.chain_placeholders.contains(&m.id()))
        {
            return Err(MockError::IllegalArgument(format!(
                "child mock {} passed as argument is prohibited", m)));
        }
        let declared = self.pending.iter().filter(|d| !d.nested).count();
        if declared > args.len() {
            return Err(MockError::IllegalArgument(format!(
                "{} matchers declared for {}, which takes {} arguments",
                declared, method, args.len())));
        }

        let index = self.calls_in_round();
        let return_type = self.explicit_hint.take()
            .or_else(|| self.hints.get(&index).cloned())
            .unwrap_or_else(|| method.return_type().clone());
        let (result, returned) = match &return_type {
            TypeTag::Mock(name) => {
                let placeholder = MockRef::new(self.repo.next_id(),
                    name.clone());
                self.chain_placeholders.insert(placeholder.id());
                (Value::Mock(placeholder.clone()), Some(placeholder))
            },
            ty => (empty_value(ty, self.repo.instantiator()), None)
        };
        let invocation = Invocation::new(target.clone(), method.clone(), args,
            index as u64);
        trace!(%invocation, %return_type, "recorded call");
        let call = SignedCall {
            invocation,
            matchers: mem::take(&mut self.pending),
            returned,
            return_type,
        };
        self.round_mut()?.calls.push(call);
        Ok(result)
    }

    /// Number of calls recorded so far in the open round.
    pub(crate) fn calls_in_round(&self) -> usize {
        self.current.as_ref().map_or(0, |r| r.calls.len())
    }

    /// Discard whatever the open round recorded and start it again.
    pub(crate) fn restart_round(&mut self) {
        self.current = Some(CallRound::default());
        self.pending.clear();
        self.explicit_hint = None;
    }

    /// Rounds needed to disambiguate the values seen in the open round.
    pub(crate) fn estimate_rounds(&self) -> usize {
        let values = self.current.iter()
            .flat_map(|r| r.calls.iter())
            .flat_map(|c| c.invocation.args());
        signature::estimate_rounds(values)
    }

    /// Close the open round, if any.  Once `index` reaches `total`, reconcile
    /// all rounds into matched calls; otherwise open round `index`.
    pub(crate) fn round_boundary(&mut self, index: usize, total: usize)
        -> Result<Option<Vec<MatchedCall>>>
    {
        if let Some(round) = self.current.take() {
            if !self.pending.is_empty() {
                let names = self.pending.iter()
                    .map(|d| d.matcher.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(MockError::IllegalArgument(format!(
                    "matchers [{}] were not passed to any call", names)));
            }
            self.rounds.push(round);
        }
        if index < total {
            self.current = Some(CallRound::default());
            return Ok(None);
        }
        debug!(rounds = self.rounds.len(), "detecting matchers");
        let matched = detector::detect(&self.rounds, &self.chain_placeholders)
            .and_then(|calls| chain::resolve(calls, &self.repo));
        self.reset();
        matched.map(Some)
    }

    /// Forget everything recorded in this session.
    pub(crate) fn reset(&mut self) {
        self.rounds.clear();
        self.current = None;
        self.pending.clear();
        self.chain_placeholders.clear();
        self.hints.clear();
        self.explicit_hint = None;
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.rounds.is_empty() && self.current.is_none() &&
            self.pending.is_empty() && self.hints.is_empty()
    }
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::stub::MockOptions;

    fn setup() -> (CallRoundRecorder, MockRef) {
        let repo = Arc::new(StubRepository::new());
        let m = repo.create_mock("Calc", MockOptions::default());
        (CallRoundRecorder::new(repo, Some(1)), m)
    }

    fn add() -> MethodDescriptor {
        MethodDescriptor::new("Calc", "add", [TypeTag::Int, TypeTag::Int],
            TypeTag::Int)
    }

    fn chain() -> MethodDescriptor {
        MethodDescriptor::new("Calc", "chain", vec![], TypeTag::mock("Calc"))
    }

    #[test]
    fn declare_outside_round() {
        let (mut r, _) = setup();
        assert!(matches!(r.declare_matcher(Matcher::Any, &TypeTag::Int),
            Err(MockError::BadRecordingSequence { .. })));
    }

    #[test]
    fn too_many_matchers() {
        let (mut r, m) = setup();
        r.round_boundary(0, 1).unwrap();
        let a = r.declare_matcher(Matcher::Any, &TypeTag::Int).unwrap();
        r.declare_matcher(Matcher::Any, &TypeTag::Int).unwrap();
        r.declare_matcher(Matcher::Any, &TypeTag::Int).unwrap();
        let e = r.record_call(&m, &add(), vec![a, Value::Int(1)]).unwrap_err();
        assert!(matches!(e, MockError::IllegalArgument(_)));
    }

    #[test]
    fn composite_operands_are_nested() {
        let (mut r, m) = setup();
        r.round_boundary(0, 1).unwrap();
        let a = r.declare_matcher(Matcher::eq(1), &TypeTag::Int).unwrap();
        let b = r.declare_matcher(Matcher::eq(2), &TypeTag::Int).unwrap();
        let or = r.declare_matcher(
            Matcher::composite(crate::matcher::CompositeKind::Or,
                vec![a, b]),
            &TypeTag::Int).unwrap();
        r.record_call(&m, &add(), vec![or, Value::Int(3)]).unwrap();
        let matched = r.round_boundary(1, 1).unwrap().unwrap();
        assert_eq!(matched[0].invocation_matcher().to_string(),
            format!("{}.add(or(eq(1), eq(2)), eq(3))", m));
    }

    #[test]
    fn chain_placeholder_as_argument() {
        let (mut r, m) = setup();
        r.round_boundary(0, 1).unwrap();
        let child = r.record_call(&m, &chain(), vec![]).unwrap();
        let meth = MethodDescriptor::new("Calc", "take",
            [TypeTag::mock("Calc")], TypeTag::Unit);
        let e = r.record_call(&m, &meth, vec![child]).unwrap_err();
        assert!(matches!(e, MockError::IllegalArgument(_)));
    }

    #[test]
    fn leftover_matchers() {
        let (mut r, _) = setup();
        r.round_boundary(0, 1).unwrap();
        r.declare_matcher(Matcher::Any, &TypeTag::Int).unwrap();
        assert!(matches!(r.round_boundary(1, 1),
            Err(MockError::IllegalArgument(_))));
    }

    #[test]
    fn hints_change_placeholder_type() {
        let (mut r, m) = setup();
        r.round_boundary(0, 1).unwrap();
        r.hint_return_type(0, TypeTag::Str);
        let v = r.record_call(&m, &chain(), vec![]).unwrap();
        assert_eq!(v, Value::from(""));
        r.hint_next_return_type(TypeTag::Long);
        let v = r.record_call(&m, &chain(), vec![]).unwrap();
        assert_eq!(v, Value::Long(0));
    }

    #[test]
    fn detection_resets() {
        let (mut r, m) = setup();
        r.round_boundary(0, 1).unwrap();
        r.record_call(&m, &add(), vec![Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(r.estimate_rounds(), 2);
        assert!(r.round_boundary(1, 1).unwrap().is_some());
        assert!(r.is_idle());
    }
}

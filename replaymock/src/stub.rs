// vim: tw=80
//! Per-mock stub state, shared by every engine that uses the same
//! repository.
//!
//! The repository maps each [`MockId`] to its own lock-protected [`Stub`].
//! The id map itself is only locked long enough to look up or insert an
//! entry, so calls on different mocks never contend.

use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

use crate::answer::Answer;
use crate::error::{MockError, Result};
use crate::invocation::{Invocation, InvocationMatcher, MethodDescriptor};
use crate::signature::{empty_value, Instantiator, NoInstantiator};
use crate::value::{MockId, MockRef, TypeTag, Value};

/// How a mock answers calls that match no stub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MockOptions {
    /// Answer every unmatched call with an empty value of its return type.
    pub relaxed: bool,
    /// Answer unmatched calls returning `Unit`.
    pub relax_unit: bool,
}

/// Which parts of a stub [`StubRepository::clear`] discards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearOptions {
    pub answers: bool,
    pub calls: bool,
    pub children: bool,
}

impl Default for ClearOptions {
    fn default() -> Self {
        ClearOptions { answers: true, calls: true, children: true }
    }
}

struct AnswerEntry {
    matcher: InvocationMatcher,
    answer: Arc<Answer>,
}

/// The mutable state owned by one mock.
struct Stub {
    options: MockOptions,
    answers: Vec<AnswerEntry>,
    calls: Vec<Invocation>,
    verified: HashSet<u64>,
    children: Vec<(InvocationMatcher, MockRef)>,
}

impl Stub {
    fn new(options: MockOptions) -> Self {
        Stub {
            options,
            answers: Vec::new(),
            calls: Vec::new(),
            verified: HashSet::new(),
            children: Vec::new(),
        }
    }
}

/// Registry of every mock's stub state.
pub struct StubRepository {
    stubs: RwLock<HashMap<MockId, Arc<Mutex<Stub>>>>,
    next_id: AtomicU64,
    clock: AtomicU64,
    instantiator: Arc<dyn Instantiator>,
}

impl StubRepository {
    pub fn new() -> Self {
        Self::with_instantiator(Arc::new(NoInstantiator))
    }

    pub fn with_instantiator(instantiator: Arc<dyn Instantiator>) -> Self {
        StubRepository {
            stubs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            instantiator,
        }
    }

    pub fn instantiator(&self) -> &dyn Instantiator {
        self.instantiator.as_ref()
    }

    /// Issue an identity that no other mock has.
    pub(crate) fn next_id(&self) -> MockId {
        MockId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The next timestamp of the global call order.
    pub fn next_timestamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Create and register a new mock.
    pub fn create_mock(&self, type_name: &str, options: MockOptions)
        -> MockRef
    {
        let mock = MockRef::new(self.next_id(), Arc::from(type_name));
        self.stubs.write()
            .insert(mock.id(), Arc::new(Mutex::new(Stub::new(options))));
        trace!(%mock, ?options, "created mock");
        mock
    }

    pub fn contains(&self, mock: MockId) -> bool {
        self.stubs.read().contains_key(&mock)
    }

    fn stub(&self, mock: MockId) -> Result<Arc<Mutex<Stub>>> {
        self.stubs.read()
            .get(&mock)
            .cloned()
            .ok_or(MockError::UnknownMock(mock))
    }

    /// Register `answer` for calls matching `matcher` on the matcher's
    /// target.  Later registrations take precedence.
    pub fn add_answer(&self, matcher: InvocationMatcher, answer: Answer)
        -> Result<()>
    {
        let stub = self.stub(matcher.target().id())?;
        debug!(%matcher, ?answer, "registered answer");
        stub.lock().answers.push(AnswerEntry {
            matcher,
            answer: Arc::new(answer)
        });
        Ok(())
    }

    /// Every real call made on `mock`, oldest first.
    pub fn recorded_calls(&self, mock: MockId) -> Result<Vec<Invocation>> {
        Ok(self.stub(mock)?.lock().calls.clone())
    }

    /// Logged calls on `mock` that no successful verification has matched.
    pub fn unverified_calls(&self, mock: MockId) -> Result<Vec<Invocation>> {
        let stub = self.stub(mock)?;
        let stub = stub.lock();
        Ok(stub.calls.iter()
            .filter(|c| !stub.verified.contains(&c.timestamp()))
            .cloned()
            .collect())
    }

    pub(crate) fn mark_verified(&self, invocation: &Invocation) -> Result<()> {
        self.stub(invocation.target().id())?
            .lock()
            .verified
            .insert(invocation.timestamp());
        Ok(())
    }

    /// The child mock returned by the call `key` describes.  The same parent
    /// and key always yield the same child.
    pub fn child_mock(&self, key: &InvocationMatcher, type_name: &str)
        -> Result<MockRef>
    {
        let parent = self.stub(key.target().id())?;
        let mut parent = parent.lock();
        if let Some((_, child)) = parent.children.iter().find(|(k, _)| k == key)
        {
            return Ok(child.clone());
        }
        let child = self.create_mock(type_name, parent.options);
        debug!(%key, %child, "created child mock");
        parent.children.push((key.clone(), child.clone()));
        Ok(child)
    }

    /// Forget a mock's answers, calls and/or children.
    pub fn clear(&self, mock: MockId, options: ClearOptions) -> Result<()> {
        let stub = self.stub(mock)?;
        let mut stub = stub.lock();
        if options.answers {
            stub.answers.clear();
        }
        if options.calls {
            stub.calls.clear();
            stub.verified.clear();
        }
        if options.children {
            stub.children.clear();
        }
        Ok(())
    }

    /// Perform a real call: log it and compute its answer.
    ///
    /// The most recently registered matching answer wins, and its capturing
    /// matchers see the call's arguments.  The answer runs after the stub is
    /// unlocked, so it may call back into any mock.
    pub(crate) fn dispatch(&self, target: &MockRef, method: &MethodDescriptor,
                           args: Vec<Value>) -> Result<Value>
    {
        let stub = self.stub(target.id())?;
        let invocation = Invocation::new(target.clone(), method.clone(), args,
            self.next_timestamp());
        let (answer, options) = {
            let mut stub = stub.lock();
            let answer = stub.answers.iter()
                .rev()
                .find(|e| e.matcher.matches(&invocation))
                .map(|e| {
                    e.matcher.capture(&invocation);
                    e.answer.clone()
                });
            stub.calls.push(invocation.clone());
            (answer, stub.options)
        };
        trace!(%invocation, answered = answer.is_some(), "dispatched call");
        match answer {
            Some(a) => a.call(&invocation),
            None => self.relaxed_answer(&invocation, options),
        }
    }

    fn relaxed_answer(&self, invocation: &Invocation, options: MockOptions)
        -> Result<Value>
    {
        let ret = invocation.method().return_type();
        let relaxed = options.relaxed ||
            (options.relax_unit && *ret == TypeTag::Unit);
        if !relaxed {
            return Err(MockError::NoAnswer {
                invocation: invocation.to_string()
            });
        }
        match ret {
            TypeTag::Mock(name) => self
                .child_mock(&InvocationMatcher::exact(invocation), name)
                .map(Value::Mock),
            ty => Ok(empty_value(ty, self.instantiator())),
        }
    }
}

impl Default for StubRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::matcher::Matcher;

    fn get() -> MethodDescriptor {
        MethodDescriptor::new("Calc", "get", [TypeTag::Int], TypeTag::Int)
    }

    #[test]
    fn latest_matching_answer_wins() {
        let repo = StubRepository::new();
        let m = repo.create_mock("Calc", MockOptions::default());
        repo.add_answer(InvocationMatcher::new(m.clone(), get(),
            vec![Matcher::Any]), Answer::constant(1)).unwrap();
        repo.add_answer(InvocationMatcher::new(m.clone(), get(),
            vec![Matcher::eq(5)]), Answer::constant(2)).unwrap();
        assert_eq!(repo.dispatch(&m, &get(), vec![Value::Int(5)]).unwrap(),
            Value::Int(2));
        assert_eq!(repo.dispatch(&m, &get(), vec![Value::Int(6)]).unwrap(),
            Value::Int(1));
        assert_eq!(repo.recorded_calls(m.id()).unwrap().len(), 2);
    }

    #[test]
    fn unanswered_call_is_logged_and_fails() {
        let repo = StubRepository::new();
        let m = repo.create_mock("Calc", MockOptions::default());
        let e = repo.dispatch(&m, &get(), vec![Value::Int(5)]).unwrap_err();
        assert_eq!(e.to_string(), format!("no answer found for {}.get(5)", m));
        assert_eq!(repo.recorded_calls(m.id()).unwrap().len(), 1);
    }

    #[test]
    fn relaxed_mock_returns_empty_values() {
        let repo = StubRepository::new();
        let opts = MockOptions { relaxed: true, relax_unit: false };
        let m = repo.create_mock("Calc", opts);
        assert_eq!(repo.dispatch(&m, &get(), vec![Value::Int(5)]).unwrap(),
            Value::Int(0));
    }

    #[test]
    fn children_are_memoized_per_key() {
        let repo = StubRepository::new();
        let m = repo.create_mock("Calc", MockOptions::default());
        let key = |x| InvocationMatcher::new(m.clone(), get(),
            vec![Matcher::eq(x)]);
        let a = repo.child_mock(&key(1), "Child").unwrap();
        let b = repo.child_mock(&key(1), "Child").unwrap();
        let c = repo.child_mock(&key(2), "Child").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        repo.clear(m.id(), ClearOptions::default()).unwrap();
        assert_ne!(a, repo.child_mock(&key(1), "Child").unwrap());
    }

    #[test]
    fn unknown_mock() {
        let repo = StubRepository::new();
        let other = StubRepository::new();
        let m = other.create_mock("Calc", MockOptions::default());
        assert!(matches!(repo.recorded_calls(m.id()),
            Err(MockError::UnknownMock(_))));
    }
}

// vim: tw=80
//! The recording and verification engine of a mocking framework.
//!
//! Replaymock records ordinary blocks of calls on mock objects and turns them
//! into invocation patterns, either to stub the mocks or to verify the calls
//! they received.  A single block both describes a pattern (which arguments
//! are matchers, and which are literals) and produces real values that the
//! block can keep running with.  The engine tells the two apart by replaying
//! the block several times with different random placeholder values standing
//! in for each matcher, then correlating the values that reached each call.
//!
//! The engine does not generate mocks itself.  An interception layer, such as
//! a hand-written wrapper or generated code, forwards every call on a mock to
//! [`MockEngine::on_method_call`].
//!
//! # User Guide
//!
//! * [`Getting started`](#getting-started)
//! * [`Answers`](#answers)
//! * [`Matching arguments`](#matching-arguments)
//! * [`Capturing arguments`](#capturing-arguments)
//! * [`Verification`](#verification)
//! * [`Chained calls`](#chained-calls)
//! * [`Return type hints`](#return-type-hints)
//! * [`Relaxed mocks`](#relaxed-mocks)
//! * [`Threads`](#threads)
//! * [`Configuration`](#configuration)
//!
//! ## Getting Started
//! ```
//! use replaymock::*;
//!
//! let engine = MockEngine::new();
//! let calc = engine.mock("Calc");
//! let add = MethodDescriptor::new("Calc", "add",
//!     [TypeTag::Int, TypeTag::Int], TypeTag::Int);
//!
//! engine.every(|s| {
//!     s.call(&calc, &add, vec![s.any(TypeTag::Int)?, 2.into()])?;
//!     Ok(())
//! }).unwrap().returns(42).unwrap();
//!
//! // What the interception layer does when the code under test calls
//! // calc.add(7, 2)
//! let r = engine.on_method_call(&calc, &add, vec![7.into(), 2.into()]);
//! assert_eq!(r.unwrap(), Value::Int(42));
//! assert!(engine.on_method_call(&calc, &add, vec![7.into(), 3.into()])
//!     .is_err());
//! ```
//!
//! ## Answers
//!
//! A recorded stub is completed by its [`Stubbing`] handle.  It can return a
//! constant, a sequence of values, or compute its result from the
//! [`Invocation`].  When several stubs match a call, the most recently
//! registered one wins.
//!
//! ```
//! # use replaymock::*;
//! # let engine = MockEngine::new();
//! # let calc = engine.mock("Calc");
//! # let add = MethodDescriptor::new("Calc", "add",
//! #     [TypeTag::Int, TypeTag::Int], TypeTag::Int);
//! engine.every(|s| {
//!     s.call(&calc, &add, vec![s.any(TypeTag::Int)?, s.any(TypeTag::Int)?])?;
//!     Ok(())
//! }).unwrap().answers(|i| {
//!     Ok(Value::Int(i.args()[0].as_int()? + i.args()[1].as_int()?))
//! }).unwrap();
//!
//! let r = engine.on_method_call(&calc, &add, vec![3.into(), 4.into()]);
//! assert_eq!(r.unwrap(), Value::Int(7));
//! ```
//!
//! ## Matching arguments
//!
//! Every method of [`Scope`] that declares a matcher returns a placeholder,
//! which must be passed as an argument of the next call.  Plain values are
//! literals and match by equality.  Matchers combine with [`Scope::and`],
//! [`Scope::or`] and [`Scope::not`], whose operands are the placeholders of
//! matchers declared just before.  Anything implementing
//! [`predicates::Predicate`] can be used through [`Scope::matches`].
//!
//! ```
//! # use replaymock::*;
//! # let engine = MockEngine::new();
//! # let calc = engine.mock("Calc");
//! # let add = MethodDescriptor::new("Calc", "add",
//! #     [TypeTag::Int, TypeTag::Int], TypeTag::Int);
//! engine.every(|s| {
//!     let small = s.or(s.lt(0)?, s.gt(100)?)?;
//!     let even = s.matches(TypeTag::Int, predicate::function(|v: &Value| {
//!         v.as_int().map_or(false, |x| x % 2 == 0)
//!     }))?;
//!     s.call(&calc, &add, vec![small, even])?;
//!     Ok(())
//! }).unwrap().returns(-1).unwrap();
//!
//! let r = engine.on_method_call(&calc, &add, vec![101.into(), 4.into()]);
//! assert_eq!(r.unwrap(), Value::Int(-1));
//! ```
//!
//! ## Capturing arguments
//!
//! A [`CapturingSlot`] keeps the last value its matcher accepted, and a
//! [`CaptureList`] keeps all of them.  Values are captured only by calls that
//! are answered, or matched by a successful verification.
//!
//! ```
//! # use replaymock::*;
//! # let engine = MockEngine::new();
//! # let calc = engine.mock("Calc");
//! # let add = MethodDescriptor::new("Calc", "add",
//! #     [TypeTag::Int, TypeTag::Int], TypeTag::Int);
//! let slot = CapturingSlot::new();
//! engine.every(|s| {
//!     s.call(&calc, &add, vec![s.capture(&slot, TypeTag::Int)?, 2.into()])?;
//!     Ok(())
//! }).unwrap().returns(0).unwrap();
//!
//! engine.on_method_call(&calc, &add, vec![5.into(), 2.into()]).unwrap();
//! assert_eq!(engine.resolve_captured_value(&slot).unwrap(), Value::Int(5));
//! ```
//!
//! ## Verification
//!
//! [`MockEngine::verify`] checks a block against the calls the mocks really
//! received.  [`VerifyOrder`] selects the strategy: counted and unordered
//! (the default), ordered with other calls allowed in between, an exact
//! sequence, or counted with every call accounted for.
//!
//! ```
//! # use replaymock::*;
//! let engine = MockEngine::new();
//! let log = engine.relaxed_mock("Log");
//! let write = MethodDescriptor::new("Log", "write", [TypeTag::Str],
//!     TypeTag::Unit);
//! for line in ["a", "b", "c"] {
//!     engine.on_method_call(&log, &write, vec![line.into()]).unwrap();
//! }
//!
//! engine.verify(VerifyParams::new().order(VerifyOrder::Ordered), |s| {
//!     s.call(&log, &write, vec!["a".into()])?;
//!     s.call(&log, &write, vec!["c".into()])?;
//!     Ok(())
//! }).unwrap();
//! let sequence = VerifyParams::new().order(VerifyOrder::Sequence);
//! let e = engine.verify(sequence, |s| {
//!     s.call(&log, &write, vec!["a".into()])?;
//!     s.call(&log, &write, vec!["c".into()])?;
//!     Ok(())
//! });
//! assert!(matches!(e, Err(MockError::VerificationFailed { .. })));
//! engine.verify(VerifyParams::new().exactly(3), |s| {
//!     s.call(&log, &write, vec![s.any(TypeTag::Str)?])?;
//!     Ok(())
//! }).unwrap();
//! engine.confirm_verified(&[log]).unwrap();
//! ```
//!
//! ## Chained calls
//!
//! A call returning a [`TypeTag::Mock`] yields a placeholder mock while
//! recording, and calls on it continue the chain.  Afterwards every link is
//! bound to a real child mock.  The same parent and arguments always yield
//! the same child.
//!
//! ```
//! # use replaymock::*;
//! let engine = MockEngine::new();
//! let shop = engine.mock("Shop");
//! let cart = MethodDescriptor::new("Shop", "cart", [TypeTag::Str],
//!     TypeTag::mock("Cart"));
//! let total = MethodDescriptor::new("Cart", "total", vec![], TypeTag::Long);
//!
//! engine.every(|s| {
//!     let c = s.call(&shop, &cart, vec!["alice".into()])?;
//!     s.call(c.as_mock()?, &total, vec![])?;
//!     Ok(())
//! }).unwrap().returns(100i64).unwrap();
//!
//! let c = engine.on_method_call(&shop, &cart, vec!["alice".into()]).unwrap();
//! let t = engine.on_method_call(c.as_mock().unwrap(), &total, vec![]);
//! assert_eq!(t.unwrap(), Value::Long(100));
//! ```
//!
//! ## Return type hints
//!
//! When a descriptor only knows an erased return type, the engine cannot
//! tell that a chain continues.  Using the placeholder as a more specific
//! type fails with [`MockError::TypeMismatch`]; the engine then retries the
//! round with the required type as a hint, for as long as each retry gets
//! further than the last.  [`Scope::hint`] sets the type explicitly.
//!
//! ```
//! # use replaymock::*;
//! let engine = MockEngine::new();
//! let registry = engine.mock("Registry");
//! let lookup = MethodDescriptor::new("Registry", "lookup", [TypeTag::Str],
//!     TypeTag::Any);
//! let name = MethodDescriptor::new("Service", "name", vec![], TypeTag::Str);
//!
//! engine.every(|s| {
//!     let svc = s.call(&registry, &lookup, vec!["db".into()])?;
//!     s.call(svc.as_mock_of("Service")?, &name, vec![])?;
//!     Ok(())
//! }).unwrap().returns("postgres").unwrap();
//!
//! let svc = engine.on_method_call(&registry, &lookup, vec!["db".into()])
//!     .unwrap();
//! let n = engine.on_method_call(svc.as_mock_of("Service").unwrap(), &name,
//!     vec![]);
//! assert_eq!(n.unwrap(), Value::from("postgres"));
//! ```
//!
//! ## Relaxed mocks
//!
//! Calls that match no stub normally fail with [`MockError::NoAnswer`].  A
//! relaxed mock instead returns an empty value of the return type, and a
//! child mock for mock return types.  [`MockOptions::relax_unit`] relaxes
//! only methods returning `Unit`.
//!
//! ## Threads
//!
//! [`MockEngine`] is `Send` and `Sync`.  Recording happens only on the thread
//! that created the engine; calls made from other threads are always
//! answered from the stubs, which live in a shared [`StubRepository`].
//!
//! ## Configuration
//!
//! [`EngineConfig::from_env`] reads `REPLAYMOCK_SEED`, `REPLAYMOCK_RELAXED`,
//! `REPLAYMOCK_RELAX_UNIT` and `REPLAYMOCK_MAX_ROUNDS`.  A fixed seed makes
//! placeholder values reproducible.  The engine logs through [`tracing`] and
//! never installs a subscriber.
//!
//! [`tracing`]: https://docs.rs/tracing

mod answer;
mod chain;
mod config;
mod detector;
mod engine;
mod error;
mod invocation;
mod matcher;
mod recorder;
mod signature;
mod state;
mod stub;
mod value;
mod verify;

pub use answer::Answer;
pub use config::{EngineConfig, DEFAULT_MAX_ROUNDS};
pub use detector::MatchedCall;
pub use engine::{MockEngine, Scope, Stubbing};
pub use error::{MockError, Result};
pub use invocation::{Invocation, InvocationMatcher, MethodDescriptor};
pub use matcher::{
    CaptureList,
    CaptureSink,
    CapturingSlot,
    CompareOp,
    Composite,
    CompositeKind,
    Matcher
};
pub use predicates::prelude::{Predicate, predicate};
pub use signature::{
    empty_value,
    estimate_rounds,
    rounds_for,
    Instantiator,
    NoInstantiator,
    SignatureGenerator
};
pub use state::RecordingState;
pub use stub::{ClearOptions, MockOptions, StubRepository};
pub use value::{object_eq, MockId, MockRef, ObjectValue, TypeTag, Value};
pub use verify::{
    AllVerifier,
    CallVerifier,
    OrderedVerifier,
    SequenceVerifier,
    Times,
    UnorderedVerifier,
    VerificationResult,
    VerifyOrder,
    VerifyParams
};

// vim: tw=80
//! Engines are shared between threads, but record only on their own
#![deny(warnings)]

use static_assertions::assert_impl_all;
use std::{sync::Arc, thread};

use replaymock::*;

assert_impl_all!(MockEngine: Send, Sync);
assert_impl_all!(StubRepository: Send, Sync);
assert_impl_all!(Answer: Send, Sync);
assert_impl_all!(Matcher: Send, Sync);
assert_impl_all!(Value: Send, Sync);
assert_impl_all!(MockError: Send, Sync);

fn get() -> MethodDescriptor {
    MethodDescriptor::new("Store", "get", [TypeTag::Str], TypeTag::Long)
}

#[test]
fn foreign_threads_are_answered_from_the_stubs() {
    let engine = MockEngine::new();
    let store = engine.mock("Store");
    engine.every(|s| {
        s.call(&store, &get(), vec![s.any(TypeTag::Str)?])?;
        Ok(())
    }).unwrap().returns(7i64).unwrap();

    thread::scope(|scope| {
        let handles = (0..4).map(|_| scope.spawn(|| {
            engine.on_method_call(&store, &get(), vec!["k".into()])
        })).collect::<Vec<_>>();
        for h in handles {
            assert_eq!(h.join().unwrap().unwrap(), Value::Long(7));
        }
    });
    assert_eq!(engine.recorded_calls(&store).unwrap().len(), 4);
    engine.verify(VerifyParams::new().exactly(4), |s| {
        s.call(&store, &get(), vec!["k".into()])?;
        Ok(())
    }).unwrap();
}

#[test]
fn foreign_threads_cannot_record() {
    let engine = MockEngine::new();
    let store = engine.mock("Store");
    thread::scope(|scope| {
        scope.spawn(|| {
            assert_eq!(engine.recording_state(), RecordingState::Answering);
            let e = engine.every(|s| {
                s.call(&store, &get(), vec!["k".into()])?;
                Ok(())
            }).err().unwrap();
            assert!(matches!(e, MockError::ForeignThread));
            let e = engine.verify(VerifyParams::new(), |s| {
                s.call(&store, &get(), vec!["k".into()])?;
                Ok(())
            }).unwrap_err();
            assert!(matches!(e, MockError::ForeignThread));
        }).join().unwrap();
    });
}

#[test]
fn foreign_calls_during_a_recording_are_dispatched() {
    let engine = MockEngine::new();
    let store = engine.relaxed_mock("Store");
    engine.every(|s| {
        let r = thread::scope(|scope| {
            scope.spawn(|| {
                engine.on_method_call(&store, &get(), vec!["bg".into()])
            }).join().unwrap()
        })?;
        assert_eq!(r, Value::Long(0));
        s.call(&store, &get(), vec!["fg".into()])?;
        Ok(())
    }).unwrap().returns(1i64).unwrap();

    // Only the background call really happened, once per replay round
    let calls = engine.recorded_calls(&store).unwrap();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| c.args()[0] == Value::from("bg")));
}

#[test]
fn engines_share_a_repository() {
    let repo = Arc::new(StubRepository::new());
    let config = EngineConfig::default();
    let main = MockEngine::with_repository(repo.clone(), config.clone());
    let store = main.mock("Store");

    thread::scope(|scope| {
        scope.spawn(|| {
            let worker = MockEngine::with_repository(repo.clone(),
                config.clone());
            worker.every(|s| {
                s.call(&store, &get(), vec!["k".into()])?;
                Ok(())
            }).unwrap().returns(3i64).unwrap();
        }).join().unwrap();
    });
    assert_eq!(main.on_method_call(&store, &get(), vec!["k".into()]).unwrap(),
        Value::Long(3));
}

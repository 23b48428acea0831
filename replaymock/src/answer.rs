// vim: tw=80
//! What a stubbed call returns.

use core::fmt;
use parking_lot::Mutex;
use std::{mem, sync::Arc};

use crate::error::{MockError, Result};
use crate::invocation::Invocation;
use crate::value::Value;

type AnswerFn = Arc<dyn Fn(&Invocation) -> Result<Value> + Send + Sync>;
type AnswerOnceFn = Box<dyn FnOnce(&Invocation) -> Result<Value> + Send>;

/// Return functions for stubs
enum Rfunc {
    Const(Value),
    /// Values are returned in order; the last one repeats forever.
    Many {
        values: Vec<Value>,
        next: usize,
    },
    Func(AnswerFn),
    Once(AnswerOnceFn),
    // Indicates that a `once` answer has already returned
    Expired,
    Throws(String),
}

/// What to do once the answer's lock is released.
enum Deferred {
    Done(Result<Value>),
    Func(AnswerFn),
    Once(AnswerOnceFn),
}

impl Rfunc {
    /// Everything that doesn't run user code is answered right away.
    fn take_next(&mut self, invocation: &Invocation) -> Deferred {
        match self {
            Rfunc::Const(v) => Deferred::Done(Ok(v.clone())),
            Rfunc::Many { values, next } => {
                let i = (*next).min(values.len().saturating_sub(1));
                *next += 1;
                Deferred::Done(values.get(i).cloned().ok_or_else(|| {
                    MockError::NoAnswer { invocation: invocation.to_string() }
                }))
            },
            Rfunc::Func(f) => Deferred::Func(f.clone()),
            Rfunc::Once(_) => {
                match mem::replace(self, Rfunc::Expired) {
                    Rfunc::Once(f) => Deferred::Once(f),
                    _ => unreachable!()
                }
            },
            Rfunc::Expired => Deferred::Done(Err(MockError::Thrown(format!(
                "{} was answered once already", invocation)))),
            Rfunc::Throws(msg) =>
                Deferred::Done(Err(MockError::Thrown(msg.clone()))),
        }
    }
}

/// Computes the result of a stubbed call.
pub struct Answer(Mutex<Rfunc>);

impl Answer {
    fn new(rfunc: Rfunc) -> Self {
        Answer(Mutex::new(rfunc))
    }

    /// Always return `value`.
    pub fn constant<V: Into<Value>>(value: V) -> Self {
        Answer::new(Rfunc::Const(value.into()))
    }

    /// Return each of `values` in turn, then keep returning the last one.
    pub fn many(values: Vec<Value>) -> Self {
        Answer::new(Rfunc::Many { values, next: 0 })
    }

    /// Compute the result from the invocation.
    ///
    /// The closure may call back into any mock, including the one it answers
    /// for.
    pub fn func<F>(f: F) -> Self
        where F: Fn(&Invocation) -> Result<Value> + Send + Sync + 'static
    {
        Answer::new(Rfunc::Func(Arc::new(f)))
    }

    /// Like [`func`](Self::func), but may only be called once.
    pub fn once<F>(f: F) -> Self
        where F: FnOnce(&Invocation) -> Result<Value> + Send + 'static
    {
        Answer::new(Rfunc::Once(Box::new(f)))
    }

    /// Fail every call with `message`.
    pub fn throws<S: Into<String>>(message: S) -> Self {
        Answer::new(Rfunc::Throws(message.into()))
    }

    /// Return `()`.
    pub fn just_runs() -> Self {
        Answer::constant(Value::Unit)
    }

    pub(crate) fn call(&self, invocation: &Invocation) -> Result<Value> {
        let next = self.0.lock().take_next(invocation);
        match next {
            Deferred::Done(r) => r,
            Deferred::Func(f) => f(invocation),
            Deferred::Once(f) => f(invocation),
        }
    }
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match &*self.0.lock() {
            Rfunc::Const(v) => return write!(f, "Answer::constant({})", v),
            Rfunc::Many { .. } => "many",
            Rfunc::Func(_) => "func",
            Rfunc::Once(_) => "once",
            Rfunc::Expired => "expired",
            Rfunc::Throws(_) => "throws",
        };
        write!(f, "Answer::{}", name)
    }
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::invocation::MethodDescriptor;
    use crate::value::{MockId, MockRef, TypeTag};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn invocation() -> Invocation {
        let m = MockRef::new(MockId::new(1), Arc::from("Calc"));
        let meth = MethodDescriptor::new("Calc", "get", vec![], TypeTag::Int);
        Invocation::new(m, meth, vec![], 0)
    }

    #[test]
    fn many_repeats_last() {
        let a = Answer::many(vec![Value::Int(1), Value::Int(2)]);
        let i = invocation();
        assert_eq!(a.call(&i).unwrap(), Value::Int(1));
        assert_eq!(a.call(&i).unwrap(), Value::Int(2));
        assert_eq!(a.call(&i).unwrap(), Value::Int(2));
    }

    #[test]
    fn once_expires() {
        let a = Answer::once(|_| Ok(Value::Int(42)));
        let i = invocation();
        assert_eq!(a.call(&i).unwrap(), Value::Int(42));
        assert!(matches!(a.call(&i), Err(MockError::Thrown(_))));
    }

    #[test]
    fn func_sees_arguments() {
        let n = AtomicUsize::new(0);
        let a = Answer::func(move |inv| {
            let n = n.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(Value::from(format!("{}#{}", inv.method().name(), n)))
        });
        let i = invocation();
        assert_eq!(a.call(&i).unwrap(), Value::from("get#1"));
        assert_eq!(a.call(&i).unwrap(), Value::from("get#2"));
    }
}

// vim: tw=80
//! Concrete calls, and patterns over them.

use core::fmt::{self, Display};
use predicates::Predicate;
use predicates_tree::CaseTreeExt;
use std::sync::Arc;

use crate::matcher::Matcher;
use crate::value::{MockRef, TypeTag, Value};

/// Describes a mocked method: where it is declared, its name, its formal
/// parameter types and its return type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    declaring_type: Arc<str>,
    name: Arc<str>,
    params: Arc<[TypeTag]>,
    return_type: TypeTag,
}

impl MethodDescriptor {
    /// # Examples
    /// ```
    /// # use replaymock::*;
    /// let add = MethodDescriptor::new("Calc", "add",
    ///     [TypeTag::Int, TypeTag::Int], TypeTag::Int);
    /// assert_eq!(2, add.arity());
    /// assert!(!add.is_suspend());
    /// ```
    pub fn new<P>(declaring_type: &str, name: &str, params: P,
                  return_type: TypeTag) -> Self
        where P: Into<Vec<TypeTag>>
    {
        let params: Vec<TypeTag> = params.into();
        MethodDescriptor {
            declaring_type: Arc::from(declaring_type),
            name: Arc::from(name),
            params: Arc::from(params),
            return_type
        }
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[TypeTag] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn return_type(&self) -> &TypeTag {
        &self.return_type
    }

    /// Does this method suspend?  Suspending methods take a continuation as
    /// their final parameter.
    pub fn is_suspend(&self) -> bool {
        matches!(self.params.last(), Some(TypeTag::Continuation))
    }
}

impl Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}(", self.declaring_type, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "): {}", self.return_type)
    }
}

fn write_call<T: Display>(f: &mut fmt::Formatter, target: &MockRef,
                          method: &MethodDescriptor, args: &[T])
    -> fmt::Result
{
    write!(f, "{}.{}(", target, method.name())?;
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", a)?;
    }
    f.write_str(")")
}

/// A call that really happened.  Immutable once created.
#[derive(Clone, Debug)]
pub struct Invocation {
    target: MockRef,
    method: MethodDescriptor,
    args: Vec<Value>,
    timestamp: u64,
}

impl Invocation {
    pub fn new(target: MockRef, method: MethodDescriptor, args: Vec<Value>,
               timestamp: u64) -> Self
    {
        Invocation { target, method, args, timestamp }
    }

    pub fn target(&self) -> &MockRef {
        &self.target
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Position of this call in the repository's global call order.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub(crate) fn retarget(&mut self, target: MockRef) {
        self.target = target;
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_call(f, &self.target, &self.method, &self.args)
    }
}

/// A pattern over [`Invocation`]s: an exact target, an exact method, and one
/// [`Matcher`] per argument.
#[derive(Clone, Debug, PartialEq)]
pub struct InvocationMatcher {
    target: MockRef,
    method: MethodDescriptor,
    args: Vec<Matcher>,
}

impl InvocationMatcher {
    pub fn new(target: MockRef, method: MethodDescriptor, args: Vec<Matcher>)
        -> Self
    {
        InvocationMatcher { target, method, args }
    }

    /// A pattern accepting exactly the arguments of `invocation`.
    pub fn exact(invocation: &Invocation) -> Self {
        let args = invocation.args().iter()
            .cloned()
            .map(Matcher::eq)
            .collect();
        InvocationMatcher::new(invocation.target().clone(),
            invocation.method().clone(), args)
    }

    pub fn target(&self) -> &MockRef {
        &self.target
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn args(&self) -> &[Matcher] {
        &self.args
    }

    fn arg_matches(m: &Matcher, value: &Value) -> bool {
        // Type-restricted matchers must never see a mistyped argument
        m.expected_type().map_or(true, |ty| ty.accepts(value)) &&
            m.matches(value)
    }

    pub fn matches(&self, invocation: &Invocation) -> bool {
        self.target.id() == invocation.target().id() &&
            self.method == *invocation.method() &&
            self.args.len() == invocation.args().len() &&
            self.args.iter().zip(invocation.args())
                .all(|(m, a)| Self::arg_matches(m, a))
    }

    /// Run every capturing matcher against `invocation`'s arguments.
    pub fn capture(&self, invocation: &Invocation) {
        for (m, a) in self.args.iter().zip(invocation.args()) {
            m.capture_value(a);
        }
    }

    /// Explain why `invocation` does not match, or `None` if it does.
    pub fn explain(&self, invocation: &Invocation) -> Option<String> {
        if self.matches(invocation) {
            return None;
        }
        if self.target.id() != invocation.target().id() {
            return Some(format!("target {} is not {}", invocation.target(),
                self.target));
        }
        if self.method != *invocation.method() {
            return Some(format!("method {} is not {}", invocation.method(),
                self.method));
        }
        if self.args.len() != invocation.args().len() {
            return Some(format!("expected {} arguments, got {}",
                self.args.len(), invocation.args().len()));
        }
        let mut out = String::new();
        for (i, (m, a)) in self.args.iter().zip(invocation.args()).enumerate()
        {
            if let Some(case) = m.find_case(false, a) {
                out.push_str(&format!("argument {}: {}\n", i, case.tree()));
            }
        }
        Some(out)
    }

    /// The same pattern with every capturing matcher replaced by one that
    /// does not capture.
    pub fn without_capture(&self) -> Self {
        InvocationMatcher {
            target: self.target.clone(),
            method: self.method.clone(),
            args: self.args.iter().map(Matcher::without_capture).collect()
        }
    }

    pub(crate) fn retarget(&mut self, target: MockRef) {
        self.target = target;
    }
}

impl Display for InvocationMatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_call(f, &self.target, &self.method, &self.args)
    }
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::value::MockId;

    fn calc() -> MockRef {
        MockRef::new(MockId::new(1), Arc::from("Calc"))
    }

    fn add() -> MethodDescriptor {
        MethodDescriptor::new("Calc", "add", [TypeTag::Int, TypeTag::Int],
            TypeTag::Int)
    }

    #[test]
    fn matches_target_method_and_args() {
        let inv = Invocation::new(calc(), add(),
            vec![Value::Int(1), Value::Int(2)], 0);
        let m = InvocationMatcher::new(calc(), add(),
            vec![Matcher::eq(1), Matcher::Any]);
        assert!(m.matches(&inv));
        assert!(m.explain(&inv).is_none());

        let other = MockRef::new(MockId::new(2), Arc::from("Calc"));
        let m = InvocationMatcher::new(other, add(),
            vec![Matcher::eq(1), Matcher::Any]);
        assert!(!m.matches(&inv));
    }

    #[test]
    fn arity_mismatch_never_matches() {
        let inv = Invocation::new(calc(), add(), vec![Value::Int(1)], 0);
        let m = InvocationMatcher::new(calc(), add(),
            vec![Matcher::eq(1), Matcher::Any]);
        assert!(!m.matches(&inv));
        assert_eq!(m.explain(&inv).unwrap(), "expected 2 arguments, got 1");
    }

    #[test]
    fn explain_names_rejecting_argument() {
        let inv = Invocation::new(calc(), add(),
            vec![Value::Int(1), Value::Int(2)], 0);
        let m = InvocationMatcher::new(calc(), add(),
            vec![Matcher::eq(1), Matcher::eq(3)]);
        let why = m.explain(&inv).unwrap();
        assert!(why.starts_with("argument 1:"), "{}", why);
    }

    #[test]
    fn display() {
        let m = InvocationMatcher::new(calc(), add(),
            vec![Matcher::eq(1), Matcher::Any]);
        assert_eq!(m.to_string(), "Calc#1.add(eq(1), any())");
        assert_eq!(add().to_string(), "Calc.add(Int, Int): Int");
    }
}

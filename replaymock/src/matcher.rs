// vim: tw=80
//! Argument matchers.
//!
//! A [`Matcher`] decides whether a single argument value is acceptable.  The
//! set of matchers is closed, with [`Matcher::Predicate`] as the escape hatch
//! for anything implementing [`predicates::Predicate`].  `Matcher` itself
//! implements `Predicate<Value>`, so failed matches can be explained with a
//! `predicates-tree` case tree.

use core::fmt::{self, Display};
use parking_lot::Mutex;
use predicates::reflection::{Case, Child, PredicateReflection, Product};
use predicates::Predicate;
use std::{cmp::Ordering, sync::Arc};

use crate::value::{TypeTag, Value};

/// Relation used by [`Matcher::Comparing`].  The argument is the left-hand
/// side: `Lt` accepts arguments less than the reference value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl CompareOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Gt => ord == Ordering::Greater,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Eq => "cmpEq",
            CompareOp::Ge => "ge",
            CompareOp::Gt => "gt",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeKind {
    And,
    Or,
    Not,
}

/// A single-value capture sink.  Later captures overwrite earlier ones.
#[derive(Clone, Debug, Default)]
pub struct CapturingSlot(Arc<Mutex<Option<Value>>>);

impl CapturingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Option<Value> {
        self.0.lock().clone()
    }

    pub fn is_captured(&self) -> bool {
        self.0.lock().is_some()
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An append-only capture sink.
#[derive(Clone, Debug, Default)]
pub struct CaptureList(Arc<Mutex<Vec<Value>>>);

impl CaptureList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Vec<Value> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Clone, Debug)]
pub enum CaptureSink {
    Slot(CapturingSlot),
    List(CaptureList),
}

impl CaptureSink {
    fn push(&self, value: &Value) {
        match self {
            CaptureSink::Slot(s) => *s.0.lock() = Some(value.clone()),
            CaptureSink::List(l) => l.0.lock().push(value.clone()),
        }
    }
}

impl PartialEq for CaptureSink {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CaptureSink::Slot(a), CaptureSink::Slot(b)) => a.ptr_eq(b),
            (CaptureSink::List(a), CaptureSink::List(b)) => a.ptr_eq(b),
            _ => false
        }
    }
}

/// A boolean combination of other matchers.
///
/// While recording, the caller only holds the placeholder values that the
/// operand matchers returned; those are kept in `operand_values`.  The
/// operand matchers themselves are filled in by the detector once every
/// replay round has run.
#[derive(Clone)]
pub struct Composite {
    kind: CompositeKind,
    pub(crate) operand_values: Vec<Value>,
    pub(crate) operands: Vec<Matcher>,
}

impl Composite {
    pub fn kind(&self) -> CompositeKind {
        self.kind
    }

    pub fn operands(&self) -> &[Matcher] {
        &self.operands
    }

    pub fn operand_values(&self) -> &[Value] {
        &self.operand_values
    }
}

/// Predicate over a single argument value.
#[derive(Clone)]
pub enum Matcher {
    /// Equality with a literal.  `by_ref` compares identity instead of value.
    Equals {
        value: Value,
        by_ref: bool,
        negate: bool,
    },
    Any,
    /// A user predicate that only runs on arguments of the expected type.
    Predicate {
        predicate: Arc<dyn Predicate<Value> + Send + Sync>,
        expected: TypeTag,
    },
    Comparing {
        value: Value,
        op: CompareOp,
    },
    TypeCheck(TypeTag),
    NullCheck {
        negate: bool,
    },
    Capturing(CaptureSink),
    Composite(Composite),
    /// Sentinel: every position not otherwise specified matches anything.
    AllAny,
}

impl Matcher {
    pub fn eq<V: Into<Value>>(value: V) -> Self {
        Matcher::Equals { value: value.into(), by_ref: false, negate: false }
    }

    pub fn neq<V: Into<Value>>(value: V) -> Self {
        Matcher::Equals { value: value.into(), by_ref: false, negate: true }
    }

    pub fn ref_eq<V: Into<Value>>(value: V) -> Self {
        Matcher::Equals { value: value.into(), by_ref: true, negate: false }
    }

    pub fn compare<V: Into<Value>>(op: CompareOp, value: V) -> Self {
        Matcher::Comparing { value: value.into(), op }
    }

    pub fn predicate<P>(expected: TypeTag, predicate: P) -> Self
        where P: Predicate<Value> + Send + Sync + 'static
    {
        Matcher::Predicate { predicate: Arc::new(predicate), expected }
    }

    pub fn capture(slot: &CapturingSlot) -> Self {
        Matcher::Capturing(CaptureSink::Slot(slot.clone()))
    }

    pub fn capture_all(list: &CaptureList) -> Self {
        Matcher::Capturing(CaptureSink::List(list.clone()))
    }

    /// A composite over placeholder values returned by earlier matcher
    /// declarations.
    pub fn composite(kind: CompositeKind, operand_values: Vec<Value>) -> Self
    {
        Matcher::Composite(Composite {
            kind,
            operand_values,
            operands: Vec::new()
        })
    }

    /// A composite whose operand matchers are already known.
    pub fn composite_of(kind: CompositeKind, operands: Vec<Matcher>) -> Self {
        Matcher::Composite(Composite {
            kind,
            operand_values: Vec::new(),
            operands
        })
    }

    /// Does `value` satisfy this matcher?
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Matcher::Equals { value: expected, by_ref, negate } => {
                let eq = if *by_ref {
                    expected.same_identity(value)
                } else {
                    expected == value
                };
                eq != *negate
            },
            Matcher::Any | Matcher::AllAny | Matcher::Capturing(_) => true,
            Matcher::Predicate { predicate, expected } =>
                expected.accepts(value) && predicate.eval(value),
            Matcher::Comparing { value: reference, op } =>
                value.compare(reference).map_or(false, |o| op.holds(o)),
            Matcher::TypeCheck(ty) => !value.is_null() && ty.accepts(value),
            Matcher::NullCheck { negate } => value.is_null() != *negate,
            Matcher::Composite(c) => match c.kind {
                CompositeKind::And =>
                    c.operands.iter().all(|m| m.matches(value)),
                CompositeKind::Or =>
                    c.operands.iter().any(|m| m.matches(value)),
                CompositeKind::Not =>
                    c.operands.first().map_or(false, |m| !m.matches(value)),
            }
        }
    }

    /// The runtime type an argument must have before this matcher is even
    /// evaluated.
    pub fn expected_type(&self) -> Option<&TypeTag> {
        match self {
            Matcher::Predicate { expected, .. } => Some(expected),
            _ => None
        }
    }

    /// Record `value` in every capture sink reachable from this matcher.
    /// Only called once the whole invocation has been accepted.
    pub fn capture_value(&self, value: &Value) {
        match self {
            Matcher::Capturing(sink) => sink.push(value),
            Matcher::Composite(c) => match c.kind {
                CompositeKind::And => for m in c.operands.iter() {
                    m.capture_value(value);
                },
                CompositeKind::Or => for m in c.operands.iter() {
                    if m.matches(value) {
                        m.capture_value(value);
                    }
                },
                CompositeKind::Not => (),
            },
            _ => ()
        }
    }

    /// An equivalent matcher that never captures.
    pub fn without_capture(&self) -> Matcher {
        match self {
            Matcher::Capturing(_) => Matcher::Any,
            Matcher::Composite(c) => Matcher::Composite(Composite {
                kind: c.kind,
                operand_values: c.operand_values.clone(),
                operands: c.operands.iter()
                    .map(Matcher::without_capture)
                    .collect()
            }),
            m => m.clone()
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Matcher::Composite(_))
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Matcher::Composite(c) => Some(c),
            _ => None
        }
    }

    pub(crate) fn as_composite_mut(&mut self) -> Option<&mut Composite> {
        match self {
            Matcher::Composite(c) => Some(c),
            _ => None
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Matcher) -> bool {
        match (self, other) {
            (Matcher::Equals { value: a, by_ref: ra, negate: na },
             Matcher::Equals { value: b, by_ref: rb, negate: nb }) =>
                ra == rb && na == nb && a.same_identity(b),
            (Matcher::Any, Matcher::Any) |
                (Matcher::AllAny, Matcher::AllAny) => true,
            (Matcher::Predicate { predicate: a, expected: ea },
             Matcher::Predicate { predicate: b, expected: eb }) =>
                ea == eb &&
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (Matcher::Comparing { value: a, op: oa },
             Matcher::Comparing { value: b, op: ob }) => oa == ob && a == b,
            (Matcher::TypeCheck(a), Matcher::TypeCheck(b)) => a == b,
            (Matcher::NullCheck { negate: a }, Matcher::NullCheck { negate: b })
                => a == b,
            (Matcher::Capturing(a), Matcher::Capturing(b)) => a == b,
            (Matcher::Composite(a), Matcher::Composite(b)) =>
                a.kind == b.kind && a.operands == b.operands,
            _ => false
        }
    }
}

impl Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Matcher::Equals { value, by_ref, negate } => {
                let name = match (by_ref, negate) {
                    (false, false) => "eq",
                    (false, true) => "neq",
                    (true, false) => "refEq",
                    (true, true) => "nrefEq",
                };
                write!(f, "{}({})", name, value)
            },
            Matcher::Any => f.write_str("any()"),
            Matcher::AllAny => f.write_str("allAny()"),
            Matcher::Predicate { predicate, expected } =>
                write!(f, "matches<{}>({})", expected, predicate),
            Matcher::Comparing { value, op } =>
                write!(f, "{}({})", op.name(), value),
            Matcher::TypeCheck(ty) => write!(f, "ofType({})", ty),
            Matcher::NullCheck { negate: false } => f.write_str("isNull()"),
            Matcher::NullCheck { negate: true } => f.write_str("isNotNull()"),
            Matcher::Capturing(CaptureSink::Slot(_)) =>
                f.write_str("capture(slot)"),
            Matcher::Capturing(CaptureSink::List(_)) =>
                f.write_str("capture(list)"),
            Matcher::Composite(c) => {
                let name = match c.kind {
                    CompositeKind::And => "and",
                    CompositeKind::Or => "or",
                    CompositeKind::Not => "not",
                };
                write!(f, "{}(", name)?;
                for (i, m) in c.operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", m)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl PredicateReflection for Matcher {
    fn children<'a>(&'a self) -> Box<dyn Iterator<Item = Child<'a>> + 'a> {
        match self {
            Matcher::Composite(c) => Box::new(c.operands.iter()
                .map(|m| Child::new("operand", m as &dyn PredicateReflection))),
            _ => Box::new(std::iter::empty())
        }
    }
}

impl Predicate<Value> for Matcher {
    fn eval(&self, value: &Value) -> bool {
        self.matches(value)
    }

    fn find_case<'a>(&'a self, expected: bool, value: &Value)
        -> Option<Case<'a>>
    {
        let actual = self.matches(value);
        if actual != expected {
            return None;
        }
        let this = self as &dyn PredicateReflection;
        let mut case = Case::new(Some(this), actual)
            .add_product(Product::new("var", value.to_string()));
        match self {
            Matcher::Composite(c) => {
                for m in c.operands.iter() {
                    if let Some(child) = m.find_case(m.matches(value), value) {
                        case = case.add_child(child);
                    }
                }
            },
            Matcher::Predicate { expected: ty, .. } if !ty.accepts(value) => {
                case = case.add_product(
                    Product::new("expected type", ty.to_string()));
            },
            _ => ()
        }
        Some(case)
    }
}

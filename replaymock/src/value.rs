// vim: tw=80
//! Dynamically typed values that flow through the interception boundary.
//!
//! Every argument and every return value of an intercepted call is a
//! [`Value`].  The engine never sees host types directly; it only needs to
//! know how to compare values, how to tell their runtime [`TypeTag`], and how
//! to build placeholders of a requested type.

use core::fmt::{self, Display};
use downcast::{downcast, Any};
use std::{cmp::Ordering, ptr, sync::Arc};

use crate::error::{MockError, Result};

/// Stable identity of a mock, issued by the
/// [`StubRepository`](crate::StubRepository) when the mock is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MockId(u64);

impl MockId {
    pub(crate) fn new(raw: u64) -> Self {
        MockId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for MockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reference to a mock object: its identity plus the name of the type it
/// stands in for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MockRef {
    id: MockId,
    type_name: Arc<str>,
}

impl MockRef {
    pub(crate) fn new(id: MockId, type_name: Arc<str>) -> Self {
        MockRef { id, type_name }
    }

    pub fn id(&self) -> MockId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn type_name_arc(&self) -> Arc<str> {
        self.type_name.clone()
    }
}

impl Display for MockRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.type_name, self.id)
    }
}

/// Host values the engine treats as opaque.
///
/// Implementors only need to name their type and say how to compare
/// themselves against another object; [`object_eq`] does the latter for any
/// `PartialEq` type.  The concrete type can be recovered with
/// `downcast_ref`.
///
/// # Examples
/// ```
/// # use replaymock::*;
/// #[derive(Debug, PartialEq)]
/// struct Point(i32, i32);
///
/// impl ObjectValue for Point {
///     fn object_type(&self) -> &str {
///         "Point"
///     }
///     fn dyn_eq(&self, other: &dyn ObjectValue) -> bool {
///         object_eq(self, other)
///     }
/// }
///
/// let v = Value::object(Point(1, 2));
/// assert_eq!(v, Value::object(Point(1, 2)));
/// assert_eq!(v.as_object::<Point>().unwrap(), &Point(1, 2));
/// ```
pub trait ObjectValue: Any + fmt::Debug + Send + Sync {
    /// Name of the host type, used for type checks and diagnostics.
    fn object_type(&self) -> &str;

    /// Value equality against another opaque object.
    fn dyn_eq(&self, other: &dyn ObjectValue) -> bool;
}
downcast!(dyn ObjectValue);

/// Equality helper for [`ObjectValue::dyn_eq`] implementations.
pub fn object_eq<T>(this: &T, other: &dyn ObjectValue) -> bool
    where T: ObjectValue + PartialEq
{
    other.downcast_ref::<T>().map_or(false, |o| o == this)
}

/// Runtime type of a [`Value`], and the declared types of method parameters
/// and return values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Unit,
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Str,
    /// A mockable reference type.  Calls returning it yield child mocks.
    Mock(Arc<str>),
    /// An opaque host type, constructed through an
    /// [`Instantiator`](crate::Instantiator).
    Object(Arc<str>),
    /// Statically erased: any value fits.
    Any,
    /// The state holder passed as the final argument of a suspending call.
    Continuation,
    Null,
}

impl TypeTag {
    pub fn mock(name: &str) -> Self {
        TypeTag::Mock(Arc::from(name))
    }

    pub fn object(name: &str) -> Self {
        TypeTag::Object(Arc::from(name))
    }

    /// Can this type hold `null`?
    pub fn is_nullable(&self) -> bool {
        matches!(self,
            TypeTag::Str | TypeTag::Mock(_) | TypeTag::Object(_) |
            TypeTag::Any | TypeTag::Null)
    }

    /// Is `value` an instance of this type?
    ///
    /// Erased signature placeholders fit every type, since they stand in for
    /// a value that could not be built.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeTag::Any, _) | (_, Value::Signature(_)) => true,
            (_, Value::Null) => self.is_nullable(),
            (TypeTag::Mock(name), Value::Mock(m)) =>
                name.as_ref() == "_" || name.as_ref() == m.type_name(),
            (TypeTag::Object(name), Value::Object(o)) =>
                name.as_ref() == o.object_type(),
            _ => *self == value.type_tag(),
        }
    }
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeTag::Unit => f.write_str("Unit"),
            TypeTag::Bool => f.write_str("Bool"),
            TypeTag::Byte => f.write_str("Byte"),
            TypeTag::Char => f.write_str("Char"),
            TypeTag::Short => f.write_str("Short"),
            TypeTag::Int => f.write_str("Int"),
            TypeTag::Long => f.write_str("Long"),
            TypeTag::Float => f.write_str("Float"),
            TypeTag::Double => f.write_str("Double"),
            TypeTag::Str => f.write_str("Str"),
            TypeTag::Mock(name) => write!(f, "Mock<{}>", name),
            TypeTag::Object(name) => write!(f, "Object<{}>", name),
            TypeTag::Any => f.write_str("Any"),
            TypeTag::Continuation => f.write_str("Continuation"),
            TypeTag::Null => f.write_str("Null"),
        }
    }
}

/// An argument or return value of an intercepted call.
#[derive(Clone, Debug)]
pub enum Value {
    Unit,
    Null,
    Bool(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Mock(MockRef),
    Object(Arc<dyn ObjectValue>),
    /// The state holder of a suspending call.
    Continuation(u64),
    /// A type-erased signature placeholder.  Only ever produced while
    /// recording.
    Signature(u64),
}

macro_rules! accessor {
    ($name:ident, $variant:ident, $t:ty) => {
        pub fn $name(&self) -> Result<$t> {
            match self {
                Value::$variant(x) => Ok(*x),
                v => Err(v.mismatch(TypeTag::$variant))
            }
        }
    }
}

impl Value {
    pub fn object<T: ObjectValue>(obj: T) -> Self {
        Value::Object(Arc::new(obj))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Unit => TypeTag::Unit,
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Byte(_) => TypeTag::Byte,
            Value::Char(_) => TypeTag::Char,
            Value::Short(_) => TypeTag::Short,
            Value::Int(_) => TypeTag::Int,
            Value::Long(_) => TypeTag::Long,
            Value::Float(_) => TypeTag::Float,
            Value::Double(_) => TypeTag::Double,
            Value::Str(_) => TypeTag::Str,
            Value::Mock(m) => TypeTag::Mock(m.type_name_arc()),
            Value::Object(o) => TypeTag::object(o.object_type()),
            Value::Continuation(_) => TypeTag::Continuation,
            Value::Signature(_) => TypeTag::Any,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Identity comparison: objects compare by reference, mocks by id, and
    /// everything else by value.
    pub fn same_identity(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) =>
                ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (a, b) => a == b
        }
    }

    /// Order two values of the same type.  Values of different types, and
    /// types with no natural order, are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Byte(a), Value::Byte(b)) => a.partial_cmp(b),
            (Value::Char(a), Value::Char(b)) => a.partial_cmp(b),
            (Value::Short(a), Value::Short(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Long(a), Value::Long(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            _ => None
        }
    }

    fn mismatch(&self, expected: TypeTag) -> MockError {
        MockError::TypeMismatch { expected, found: self.type_tag() }
    }

    /// Check that this value is an instance of `ty`.
    pub fn expect_type(&self, ty: &TypeTag) -> Result<&Value> {
        if ty.accepts(self) {
            Ok(self)
        } else {
            Err(self.mismatch(ty.clone()))
        }
    }

    accessor!(as_bool, Bool, bool);
    accessor!(as_byte, Byte, i8);
    accessor!(as_char, Char, char);
    accessor!(as_short, Short, i16);
    accessor!(as_int, Int, i32);
    accessor!(as_long, Long, i64);
    accessor!(as_float, Float, f32);
    accessor!(as_double, Double, f64);

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(&**s),
            v => Err(v.mismatch(TypeTag::Str))
        }
    }

    /// The mock this value refers to, whatever its type.
    pub fn as_mock(&self) -> Result<&MockRef> {
        self.as_mock_of("_")
    }

    /// The mock this value refers to, which must stand in for `type_name`.
    pub fn as_mock_of(&self, type_name: &str) -> Result<&MockRef> {
        match self {
            Value::Mock(m) if type_name == "_" || m.type_name() == type_name =>
                Ok(m),
            v => Err(v.mismatch(TypeTag::mock(type_name)))
        }
    }

    /// The host object this value holds, whatever its type name.
    ///
    /// A mismatch names `T`'s Rust path, which no
    /// [`Instantiator`](crate::Instantiator) knows.  Inside a recording block
    /// use [`as_object_of`](Self::as_object_of), so that the return type can
    /// be inferred from the mismatch.
    pub fn as_object<T: ObjectValue>(&self) -> Result<&T> {
        self.downcast_object(|| TypeTag::object(std::any::type_name::<T>()))
    }

    /// The host object this value holds, which must be a `T` named
    /// `type_name`.
    pub fn as_object_of<T: ObjectValue>(&self, type_name: &str) -> Result<&T> {
        match self {
            Value::Object(o) if o.object_type() == type_name =>
                self.downcast_object(|| TypeTag::object(type_name)),
            v => Err(v.mismatch(TypeTag::object(type_name)))
        }
    }

    fn downcast_object<T, F>(&self, expected: F) -> Result<&T>
        where T: ObjectValue,
              F: Fn() -> TypeTag
    {
        match self {
            Value::Object(o) => (**o).downcast_ref::<T>()
                .map_err(|_| self.mismatch(expected())),
            v => Err(v.mismatch(expected()))
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            // Bitwise, so that NaN literals still match themselves
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Mock(a), Value::Mock(b)) => a.id() == b.id(),
            (Value::Object(a), Value::Object(b)) =>
                ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)) ||
                a.dyn_eq(b.as_ref()),
            (Value::Continuation(a), Value::Continuation(b)) => a == b,
            (Value::Signature(a), Value::Signature(b)) => a == b,
            _ => false
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(b) => write!(f, "{}b", b),
            Value::Char(c) => write!(f, "{:?}", c),
            Value::Short(s) => write!(f, "{}s", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}L", l),
            Value::Float(x) => write!(f, "{}f", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Mock(m) => write!(f, "{}", m),
            Value::Object(o) => write!(f, "{:?}", o),
            Value::Continuation(n) => write!(f, "continuation#{}", n),
            Value::Signature(n) => write!(f, "<signature#{}>", n),
        }
    }
}

macro_rules! from_primitive {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Value {
            fn from(x: $t) -> Self {
                Value::$variant(x)
            }
        }
    }
}

from_primitive!(bool, Bool);
from_primitive!(i8, Byte);
from_primitive!(char, Char);
from_primitive!(i16, Short);
from_primitive!(i32, Int);
from_primitive!(i64, Long);
from_primitive!(f32, Float);
from_primitive!(f64, Double);
from_primitive!(MockRef, Mock);

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<&MockRef> for Value {
    fn from(m: &MockRef) -> Self {
        Value::Mock(m.clone())
    }
}

#[cfg(test)]
mod t {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point(i32, i32);

    impl ObjectValue for Point {
        fn object_type(&self) -> &str {
            "Point"
        }
        fn dyn_eq(&self, other: &dyn ObjectValue) -> bool {
            object_eq(self, other)
        }
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn objects_equal_by_value_but_not_identity() {
        let a = Value::object(Point(1, 2));
        let b = Value::object(Point(1, 2));
        assert_eq!(a, b);
        assert!(!a.same_identity(&b));
        assert!(a.same_identity(&a.clone()));
    }

    #[test]
    fn accessor_mismatch_is_structured() {
        let e = Value::Null.as_mock_of("Child").unwrap_err();
        match e {
            MockError::TypeMismatch { expected, found } => {
                assert_eq!(expected, TypeTag::mock("Child"));
                assert_eq!(found, TypeTag::Null);
            }
            e => panic!("unexpected {:?}", e)
        }
    }

    #[test]
    fn object_mismatch_names_the_object_type() {
        let v = Value::object(Point(1, 2));
        assert_eq!(v.as_object_of::<Point>("Point").unwrap(), &Point(1, 2));
        match Value::Null.as_object_of::<Point>("Point").unwrap_err() {
            MockError::TypeMismatch { expected, .. } =>
                assert_eq!(expected, TypeTag::object("Point")),
            e => panic!("unexpected {:?}", e)
        }
        assert!(v.as_object_of::<Point>("Line").is_err());
    }

    #[test]
    fn nullable_types_accept_null() {
        assert!(TypeTag::Str.accepts(&Value::Null));
        assert!(!TypeTag::Int.accepts(&Value::Null));
        assert!(TypeTag::object("Point").accepts(&Value::object(Point(0, 0))));
        assert!(!TypeTag::object("Line").accepts(&Value::object(Point(0, 0))));
    }

    #[test]
    fn compare_requires_same_type() {
        assert_eq!(Some(Ordering::Less),
            Value::Int(1).compare(&Value::Int(2)));
        assert_eq!(None, Value::Int(1).compare(&Value::Long(2)));
    }
}

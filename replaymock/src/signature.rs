// vim: tw=80
//! Placeholder values that tag matcher positions during replay.
//!
//! Every declared matcher hands the recording block a freshly generated
//! *signature* value in its place.  Signature values are random, so the same
//! argument position carries a different value in every round while literal
//! arguments stay put; the detector uses that difference to tell matchers
//! from literals.

use rand::{distributions::Alphanumeric, rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

use crate::stub::StubRepository;
use crate::value::{MockRef, TypeTag, Value};

/// Builds empty instances of opaque host types.  This is the host's
/// reflective construction capability, injected into the engine.
pub trait Instantiator: Send + Sync {
    /// A new, empty instance of `type_name`, or `None` if the type is
    /// unknown.  Each call must return a distinct object.
    fn empty_instance(&self, type_name: &str) -> Option<Value>;
}

/// The default [`Instantiator`], which knows no host types.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInstantiator;

impl Instantiator for NoInstantiator {
    fn empty_instance(&self, _type_name: &str) -> Option<Value> {
        None
    }
}

/// Number of replay rounds needed before a signature value of this type is
/// unlikely to collide with a literal by chance.  Small value spaces need
/// many rounds.
pub fn rounds_for(value: &Value) -> usize {
    match value {
        Value::Bool(_) => 40,
        Value::Byte(_) => 8,
        Value::Char(_) | Value::Short(_) => 4,
        Value::Int(_) | Value::Float(_) => 2,
        _ => 1
    }
}

/// Rounds needed to disambiguate every value in `values`.  Never less than
/// one.
pub fn estimate_rounds<'a, I>(values: I) -> usize
    where I: IntoIterator<Item = &'a Value>
{
    values.into_iter().map(rounds_for).max().unwrap_or(1).max(1)
}

/// The value returned in place of a real result while recording, and by
/// relaxed mocks.  Mock types are handled by the caller, since they need a
/// child mock.
pub fn empty_value(ty: &TypeTag, instantiator: &dyn Instantiator) -> Value {
    match ty {
        TypeTag::Unit => Value::Unit,
        TypeTag::Bool => Value::Bool(false),
        TypeTag::Byte => Value::Byte(0),
        TypeTag::Char => Value::Char('\0'),
        TypeTag::Short => Value::Short(0),
        TypeTag::Int => Value::Int(0),
        TypeTag::Long => Value::Long(0),
        TypeTag::Float => Value::Float(0.0),
        TypeTag::Double => Value::Double(0.0),
        TypeTag::Str => Value::from(""),
        TypeTag::Object(name) =>
            instantiator.empty_instance(name).unwrap_or(Value::Null),
        TypeTag::Mock(_) | TypeTag::Any | TypeTag::Continuation |
            TypeTag::Null => Value::Null,
    }
}

/// Produces signature values.
pub struct SignatureGenerator {
    rng: StdRng,
    next_token: u64,
}

impl SignatureGenerator {
    /// A generator seeded from `seed`, or from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        SignatureGenerator { rng, next_token: 0 }
    }

    /// A type-erased placeholder, unique for the lifetime of this generator.
    pub fn erased(&mut self) -> Value {
        self.next_token += 1;
        Value::Signature(self.next_token)
    }

    /// Any bit pattern but NaN, which is unordered against everything.
    fn float(&mut self) -> f32 {
        loop {
            let f = f32::from_bits(self.rng.gen());
            if !f.is_nan() {
                return f;
            }
        }
    }

    fn double(&mut self) -> f64 {
        loop {
            let d = f64::from_bits(self.rng.gen());
            if !d.is_nan() {
                return d;
            }
        }
    }

    /// A fresh signature value of type `ty`.
    ///
    /// Primitive types draw from their whole value range.  Mock types get a
    /// new mock identity that is never registered, and object types a new
    /// empty instance from the repository's instantiator.  When no typed
    /// value can be built, an erased placeholder is returned instead.
    pub fn next_signature(&mut self, ty: &TypeTag, repo: &StubRepository)
        -> Value
    {
        match ty {
            TypeTag::Bool => Value::Bool(self.rng.gen()),
            TypeTag::Byte => Value::Byte(self.rng.gen()),
            TypeTag::Char => Value::Char(self.rng.gen()),
            TypeTag::Short => Value::Short(self.rng.gen()),
            TypeTag::Int => Value::Int(self.rng.gen()),
            TypeTag::Long => Value::Long(self.rng.gen()),
            TypeTag::Float => Value::Float(self.float()),
            TypeTag::Double => Value::Double(self.double()),
            TypeTag::Str => {
                let s: String = (&mut self.rng)
                    .sample_iter(&Alphanumeric)
                    .take(16)
                    .map(char::from)
                    .collect();
                Value::Str(Arc::from(s))
            },
            TypeTag::Mock(name) =>
                Value::Mock(MockRef::new(repo.next_id(), name.clone())),
            TypeTag::Object(name) => repo.instantiator()
                .empty_instance(name)
                .unwrap_or_else(|| self.erased()),
            TypeTag::Unit | TypeTag::Any | TypeTag::Continuation |
                TypeTag::Null => self.erased(),
        }
    }
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn estimate_uses_the_hungriest_type() {
        let vals = [Value::Int(1), Value::Byte(3), Value::from("x")];
        assert_eq!(8, estimate_rounds(&vals));
        assert_eq!(40, estimate_rounds(&[Value::Bool(true)]));
        assert_eq!(4, estimate_rounds(&[Value::Char('a'), Value::Short(1)]));
        assert_eq!(2, estimate_rounds(&[Value::Float(1.0)]));
        assert_eq!(1, estimate_rounds(&[]));
    }

    #[test]
    fn signatures_have_requested_type() {
        let repo = StubRepository::new();
        let mut g = SignatureGenerator::new(Some(7));
        for ty in [TypeTag::Bool, TypeTag::Int, TypeTag::Str, TypeTag::Long,
                   TypeTag::mock("Foo")]
        {
            let v = g.next_signature(&ty, &repo);
            assert_eq!(v.type_tag(), ty);
        }
        assert!(matches!(g.next_signature(&TypeTag::object("Bar"), &repo),
            Value::Signature(_)));
    }

    #[test]
    fn floats_span_their_range() {
        let repo = StubRepository::new();
        let mut g = SignatureGenerator::new(Some(3));
        let doubles = (0..64).map(|_| {
            g.next_signature(&TypeTag::Double, &repo).as_double().unwrap()
        }).collect::<Vec<_>>();
        assert!(doubles.iter().all(|d| !d.is_nan()));
        assert!(doubles.iter().any(|d| !(0.0..1.0).contains(d)));
        let f = g.next_signature(&TypeTag::Float, &repo).as_float().unwrap();
        assert!(!f.is_nan());
    }

    #[test]
    fn erased_signatures_are_unique() {
        let repo = StubRepository::new();
        let mut g = SignatureGenerator::new(None);
        let a = g.next_signature(&TypeTag::Any, &repo);
        let b = g.next_signature(&TypeTag::Any, &repo);
        assert_ne!(a, b);
    }

    #[test]
    fn seeded_generators_repeat() {
        let repo = StubRepository::new();
        let mut a = SignatureGenerator::new(Some(42));
        let mut b = SignatureGenerator::new(Some(42));
        for _ in 0..8 {
            assert_eq!(a.next_signature(&TypeTag::Int, &repo),
                       b.next_signature(&TypeTag::Int, &repo));
        }
    }
}

// vim: tw=80
//! Reconciles replay rounds into invocation matchers.
//!
//! Every declared matcher receives a fresh signature value in each round, so
//! across rounds it leaves behind a tuple of values that no literal argument
//! repeats.  Looking up each argument's cross-round tuple among the declared
//! matchers' tuples tells which positions hold matchers and which hold
//! literals.

use std::collections::HashSet;
use tracing::debug;

use crate::error::{MockError, Result};
use crate::invocation::{Invocation, InvocationMatcher};
use crate::matcher::Matcher;
use crate::recorder::{CallRound, SignedCall};
use crate::value::{MockId, MockRef, TypeTag, Value};

/// One fully resolved call of a recording block.
#[derive(Clone, Debug)]
pub struct MatchedCall {
    pub(crate) return_type: TypeTag,
    pub(crate) invocation: Invocation,
    pub(crate) invocation_matcher: InvocationMatcher,
    pub(crate) is_chained: bool,
    /// The chain placeholder this call returned while recording.
    pub(crate) returned: Option<MockRef>,
    /// Index of the call whose result this call was made on, once chains
    /// are resolved.
    pub(crate) producer: Option<usize>,
}

impl MatchedCall {
    pub fn return_type(&self) -> &TypeTag {
        &self.return_type
    }

    /// The call as it was made during the first round.
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn invocation_matcher(&self) -> &InvocationMatcher {
        &self.invocation_matcher
    }

    /// Was this call made on the result of an earlier call of the block?
    pub fn is_chained(&self) -> bool {
        self.is_chained
    }
}

type Key = Vec<Value>;

fn same_key(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_identity(y))
}

fn non_deterministic(detail: String) -> MockError {
    MockError::NonDeterministicBlock { detail }
}

fn check_rounds(rounds: &[CallRound]) -> Result<&CallRound> {
    let zero = rounds.first().ok_or(MockError::MissingCalls)?;
    if zero.calls.is_empty() {
        return Err(MockError::MissingCalls);
    }
    for (r, round) in rounds.iter().enumerate().skip(1) {
        if round.calls.len() != zero.calls.len() {
            return Err(non_deterministic(format!(
                "round {} made {} calls, but round 0 made {}", r,
                round.calls.len(), zero.calls.len())));
        }
        for (a, b) in zero.calls.iter().zip(round.calls.iter()) {
            if a.invocation.method() != b.invocation.method() ||
                a.invocation.args().len() != b.invocation.args().len()
            {
                return Err(non_deterministic(format!(
                    "round {} called {} where round 0 called {}", r,
                    b.invocation, a.invocation)));
            }
            if a.matchers.len() != b.matchers.len() {
                return Err(non_deterministic(format!(
                    "{} declared {} matchers in round {} and {} in round 0",
                    a.invocation.method().name(), b.matchers.len(), r,
                    a.matchers.len())));
            }
        }
    }
    Ok(zero)
}

/// Matchers of one call position, keyed by their cross-round signature
/// tuples.  Slots are emptied as matchers are consumed.
struct SignatureMap {
    slots: Vec<Option<(Key, Matcher)>>,
}

impl SignatureMap {
    fn take(&mut self, key: &[Value]) -> Option<Matcher> {
        self.slots.iter_mut()
            .find(|s| s.as_ref().map_or(false, |(k, _)| same_key(k, key)))
            .and_then(Option::take)
            .map(|(_, m)| m)
    }

    fn leftovers(&self) -> Vec<String> {
        self.slots.iter()
            .flatten()
            .map(|(_, m)| m.to_string())
            .collect()
    }
}

/// The values `f` picks out of each round's copy of a call.
fn tuple<F>(calls: &[&SignedCall], f: F) -> Key
    where F: Fn(&SignedCall) -> Value
{
    calls.iter().map(|c| f(c)).collect()
}

/// Resolve one call position from every round's copy of it.
fn detect_call(calls: &[&SignedCall], placeholders: &HashSet<MockId>)
    -> Result<MatchedCall>
{
    let zero = calls[0];
    let last = calls[calls.len() - 1];

    // Later rounds are authoritative: their matchers may depend on state that
    // earlier rounds built up.
    let mut map = SignatureMap {
        slots: (0..zero.matchers.len())
            .map(|m| {
                let key = tuple(calls, |c| c.matchers[m].signature.clone());
                Some((key, last.matchers[m].matcher.clone()))
            }).collect()
    };
    let composites = (0..zero.matchers.len())
        .filter(|&m| last.matchers[m].matcher.is_composite())
        .collect::<Vec<_>>();

    // Composites are declared after their operands, so in declaration order
    // every nested composite is complete before its parent takes it.
    for m in composites {
        let mut n_operands = None;
        for c in calls.iter() {
            let n = c.matchers[m].matcher.as_composite()
                .map(|x| x.operand_values.len());
            if n.is_none() || n_operands.map_or(false, |x| Some(x) != n) {
                return Err(non_deterministic(format!(
                    "composite matcher {} of {} changed shape between rounds",
                    m, zero.invocation)));
            }
            n_operands = n;
        }
        let mut operands = Vec::new();
        for i in 0..n_operands.unwrap_or(0) {
            let key = tuple(calls, |c| c.matchers[m].matcher.as_composite()
                .map_or(Value::Null, |x| x.operand_values[i].clone()));
            let operand = map.take(&key).unwrap_or_else(|| {
                Matcher::eq(key[0].clone())
            });
            operands.push(operand);
        }
        if let Some((_, matcher)) = map.slots[m].as_mut() {
            if let Some(c) = matcher.as_composite_mut() {
                c.operands = operands;
            }
        }
    }

    let mut all_any = false;
    let mut args = Vec::with_capacity(zero.invocation.args().len());
    for a in 0..zero.invocation.args().len() {
        let key = tuple(calls, |c| c.invocation.args()[a].clone());
        let matcher = match map.take(&key) {
            Some(Matcher::AllAny) if a == 0 => {
                all_any = true;
                Matcher::Any
            },
            Some(m) => m,
            None if all_any => Matcher::Any,
            None => Matcher::eq(key[0].clone())
        };
        args.push(matcher);
    }
    if zero.invocation.method().is_suspend() {
        if let Some(last) = args.last_mut() {
            *last = Matcher::Any;
        }
    }

    let leftovers = map.leftovers();
    if !leftovers.is_empty() {
        return Err(MockError::OrphanedMatchers {
            invocation: zero.invocation.to_string(),
            matchers: leftovers,
        });
    }

    let target = zero.invocation.target();
    Ok(MatchedCall {
        return_type: zero.return_type.clone(),
        invocation: zero.invocation.clone(),
        invocation_matcher: InvocationMatcher::new(target.clone(),
            zero.invocation.method().clone(), args),
        is_chained: placeholders.contains(&target.id()),
        returned: zero.returned.clone(),
        producer: None,
    })
}

/// Reconcile `rounds` into one [`MatchedCall`] per call of the block.
///
/// Every round must have made the same calls with the same number of
/// declared matchers each.
pub(crate) fn detect(rounds: &[CallRound], placeholders: &HashSet<MockId>)
    -> Result<Vec<MatchedCall>>
{
    let zero = check_rounds(rounds)?;
    let matched = (0..zero.calls.len())
        .map(|i| {
            let calls = rounds.iter()
                .map(|r| &r.calls[i])
                .collect::<Vec<_>>();
            detect_call(&calls, placeholders)
        }).collect::<Result<Vec<_>>>()?;
    debug!(calls = matched.len(), rounds = rounds.len(), "detected matchers");
    Ok(matched)
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::invocation::MethodDescriptor;
    use crate::matcher::CompositeKind;
    use crate::recorder::DeclaredMatcher;
    use std::sync::Arc;

    fn calc() -> MockRef {
        MockRef::new(MockId::new(1), Arc::from("Calc"))
    }

    fn add() -> MethodDescriptor {
        MethodDescriptor::new("Calc", "add", [TypeTag::Int, TypeTag::Int],
            TypeTag::Int)
    }

    fn declared(matcher: Matcher, signature: i32) -> DeclaredMatcher {
        DeclaredMatcher {
            matcher,
            signature: Value::Int(signature),
            nested: false
        }
    }

    fn call(method: MethodDescriptor, args: Vec<Value>,
            matchers: Vec<DeclaredMatcher>) -> SignedCall
    {
        SignedCall {
            invocation: Invocation::new(calc(), method.clone(), args, 0),
            matchers,
            returned: None,
            return_type: method.return_type().clone(),
        }
    }

    fn round(calls: Vec<SignedCall>) -> CallRound {
        CallRound { calls }
    }

    #[test]
    fn literals_and_matchers_are_partitioned() {
        let rounds = [10, 20].map(|s| round(vec![call(add(),
            vec![Value::Int(5), Value::Int(s)],
            vec![declared(Matcher::Any, s)])]));
        let matched = detect(&rounds, &HashSet::new()).unwrap();
        assert_eq!(matched[0].invocation_matcher().args(),
            &[Matcher::eq(5), Matcher::Any]);
        assert!(!matched[0].is_chained());
    }

    #[test]
    fn no_calls() {
        assert!(matches!(detect(&[round(vec![])], &HashSet::new()),
            Err(MockError::MissingCalls)));
        assert!(matches!(detect(&[], &HashSet::new()),
            Err(MockError::MissingCalls)));
    }

    #[test]
    fn differing_call_counts() {
        let c = || call(add(), vec![Value::Int(1), Value::Int(2)], vec![]);
        let rounds = [round(vec![c()]), round(vec![c(), c()])];
        assert!(matches!(detect(&rounds, &HashSet::new()),
            Err(MockError::NonDeterministicBlock { .. })));
    }

    #[test]
    fn all_any_covers_literals() {
        let rounds = [1, 2].map(|s| round(vec![call(add(),
            vec![Value::Int(s), Value::Int(7)],
            vec![declared(Matcher::AllAny, s)])]));
        let matched = detect(&rounds, &HashSet::new()).unwrap();
        assert_eq!(matched[0].invocation_matcher().args(),
            &[Matcher::Any, Matcher::Any]);
    }

    #[test]
    fn composite_operands_resolve() {
        let rounds = [(1, 2, 3), (4, 5, 6)].map(|(a, b, c)| {
            let composite = Matcher::composite(CompositeKind::And,
                vec![Value::Int(a), Value::Int(b)]);
            let mut ds = vec![
                declared(Matcher::compare(crate::matcher::CompareOp::Gt, 1),
                    a),
                declared(Matcher::Any, b),
                declared(composite, c)
            ];
            ds[0].nested = true;
            ds[1].nested = true;
            round(vec![call(add(), vec![Value::Int(c), Value::Int(9)], ds)])
        });
        let matched = detect(&rounds, &HashSet::new()).unwrap();
        let m = matched[0].invocation_matcher();
        assert_eq!(m.to_string(), "Calc#1.add(and(gt(1), any()), eq(9))");
    }

    #[test]
    fn composite_literal_operand() {
        let rounds = [1, 2].map(|a| {
            let composite = Matcher::composite(CompositeKind::Or,
                vec![Value::Int(a), Value::Int(3)]);
            let mut ds = vec![
                declared(Matcher::Any, a),
                declared(composite, a + 10)
            ];
            ds[0].nested = true;
            round(vec![call(add(), vec![Value::Int(a + 10), Value::Int(0)],
                ds)])
        });
        let matched = detect(&rounds, &HashSet::new()).unwrap();
        assert_eq!(matched[0].invocation_matcher().args()[0].to_string(),
            "or(any(), eq(3))");
    }

    #[test]
    fn orphaned_matcher() {
        let rounds = [1, 2].map(|s| round(vec![call(add(),
            vec![Value::Int(5), Value::Int(6)],
            vec![declared(Matcher::Any, s)])]));
        let e = detect(&rounds, &HashSet::new()).unwrap_err();
        assert_eq!(e.to_string(), "failed matching mocking signature for \
            Calc#1.add(5, 6), left matchers: [any()]");
    }

    #[test]
    fn suspend_continuation_is_any() {
        let m = MethodDescriptor::new("Calc", "fetch",
            [TypeTag::Int, TypeTag::Continuation], TypeTag::Int);
        let rounds = [1, 2].map(|s| round(vec![call(m.clone(),
            vec![Value::Int(1), Value::Continuation(s)], vec![])]));
        let matched = detect(&rounds, &HashSet::new()).unwrap();
        assert_eq!(matched[0].invocation_matcher().args(),
            &[Matcher::eq(1), Matcher::Any]);
    }
}

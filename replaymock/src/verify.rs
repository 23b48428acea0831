// vim: tw=80
//! Verification strategies.
//!
//! Each strategy checks a list of [`InvocationMatcher`]s against the merged,
//! chronologically sorted log of real calls made on every mock the matchers
//! name.

use std::{collections::HashSet, fmt::Write, ops::Range};
use tracing::debug;

use crate::detector::MatchedCall;
use crate::error::Result;
use crate::invocation::{Invocation, InvocationMatcher};
use crate::stub::StubRepository;
use crate::value::MockId;

/// How the matchers of a verification block relate to the call log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerifyOrder {
    /// Each matcher matches a number of calls within the expected bounds.
    #[default]
    Unordered,
    /// Like `Unordered`, and additionally every logged call is matched.
    All,
    /// The matchers match calls in this order, possibly with other calls in
    /// between.
    Ordered,
    /// The log is exactly the matched calls, in order.
    Sequence,
}

/// The number of calls an unordered matcher must match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Times {
    range: Range<usize>,
}

impl Times {
    // https://github.com/rust-lang/rust-clippy/issues/3307
    #[allow(clippy::range_plus_one)]
    pub fn exactly(n: usize) -> Self {
        Times { range: n..(n + 1) }
    }

    pub fn never() -> Self {
        Times::exactly(0)
    }

    pub fn at_least(n: usize) -> Self {
        Times { range: n..usize::MAX }
    }

    pub fn at_most(n: usize) -> Self {
        Times { range: 0..n.saturating_add(1) }
    }

    /// Any count within `range`, whose end is exclusive.
    pub fn range(range: Range<usize>) -> Self {
        Times { range }
    }

    pub fn contains(&self, count: usize) -> bool {
        self.range.contains(&count)
    }

    pub fn min(&self) -> usize {
        self.range.start
    }

    /// The largest allowed count, if bounded.
    pub fn max(&self) -> Option<usize> {
        if self.range.end == usize::MAX {
            None
        } else {
            Some(self.range.end.saturating_sub(1))
        }
    }
}

impl Default for Times {
    /// At least once
    fn default() -> Self {
        Times::at_least(1)
    }
}

impl std::fmt::Display for Times {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.max() {
            None => write!(f, "at least {}", self.min()),
            Some(max) if max == self.min() => write!(f, "exactly {}", max),
            Some(max) => write!(f, "between {} and {}", self.min(), max),
        }
    }
}

/// Options of one verification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyParams {
    pub order: VerifyOrder,
    /// Only used by the `Unordered` and `All` orders.
    pub times: Times,
    /// Succeed exactly when the verification would otherwise fail.
    pub inverse: bool,
}

impl VerifyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(mut self, order: VerifyOrder) -> Self {
        self.order = order;
        self
    }

    pub fn times(mut self, times: Times) -> Self {
        self.times = times;
        self
    }

    pub fn exactly(self, n: usize) -> Self {
        self.times(Times::exactly(n))
    }

    pub fn at_least(self, n: usize) -> Self {
        self.times(Times::at_least(n))
    }

    pub fn at_most(self, n: usize) -> Self {
        self.times(Times::at_most(n))
    }

    pub fn inverse(mut self) -> Self {
        self.inverse = !self.inverse;
        self
    }
}

/// Outcome of a verification strategy.
#[derive(Clone, Debug, Default)]
pub struct VerificationResult {
    pub matches: bool,
    /// Why the verification failed.
    pub diagnostic: Option<String>,
    /// Pairs of matcher and the call it accounted for.
    pub matched: Vec<(InvocationMatcher, Invocation)>,
}

impl VerificationResult {
    fn success(matched: Vec<(InvocationMatcher, Invocation)>) -> Self {
        VerificationResult { matches: true, diagnostic: None, matched }
    }

    fn failure(diagnostic: String) -> Self {
        VerificationResult {
            matches: false,
            diagnostic: Some(diagnostic),
            matched: Vec::new()
        }
    }
}

/// A verification algorithm.
pub trait CallVerifier {
    fn verify(&self, matchers: &[InvocationMatcher], log: &[Invocation],
              times: &Times) -> VerificationResult;
}

pub struct UnorderedVerifier;

impl CallVerifier for UnorderedVerifier {
    fn verify(&self, matchers: &[InvocationMatcher], log: &[Invocation],
              times: &Times) -> VerificationResult
    {
        let mut matched = Vec::new();
        for m in matchers {
            let hits = log.iter().filter(|i| m.matches(i)).collect::<Vec<_>>();
            if !times.contains(hits.len()) {
                let mut report = format!("{} was called {} times, expected \
                    {}\n", m, hits.len(), times);
                write_report(&mut report, matchers, log);
                return VerificationResult::failure(report);
            }
            matched.extend(hits.into_iter().map(|i| (m.clone(), i.clone())));
        }
        VerificationResult::success(matched)
    }
}

pub struct AllVerifier;

impl CallVerifier for AllVerifier {
    fn verify(&self, matchers: &[InvocationMatcher], log: &[Invocation],
              times: &Times) -> VerificationResult
    {
        let result = UnorderedVerifier.verify(matchers, log, times);
        if !result.matches {
            return result;
        }
        let unmatched = log.iter()
            .filter(|i| !matchers.iter().any(|m| m.matches(i)))
            .collect::<Vec<_>>();
        if unmatched.is_empty() {
            return result;
        }
        let mut report = String::from("some calls were not matched:\n");
        for i in unmatched {
            let _ = writeln!(report, "    {}", i);
        }
        write_report(&mut report, matchers, log);
        VerificationResult::failure(report)
    }
}

/// Matchers must match a subsequence of the log.
pub struct OrderedVerifier;

impl CallVerifier for OrderedVerifier {
    fn verify(&self, matchers: &[InvocationMatcher], log: &[Invocation],
              _times: &Times) -> VerificationResult
    {
        let (k, n) = (matchers.len(), log.len());
        // lcs[i][j]: longest prefix-respecting match of matchers[..i] within
        // log[..j]
        let mut lcs = vec![vec![0usize; n + 1]; k + 1];
        for i in 1..=k {
            for j in 1..=n {
                lcs[i][j] = if matchers[i - 1].matches(&log[j - 1]) {
                    lcs[i - 1][j - 1] + 1
                } else {
                    lcs[i - 1][j].max(lcs[i][j - 1])
                };
            }
        }
        if lcs[k][n] != k {
            let mut report = format!("calls are not in the verified order; \
                only {} of {} matchers matched in order\n", lcs[k][n], k);
            write_report(&mut report, matchers, log);
            return VerificationResult::failure(report);
        }
        let mut matched = Vec::with_capacity(k);
        let (mut i, mut j) = (k, n);
        while i > 0 && j > 0 {
            if matchers[i - 1].matches(&log[j - 1]) &&
                lcs[i][j] == lcs[i - 1][j - 1] + 1
            {
                matched.push((matchers[i - 1].clone(), log[j - 1].clone()));
                i -= 1;
                j -= 1;
            } else if lcs[i - 1][j] >= lcs[i][j - 1] {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        matched.reverse();
        VerificationResult::success(matched)
    }
}

/// The log must be exactly the matched calls.
pub struct SequenceVerifier;

impl CallVerifier for SequenceVerifier {
    fn verify(&self, matchers: &[InvocationMatcher], log: &[Invocation],
              _times: &Times) -> VerificationResult
    {
        let header = if log.len() != matchers.len() {
            Some(format!("expected {} calls, but {} were made\n",
                matchers.len(), log.len()))
        } else {
            matchers.iter()
                .zip(log)
                .position(|(m, i)| !m.matches(i))
                .map(|p| format!("call {} does not match {}\n", p,
                                 matchers[p]))
        };
        match header {
            Some(mut report) => {
                write_report(&mut report, matchers, log);
                VerificationResult::failure(report)
            },
            None => VerificationResult::success(matchers.iter()
                .cloned()
                .zip(log.iter().cloned())
                .collect())
        }
    }
}

/// Render the expected matchers, the actual calls, and for every matcher
/// without a match, why the closest candidate call was rejected.
fn write_report(out: &mut String, matchers: &[InvocationMatcher],
                log: &[Invocation])
{
    out.push_str("\nMatchers:\n");
    for m in matchers {
        let _ = writeln!(out, "    {}", m);
    }
    out.push_str("\nCalls:\n");
    if log.is_empty() {
        out.push_str("    (none)\n");
    }
    for (n, i) in log.iter().enumerate() {
        let _ = writeln!(out, "    {}) {}", n + 1, i);
    }
    for m in matchers.iter().filter(|m| !log.iter().any(|i| m.matches(i))) {
        let candidate = log.iter().find(|i| {
            i.target().id() == m.target().id() && i.method() == m.method()
        });
        if let Some(why) = candidate.and_then(|i| m.explain(i)) {
            let _ = write!(out, "\nClosest call to {}:\n{}", m, why);
        }
    }
}

/// Every call made on the mocks `matchers` name, oldest first.
pub(crate) fn merged_log<'a, I>(matchers: I, repo: &StubRepository)
    -> Result<Vec<Invocation>>
    where I: IntoIterator<Item = &'a InvocationMatcher>
{
    let mut seen = HashSet::<MockId>::new();
    let mut log = Vec::new();
    for m in matchers {
        if seen.insert(m.target().id()) {
            log.extend(repo.recorded_calls(m.target().id())?);
        }
    }
    log.sort_by_key(Invocation::timestamp);
    log.dedup_by_key(|i| i.timestamp());
    Ok(log)
}

/// Run the strategy `params` selects against the calls the verification
/// block resolved to.
pub(crate) fn run(calls: &[MatchedCall], params: &VerifyParams,
                  repo: &StubRepository) -> Result<VerificationResult>
{
    let matchers = calls.iter()
        .map(|c| c.invocation_matcher().clone())
        .collect::<Vec<_>>();
    let log = merged_log(&matchers, repo)?;
    let verifier: &dyn CallVerifier = match params.order {
        VerifyOrder::Unordered => &UnorderedVerifier,
        VerifyOrder::All => &AllVerifier,
        VerifyOrder::Ordered => &OrderedVerifier,
        VerifyOrder::Sequence => &SequenceVerifier,
    };
    let mut result = verifier.verify(&matchers, &log, &params.times);
    if params.inverse {
        result = if result.matches {
            let mut report = String::from(
                "calls were made that should not have been\n");
            write_report(&mut report, &matchers, &log);
            VerificationResult::failure(report)
        } else {
            VerificationResult::success(Vec::new())
        };
    }
    debug!(order = ?params.order, matches = result.matches, "verified");
    Ok(result)
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::invocation::MethodDescriptor;
    use crate::matcher::Matcher;
    use crate::value::{MockRef, TypeTag, Value};
    use std::sync::Arc;

    fn calc() -> MockRef {
        MockRef::new(MockId::new(1), Arc::from("Calc"))
    }

    fn op() -> MethodDescriptor {
        MethodDescriptor::new("Calc", "op", [TypeTag::Int], TypeTag::Unit)
    }

    fn log(args: &[i32]) -> Vec<Invocation> {
        args.iter()
            .enumerate()
            .map(|(t, a)| Invocation::new(calc(), op(), vec![Value::Int(*a)],
                t as u64))
            .collect()
    }

    fn op_eq(x: i32) -> InvocationMatcher {
        InvocationMatcher::new(calc(), op(), vec![Matcher::eq(x)])
    }

    #[test]
    fn unordered_counts() {
        let log = log(&[1, 1, 2]);
        let v = UnorderedVerifier;
        assert!(v.verify(&[op_eq(1)], &log, &Times::exactly(2)).matches);
        assert_eq!(v.verify(&[op_eq(1)], &log, &Times::exactly(2))
            .matched.len(), 2);
        assert!(!v.verify(&[op_eq(1)], &log, &Times::at_least(3)).matches);
        assert!(v.verify(&[op_eq(3)], &log, &Times::exactly(0)).matches);
        assert!(v.verify(&[op_eq(2)], &log, &Times::at_most(1)).matches);
    }

    #[test]
    fn unordered_failure_explains() {
        let log = log(&[1, 2]);
        let r = UnorderedVerifier.verify(&[op_eq(3)], &log, &Times::default());
        let diag = r.diagnostic.unwrap();
        assert!(diag.starts_with("Calc#1.op(eq(3)) was called 0 times, \
            expected at least 1"), "{}", diag);
        assert!(diag.contains("1) Calc#1.op(1)"), "{}", diag);
        assert!(diag.contains("Closest call to"), "{}", diag);
    }

    #[test]
    fn ordered_vs_sequence() {
        let log = log(&[1, 2, 3]);
        let t = Times::default();
        assert!(OrderedVerifier.verify(&[op_eq(1), op_eq(3)], &log, &t)
            .matches);
        assert!(!OrderedVerifier.verify(&[op_eq(3), op_eq(1)], &log, &t)
            .matches);
        assert!(!SequenceVerifier.verify(&[op_eq(1), op_eq(3)], &log, &t)
            .matches);
        assert!(SequenceVerifier
            .verify(&[op_eq(1), op_eq(2), op_eq(3)], &log, &t)
            .matches);
    }

    #[test]
    fn ordered_pairs_each_matcher_with_its_call() {
        let log = log(&[1, 2, 1, 3]);
        let r = OrderedVerifier.verify(&[op_eq(2), op_eq(1)], &log,
            &Times::default());
        let stamps = r.matched.iter()
            .map(|(_, i)| i.timestamp())
            .collect::<Vec<_>>();
        assert_eq!(stamps, vec![1, 2]);
    }

    #[test]
    fn all_requires_every_call() {
        let log = log(&[1, 2]);
        let t = Times::default();
        assert!(!AllVerifier.verify(&[op_eq(1)], &log, &t).matches);
        assert!(AllVerifier.verify(&[op_eq(1), op_eq(2)], &log, &t).matches);
    }

    #[test]
    fn times_display() {
        assert_eq!(Times::exactly(2).to_string(), "exactly 2");
        assert_eq!(Times::at_least(1).to_string(), "at least 1");
        assert_eq!(Times::at_most(3).to_string(), "between 0 and 3");
    }
}

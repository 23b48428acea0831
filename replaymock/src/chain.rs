// vim: tw=80
//! Replaces chain placeholders with real child mocks.
//!
//! While recording, a call returning a mock type yields a placeholder that
//! exists only for that round.  After detection every call made on such a
//! placeholder is moved onto the child mock that the producing call returns
//! for real.  The child is looked up by the producing call's matcher, so the
//! same parent and arguments always lead to the same child.

use std::collections::HashMap;
use tracing::trace;

use crate::detector::MatchedCall;
use crate::error::{MockError, Result};
use crate::stub::StubRepository;
use crate::value::{MockId, MockRef};

fn producer(calls: &[MatchedCall], placeholder: MockId) -> Option<usize> {
    calls.iter()
        .rposition(|c| {
            c.returned.as_ref().map(MockRef::id) == Some(placeholder)
        }).or_else(|| calls.len().checked_sub(1))
}

pub(crate) fn resolve(mut calls: Vec<MatchedCall>, repo: &StubRepository)
    -> Result<Vec<MatchedCall>>
{
    let mut children: HashMap<MockId, (usize, MockRef)> = HashMap::new();
    for i in 0..calls.len() {
        if !calls[i].is_chained {
            continue;
        }
        let placeholder = calls[i].invocation.target().clone();
        let (p, child) = match children.get(&placeholder.id()) {
            Some((p, child)) => (*p, child.clone()),
            None => {
                let p = producer(&calls[..i], placeholder.id())
                    .ok_or_else(|| MockError::IllegalArgument(format!(
                        "{} is called on a child mock that no earlier call \
                         returned", calls[i].invocation)))?;
                // Capturing is for real calls only; a lookup key never
                // captures.
                let key = calls[p].invocation_matcher.without_capture();
                let child = repo.child_mock(&key, placeholder.type_name())?;
                trace!(%key, %child, "resolved chain link");
                children.insert(placeholder.id(), (p, child.clone()));
                (p, child)
            }
        };
        calls[i].producer = Some(p);
        calls[i].invocation.retarget(child.clone());
        calls[i].invocation_matcher.retarget(child);
    }
    Ok(calls)
}

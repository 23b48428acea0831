// vim: tw=80
//! The recording state machine.

use core::fmt;
use std::collections::HashSet;
use tracing::debug;

use crate::answer::Answer;
use crate::detector::MatchedCall;
use crate::error::{MockError, Result};
use crate::stub::StubRepository;
use crate::value::Value;
use crate::verify::{self, VerificationResult, VerifyParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    /// Real calls are dispatched to their stubs and logged.
    Answering,
    /// A stubbing block is being replayed.
    Stubbing,
    /// A stubbing block has been recorded and waits for its answer.
    StubbingAwaitingAnswer,
    /// A verification block is being replayed.
    Verifying,
}

impl RecordingState {
    fn name(self) -> &'static str {
        match self {
            RecordingState::Answering => "answering",
            RecordingState::Stubbing => "stubbing",
            RecordingState::StubbingAwaitingAnswer =>
                "awaiting a stub's answer",
            RecordingState::Verifying => "verifying",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Governs which recording operations are legal.  Any illegal transition
/// fails with [`MockError::BadRecordingSequence`]; the caller is responsible
/// for resetting the session afterwards.
#[derive(Debug)]
pub(crate) struct RecordingStateMachine {
    state: RecordingState,
    matched: Vec<MatchedCall>,
    params: VerifyParams,
}

impl RecordingStateMachine {
    pub(crate) fn new() -> Self {
        RecordingStateMachine {
            state: RecordingState::Answering,
            matched: Vec::new(),
            params: VerifyParams::default(),
        }
    }

    pub(crate) fn state(&self) -> RecordingState {
        self.state
    }

    fn bad(&self, operation: &'static str) -> MockError {
        MockError::BadRecordingSequence {
            state: self.state.name(),
            operation
        }
    }

    fn transition(&mut self, to: RecordingState) {
        debug!(from = %self.state, %to, "recording state");
        self.state = to;
    }

    pub(crate) fn start_stubbing(&mut self) -> Result<()> {
        if self.state != RecordingState::Answering {
            return Err(self.bad("start stubbing"));
        }
        self.transition(RecordingState::Stubbing);
        Ok(())
    }

    pub(crate) fn start_verification(&mut self, params: VerifyParams)
        -> Result<()>
    {
        if self.state != RecordingState::Answering {
            return Err(self.bad("start verification"));
        }
        self.params = params;
        self.transition(RecordingState::Verifying);
        Ok(())
    }

    /// Do calls get redirected into the recorder?
    pub(crate) fn accepts_rounds(&self) -> bool {
        matches!(self.state, RecordingState::Stubbing |
                 RecordingState::Verifying)
    }

    /// The final round of a stubbing block completed.
    pub(crate) fn stubbing_complete(&mut self, matched: Vec<MatchedCall>)
        -> Result<&[MatchedCall]>
    {
        if self.state != RecordingState::Stubbing {
            return Err(self.bad("complete stubbing"));
        }
        self.matched = matched;
        self.transition(RecordingState::StubbingAwaitingAnswer);
        Ok(&self.matched)
    }

    /// Register `answer` for the recorded stub.
    ///
    /// Every call whose result was called on later in the block answers with
    /// the child mock those calls were resolved to, so the chain leads to the
    /// user's answer on the last call.
    pub(crate) fn answer(&mut self, answer: Answer, repo: &StubRepository)
        -> Result<()>
    {
        if self.state != RecordingState::StubbingAwaitingAnswer {
            return Err(self.bad("answer"));
        }
        let matched = std::mem::take(&mut self.matched);
        let last = matched.last().ok_or(MockError::MissingCalls)?;
        let mut linked = HashSet::new();
        let producers = matched.iter()
            .filter_map(|c| c.producer.map(|p| (p, c)));
        for (p, call) in producers {
            if linked.insert(p) {
                let child = call.invocation_matcher().target().clone();
                repo.add_answer(matched[p].invocation_matcher().clone(),
                    Answer::constant(Value::Mock(child)))?;
            }
        }
        repo.add_answer(last.invocation_matcher().clone(), answer)?;
        self.transition(RecordingState::Answering);
        Ok(())
    }

    /// The final round of a verification block completed.  Returns to
    /// `Answering` whatever the outcome.
    pub(crate) fn finish_verification(&mut self, matched: Vec<MatchedCall>,
                                      repo: &StubRepository)
        -> Result<VerificationResult>
    {
        if self.state != RecordingState::Verifying {
            return Err(self.bad("finish verification"));
        }
        let params = std::mem::take(&mut self.params);
        self.transition(RecordingState::Answering);
        let result = verify::run(&matched, &params, repo)?;
        if result.matches {
            for (m, invocation) in result.matched.iter() {
                m.capture(invocation);
                repo.mark_verified(invocation)?;
            }
        }
        Ok(result)
    }

    pub(crate) fn reset(&mut self) {
        if self.state != RecordingState::Answering {
            debug!(from = %self.state, "recording state reset");
        }
        self.state = RecordingState::Answering;
        self.matched.clear();
        self.params = VerifyParams::default();
    }
}

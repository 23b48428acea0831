// vim: tw=80
//! Errors raised by the recording and verification engine.

use thiserror::Error;

use crate::value::{MockId, TypeTag};

/// Every failure the engine can report.
///
/// Fatal errors raised while a recording session is active always reset the
/// session before they reach the caller, so the engine is immediately
/// reusable.
#[derive(Debug, Error)]
pub enum MockError {
    /// An operation was attempted in a recording state that does not allow
    /// it, like answering a stub that was never recorded.
    #[error("bad recording sequence: cannot {operation} while {state}")]
    BadRecordingSequence {
        state: &'static str,
        operation: &'static str,
    },

    /// A recording block finished without calling any mock.
    #[error("missing calls inside recording block")]
    MissingCalls,

    /// Replaying the recording block produced structurally different rounds.
    #[error("recording block is not deterministic: {detail}")]
    NonDeterministicBlock { detail: String },

    /// Declared matchers could not be correlated with any argument.
    #[error("failed matching mocking signature for {invocation}, left \
             matchers: [{}]", .matchers.join(", "))]
    OrphanedMatchers {
        invocation: String,
        matchers: Vec<String>,
    },

    /// A value was used as a type it does not have.  Inside a recording
    /// block this is recovered by hinting the return type of the call that
    /// produced the value.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: TypeTag, found: TypeTag },

    /// The return type of a chained call could not be inferred.
    #[error("cannot infer the return type of call {call_index}: {source}; \
             use Scope::hint to declare it explicitly")]
    UnresolvedReturnType {
        call_index: usize,
        #[source]
        source: Box<MockError>,
    },

    /// A real call matched none of the registered answers.
    #[error("no answer found for {invocation}")]
    NoAnswer { invocation: String },

    /// The mock is not known to the stub repository.
    #[error("unknown mock {0}")]
    UnknownMock(MockId),

    /// A matcher or argument was used in a way that cannot be recorded.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A verification query did not hold.
    #[error("verification failed:\n{report}")]
    VerificationFailed { report: String },

    /// A capturing slot was read before anything was captured.
    #[error("slot has not captured a value")]
    NotCaptured,

    /// The recording session was used from a thread that does not own it.
    #[error("recording session accessed from a foreign thread")]
    ForeignThread,

    /// Raised by an answer configured to throw.
    #[error("{0}")]
    Thrown(String),

    /// A recording block failed while replaying.
    #[error("recording failed during round {round}: {source}")]
    Recording {
        round: usize,
        #[source]
        source: Box<MockError>,
    },
}

impl MockError {
    /// Strip any [`MockError::Recording`] wrappers.
    pub fn root_cause(&self) -> &MockError {
        match self {
            MockError::Recording { source, .. } => source.root_cause(),
            e => e,
        }
    }

    /// Is this the only error kind a recording block may recover from?
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, MockError::TypeMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, MockError>;

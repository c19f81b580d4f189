use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// The remote calls a job makes, in the order it makes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Template,
    Coinbase,
    Finalize,
    Submit,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Template => "template",
            Step::Coinbase => "coinbase",
            Step::Finalize => "finalize",
            Step::Submit => "submit",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by (or while talking to) one of the remote services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid response: {0}")]
    Invalid(String),
}

/// A coinbase whose context disagrees with the active template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub field: &'static str,
    pub expected: u64,
    pub actual: u64,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} expected {}, got {}",
            self.field, self.expected, self.actual
        )
    }
}

/// Why a mining job ended in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("block template request failed: {0}")]
    Template(#[source] ServiceError),

    #[error("coinbase request failed: {0}")]
    Coinbase(#[source] ServiceError),

    #[error("coinbase does not match template: {0}")]
    CoinbaseMismatch(Mismatch),

    #[error("block finalization failed: {0}")]
    Build(#[source] ServiceError),

    #[error("block submission failed: {0}")]
    Submission(#[source] ServiceError),

    #[error("{step} request timed out after {after:?}")]
    Timeout { step: Step, after: Duration },

    #[error("job cancelled while awaiting {0}")]
    Cancelled(Step),

    #[error("job is not idle (state: {0})")]
    NotIdle(&'static str),
}

impl JobError {
    /// Stable machine readable name, used for stats and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Template(_) => "template_error",
            JobError::Coinbase(_) => "coinbase_error",
            JobError::CoinbaseMismatch(_) => "coinbase_mismatch",
            JobError::Build(_) => "build_error",
            JobError::Submission(_) => "submission_error",
            JobError::Timeout { .. } => "timeout",
            JobError::Cancelled(_) => "cancelled",
            JobError::NotIdle(_) => "not_idle",
        }
    }

    /// The step the job was on when it failed, if it got that far.
    pub fn step(&self) -> Option<Step> {
        match self {
            JobError::Template(_) => Some(Step::Template),
            JobError::Coinbase(_) | JobError::CoinbaseMismatch(_) => Some(Step::Coinbase),
            JobError::Build(_) => Some(Step::Finalize),
            JobError::Submission(_) => Some(Step::Submit),
            JobError::Timeout { step, .. } => Some(*step),
            JobError::Cancelled(step) => Some(*step),
            JobError::NotIdle(_) => None,
        }
    }
}

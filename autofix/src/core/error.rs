//! Typed error kinds for the repair engine.
//!
//! Recoverable kinds (payload, apply, request) are matched on by the repair
//! loop. `FatalError` is carried through `anyhow` and ends the process.

use std::path::PathBuf;

use thiserror::Error;

/// Raw model output could not be turned into an edit payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("response does not contain a unified diff")]
    NotADiff,

    #[error("response is not a valid edit list: {0}")]
    NotValidOps(String),

    #[error("response is neither a diff nor a valid edit list ({ops})")]
    Unrecognized { ops: String },
}

/// A structured edit batch was refused. The whole batch is dropped.
#[derive(Debug, Error)]
pub enum EditApplyError {
    #[error("edit #{index} ({path}): unsafe path: {reason}")]
    UnsafePath {
        index: usize,
        path: String,
        reason: String,
    },

    #[error("edit #{index} ({path}): extension not allowed")]
    DisallowedExtension { index: usize, path: String },

    #[error("edit #{index} ({path}): empty replacement content")]
    EmptyContent { index: usize, path: String },

    #[error("edit #{index} ({}): write failed: {source}", path.display())]
    WriteFailure {
        index: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EditApplyError {
    /// Index of the record that failed.
    pub fn index(&self) -> usize {
        match self {
            EditApplyError::UnsafePath { index, .. }
            | EditApplyError::DisallowedExtension { index, .. }
            | EditApplyError::EmptyContent { index, .. }
            | EditApplyError::WriteFailure { index, .. } => *index,
        }
    }

    /// Validation failures mean the payload was malformed; a write failure
    /// means the payload was fine but the tree refused it.
    pub fn is_validation(&self) -> bool {
        !matches!(self, EditApplyError::WriteFailure { .. })
    }
}

/// The request controller gave up without producing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("model call budget exhausted ({used}/{max})")]
    BudgetExhausted { used: u32, max: u32 },

    #[error("all {attempts} attempt(s) failed; last: {last_reason}")]
    AttemptsExhausted { attempts: usize, last_reason: String },
}

/// Conditions under which no work may be attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("{} is not a git work tree", .0.display())]
    NotARepository(PathBuf),

    #[error("repository has no commits after checkpoint (nothing to anchor resets to)")]
    NoCommits,

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

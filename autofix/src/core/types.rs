//! Shared deterministic types for the repair engine.
//!
//! These types define the contracts between the sanitizer, the appliers, the
//! request controller and the repair loop. They carry no I/O handles.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of model request issued by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Initial change described by the user's instruction.
    Change,
    /// Repair of a failing build, driven by the build output.
    Fix,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Change => "change",
            RequestKind::Fix => "fix",
        }
    }
}

/// Prompt variant used for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Plain instructions, no delimiters.
    Lenient,
    /// Explicit begin/end markers and the exact wire format.
    Strict,
}

/// Edit representation the prompts ask the model to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EditFormat {
    /// `{"edits": [...]}` full-file replacements.
    #[default]
    Edits,
    /// Unified diff text.
    Diff,
}

/// Action tag of a structured edit record. Only full replacement exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Replace,
}

/// One record of a structured edit payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Repository-relative path.
    pub path: String,
    pub action: EditAction,
    /// Entire final file text.
    pub content: String,
}

/// Edit payload extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditPayload {
    /// Sanitized unified-diff text.
    UnifiedDiff(String),
    /// Ordered full-file replacements.
    FileReplacementSet(Vec<FileEdit>),
}

impl EditPayload {
    pub fn shape(&self) -> &'static str {
        match self {
            EditPayload::UnifiedDiff(_) => "diff",
            EditPayload::FileReplacementSet(_) => "edits",
        }
    }
}

/// Result of applying an edit payload to the working tree.
///
/// A best-effort patch that leaves reject artifacts is `Applied` with
/// `partial = true`; it is never folded into a plain success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ApplyOutcome {
    Applied {
        changed_paths: Vec<PathBuf>,
        partial: bool,
        reject_artifacts: Vec<PathBuf>,
    },
    Rejected {
        reason: String,
        reject_artifacts: Vec<PathBuf>,
    },
    Invalid {
        reason: String,
    },
}

impl ApplyOutcome {
    /// True only for a complete application.
    pub fn is_complete(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { partial: false, .. })
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOutcome::Applied {
                changed_paths,
                partial: false,
                ..
            } => write!(f, "applied ({} file(s))", changed_paths.len()),
            ApplyOutcome::Applied {
                changed_paths,
                reject_artifacts,
                ..
            } => write!(
                f,
                "partially applied ({} file(s), {} reject artifact(s))",
                changed_paths.len(),
                reject_artifacts.len()
            ),
            ApplyOutcome::Rejected { reason, .. } => write!(f, "rejected: {reason}"),
            ApplyOutcome::Invalid { reason } => write!(f, "invalid: {reason}"),
        }
    }
}

/// Output of one build oracle invocation. Never mutated after capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    /// Process exit code; `None` when killed by a signal.
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl BuildResult {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0) && !self.timed_out
    }

    /// Combined stdout and stderr, exactly as attached to fix requests.
    pub fn combined_output(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
            buf.push('\n');
        }
        buf.push_str(&self.stderr);
        if self.timed_out {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str("[build timed out]\n");
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(exit: Option<i32>, stdout: &str, stderr: &str) -> BuildResult {
        BuildResult {
            exit_status: exit,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out: false,
        }
    }

    #[test]
    fn combined_output_keeps_streams_in_order() {
        let result = build(Some(1), "compiling", "error: boom\n");
        assert_eq!(result.combined_output(), "compiling\nerror: boom\n");
    }

    #[test]
    fn timed_out_build_is_never_success() {
        let mut result = build(Some(0), "", "");
        result.timed_out = true;
        assert!(!result.success());
        assert!(result.combined_output().contains("[build timed out]"));
    }

    #[test]
    fn partial_apply_is_not_complete() {
        let outcome = ApplyOutcome::Applied {
            changed_paths: vec![PathBuf::from("a.txt")],
            partial: true,
            reject_artifacts: vec![PathBuf::from("a.txt.rej")],
        };
        assert!(!outcome.is_complete());
        assert!(outcome.to_string().starts_with("partially applied"));
    }
}

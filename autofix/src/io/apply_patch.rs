//! Textual patch applier: unified diffs through `git apply`, three strategies.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::path::PROTECTED_DIRS;
use crate::core::types::ApplyOutcome;
use crate::io::git::Git;
use crate::io::guardian::{ConsistencyGuardian, find_reject_artifacts, is_reject_artifact};

/// One `git apply` configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub name: &'static str,
    pub flags: &'static [&'static str],
    /// Leaves reject artifacts instead of failing atomically.
    pub best_effort: bool,
}

/// Tried in order; the first success wins.
pub const STRATEGIES: [Strategy; 3] = [
    Strategy {
        name: "index",
        flags: &["--index", "--ignore-whitespace", "--recount"],
        best_effort: false,
    },
    Strategy {
        name: "three-way",
        flags: &["--3way", "--ignore-whitespace", "--recount"],
        best_effort: false,
    },
    Strategy {
        name: "reject",
        flags: &["--reject", "--ignore-whitespace", "--recount"],
        best_effort: true,
    },
];

const BINARY_PATCH_MARKER: &str = "GIT binary patch";

/// Apply `diff` to the working tree of `git`.
///
/// Between failed strategies the guardian restores the tree, so each
/// strategy starts from HEAD. A partial result is reported, never cleaned up
/// here; the caller decides what to do with it.
#[instrument(skip_all, fields(bytes = diff.len()))]
pub fn apply_unified_diff(
    git: &Git,
    guardian: &ConsistencyGuardian,
    diff: &str,
) -> Result<ApplyOutcome> {
    if diff.trim().is_empty() {
        return Ok(ApplyOutcome::Invalid {
            reason: "diff is empty".to_string(),
        });
    }
    if diff.contains(BINARY_PATCH_MARKER) {
        return Ok(ApplyOutcome::Invalid {
            reason: "binary patches are not supported".to_string(),
        });
    }

    let mut last_diagnostics = String::new();
    for strategy in &STRATEGIES {
        let run = git.apply(diff, strategy.flags)?;
        if run.success {
            let changed_paths = changed_paths(git)?;
            info!(strategy = strategy.name, files = changed_paths.len(), "diff applied");
            return Ok(ApplyOutcome::Applied {
                changed_paths,
                partial: false,
                reject_artifacts: Vec::new(),
            });
        }

        warn!(strategy = strategy.name, diagnostics = %run.diagnostics, "strategy failed");
        last_diagnostics = format!("{}: {}", strategy.name, run.diagnostics);

        if strategy.best_effort {
            let reject_artifacts = find_reject_artifacts(git)?;
            if !reject_artifacts.is_empty() {
                let changed_paths = changed_paths(git)?;
                warn!(
                    rejects = reject_artifacts.len(),
                    files = changed_paths.len(),
                    "diff partially applied"
                );
                return Ok(ApplyOutcome::Applied {
                    changed_paths,
                    partial: true,
                    reject_artifacts,
                });
            }
            return Ok(ApplyOutcome::Rejected {
                reason: last_diagnostics,
                reject_artifacts: Vec::new(),
            });
        }

        // A failed three-way apply can leave unmerged entries behind.
        guardian.restore_clean_state()?;
    }

    Ok(ApplyOutcome::Rejected {
        reason: last_diagnostics,
        reject_artifacts: Vec::new(),
    })
}

/// Absolute paths with working-tree or index changes, excluding reject
/// artifacts and protected directories.
fn changed_paths(git: &Git) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in git.status_porcelain()? {
        let rel = Path::new(&entry.path);
        let protected = rel
            .components()
            .next()
            .is_some_and(|first| PROTECTED_DIRS.iter().any(|dir| first.as_os_str() == *dir));
        if protected || is_reject_artifact(rel) {
            continue;
        }
        let abs = git.workdir().join(rel);
        if !paths.contains(&abs) {
            paths.push(abs);
        }
    }
    Ok(paths)
}

//! Consistency guardian: clears conflicts and reject artifacts.
//!
//! After `restore_clean_state` returns `Ok`, the index has no unmerged
//! entries, no merge is in progress, and no untracked `*.rej` file exists
//! outside `.git/` and `.autofix/`. Uncommitted edits to tracked files are
//! only discarded when a conflict forced a reset. Tracked `*.rej` files are
//! project content and are never touched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::path::PROTECTED_DIRS;
use crate::io::git::Git;

/// Conflicts and reject artifacts present in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inconsistencies {
    pub unmerged_paths: Vec<String>,
    pub merge_in_progress: bool,
    pub reject_artifacts: Vec<PathBuf>,
}

impl Inconsistencies {
    pub fn is_clean(&self) -> bool {
        !self.has_conflicts() && self.reject_artifacts.is_empty()
    }

    /// Conflicts can only be cleared by resetting to HEAD.
    pub fn has_conflicts(&self) -> bool {
        self.merge_in_progress || !self.unmerged_paths.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ConsistencyGuardian {
    git: Git,
}

impl ConsistencyGuardian {
    pub fn new(git: Git) -> Self {
        Self { git }
    }

    pub fn inspect(&self) -> Result<Inconsistencies> {
        Ok(Inconsistencies {
            unmerged_paths: self.git.unmerged_paths()?,
            merge_in_progress: self.git.merge_in_progress()?,
            reject_artifacts: find_reject_artifacts(&self.git)?,
        })
    }

    /// Clear conflicts and untracked reject artifacts. Returns whether
    /// anything had to be done.
    #[instrument(skip_all)]
    pub fn restore_clean_state(&self) -> Result<bool> {
        let found = self.inspect()?;
        if found.is_clean() {
            debug!("repository state is consistent");
            return Ok(false);
        }
        info!(
            unmerged = found.unmerged_paths.len(),
            merging = found.merge_in_progress,
            rejects = found.reject_artifacts.len(),
            "inconsistent repository state, restoring"
        );
        if found.has_conflicts() {
            self.reset(found.merge_in_progress)?;
        }
        remove_files(&found.reject_artifacts)?;
        Ok(true)
    }

    /// Discard every uncommitted change, untracked files included.
    ///
    /// Only called after the checkpoint commit has captured the user's own
    /// work.
    #[instrument(skip_all)]
    pub fn force_restore(&self) -> Result<()> {
        let rejects = find_reject_artifacts(&self.git)?;
        info!(rejects = rejects.len(), "forced restore to HEAD");
        self.reset(self.git.merge_in_progress()?)?;
        remove_files(&rejects)?;
        self.git.clean_untracked()
    }

    fn reset(&self, merge_in_progress: bool) -> Result<()> {
        if merge_in_progress {
            self.git.merge_abort()?;
        }
        self.git.reset_hard()
    }
}

fn remove_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed reject artifact"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove reject artifact {}", path.display()));
            }
        }
    }
    Ok(())
}

/// Untracked `*.rej` files in the work tree, ignored ones included, skipping
/// `.autofix/`. Absolute and sorted.
pub fn find_reject_artifacts(git: &Git) -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = git
        .untracked_files("*.rej")?
        .into_iter()
        .map(PathBuf::from)
        .filter(|rel| is_reject_artifact(rel) && !in_protected_dir(rel))
        .map(|rel| git.workdir().join(rel))
        .collect();
    found.sort();
    Ok(found)
}

pub fn is_reject_artifact(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "rej")
}

fn in_protected_dir(rel: &Path) -> bool {
    rel.components()
        .next()
        .is_some_and(|first| PROTECTED_DIRS.iter().any(|dir| first.as_os_str() == *dir))
}

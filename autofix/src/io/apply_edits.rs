//! Structured edit applier: validated, all-or-nothing full-file replacement.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::error::EditApplyError;
use crate::core::path::{extension_allowed, normalize_relative};
use crate::core::preview::preview_replacement;
use crate::core::types::FileEdit;

const PREVIEW_MAX_LINES: usize = 40;

/// Result of a successful batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdits {
    /// Absolute paths in record order, deduplicated.
    pub changed_paths: Vec<PathBuf>,
}

/// A validated record ready to write.
struct PlannedWrite<'a> {
    index: usize,
    target: PathBuf,
    content: &'a str,
}

/// Content a file had before the batch touched it.
struct Backup {
    target: PathBuf,
    previous: Option<Vec<u8>>,
    /// Directories the write created, deepest first.
    created_dirs: Vec<PathBuf>,
}

/// Validate every record, then write them all.
///
/// Nothing is written unless every record passes validation. If a write
/// fails, files already written are restored (or removed when new) before
/// the error is returned.
#[instrument(skip_all, fields(records = edits.len()))]
pub fn apply_file_edits(
    root: &Path,
    edits: &[FileEdit],
    allowed_extensions: &BTreeSet<String>,
) -> Result<AppliedEdits, EditApplyError> {
    let canonical_root = root.canonicalize().map_err(|source| EditApplyError::WriteFailure {
        index: 0,
        path: root.to_path_buf(),
        source,
    })?;

    let mut planned = Vec::with_capacity(edits.len());
    for (index, edit) in edits.iter().enumerate() {
        let target = validate_record(&canonical_root, index, edit, allowed_extensions)?;
        planned.push(PlannedWrite {
            index,
            target,
            content: &edit.content,
        });
    }

    let mut backups: Vec<Backup> = Vec::new();
    for write in &planned {
        if let Err(source) = write_one(write, &mut backups) {
            warn!(
                index = write.index,
                path = %write.target.display(),
                err = %source,
                "write failed, rolling back batch"
            );
            rollback(&backups);
            return Err(EditApplyError::WriteFailure {
                index: write.index,
                path: write.target.clone(),
                source,
            });
        }
    }

    let mut changed_paths: Vec<PathBuf> = Vec::new();
    for write in planned {
        if !changed_paths.contains(&write.target) {
            changed_paths.push(write.target);
        }
    }
    info!(files = changed_paths.len(), "structured edits applied");
    Ok(AppliedEdits { changed_paths })
}

fn validate_record(
    canonical_root: &Path,
    index: usize,
    edit: &FileEdit,
    allowed_extensions: &BTreeSet<String>,
) -> Result<PathBuf, EditApplyError> {
    let unsafe_path = |reason: String| EditApplyError::UnsafePath {
        index,
        path: edit.path.clone(),
        reason,
    };

    let relative = normalize_relative(&edit.path).map_err(unsafe_path)?;
    let target = resolve_inside(canonical_root, &relative).map_err(unsafe_path)?;

    if !extension_allowed(&relative, allowed_extensions) {
        return Err(EditApplyError::DisallowedExtension {
            index,
            path: edit.path.clone(),
        });
    }
    if edit.content.is_empty() {
        return Err(EditApplyError::EmptyContent {
            index,
            path: edit.path.clone(),
        });
    }
    Ok(target)
}

/// Join `relative` onto the root, refusing symlinked components and anything
/// that does not stay strictly inside the root once existing parts resolve.
fn resolve_inside(canonical_root: &Path, relative: &Path) -> Result<PathBuf, String> {
    let mut current = canonical_root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(format!("{} is a symlink", current.display()));
            }
            Ok(meta) if meta.is_dir() && current.as_path() != canonical_root => {
                let resolved = current
                    .canonicalize()
                    .map_err(|err| format!("resolve {}: {err}", current.display()))?;
                if !resolved.starts_with(canonical_root) {
                    return Err("path escapes the repository root".to_string());
                }
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(format!("inspect {}: {err}", current.display())),
        }
    }
    if current == canonical_root || !current.starts_with(canonical_root) {
        return Err("path does not name a file inside the repository".to_string());
    }
    if current.is_dir() {
        return Err("path names a directory".to_string());
    }
    Ok(current)
}

fn write_one(write: &PlannedWrite<'_>, backups: &mut Vec<Backup>) -> io::Result<()> {
    let previous = match fs::read(&write.target) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err),
    };

    let old_text = previous
        .as_deref()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    let preview = preview_replacement(&old_text, write.content, PREVIEW_MAX_LINES);
    debug!(
        path = %write.target.display(),
        created = previous.is_none(),
        "replacing file\n{preview}"
    );

    // Only the first write of a path records a backup; later duplicates must
    // roll back to the pre-batch content.
    let parent = write.target.parent();
    if !backups.iter().any(|b| b.target == write.target) {
        backups.push(Backup {
            target: write.target.clone(),
            previous,
            created_dirs: parent.map(missing_dirs).unwrap_or_default(),
        });
    }

    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }
    fs::write(&write.target, write.content)
}

/// `dir` and those of its ancestors that do not exist yet, deepest first.
fn missing_dirs(dir: &Path) -> Vec<PathBuf> {
    dir.ancestors()
        .take_while(|ancestor| !ancestor.as_os_str().is_empty() && !ancestor.exists())
        .map(Path::to_path_buf)
        .collect()
}

fn rollback(backups: &[Backup]) {
    for backup in backups.iter().rev() {
        let restored = match &backup.previous {
            Some(bytes) => fs::write(&backup.target, bytes),
            None => match fs::remove_file(&backup.target) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(err) = restored {
            warn!(path = %backup.target.display(), err = %err, "rollback failed");
        }
        for dir in &backup.created_dirs {
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %dir.display(), err = %err, "created directory left behind");
                    break;
                }
            }
        }
    }
}

/// Paths relative to `root`, for logs and commit bookkeeping.
pub fn relative_paths(root: &Path, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let canonical_root = root
        .canonicalize()
        .with_context(|| format!("canonicalize {}", root.display()))?;
    Ok(paths
        .iter()
        .map(|path| {
            path.strip_prefix(&canonical_root)
                .or_else(|_| path.strip_prefix(root))
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EditAction;
    use crate::test_support::TestRepo;

    fn edit(path: &str, content: &str) -> FileEdit {
        FileEdit {
            path: path.to_string(),
            action: EditAction::Replace,
            content: content.to_string(),
        }
    }

    fn allowed() -> BTreeSet<String> {
        ["txt", "java"].map(str::to_string).into_iter().collect()
    }

    /// Verifies a single replacement writes exactly the content and reports the path.
    #[test]
    fn replaces_file_content_exactly() {
        let repo = TestRepo::new();
        let applied =
            apply_file_edits(repo.path(), &[edit("A.txt", "hello\n")], &allowed()).expect("apply");
        assert_eq!(repo.read("A.txt"), "hello\n");
        let rel = relative_paths(repo.path(), &applied.changed_paths).expect("relative");
        assert_eq!(rel, vec![PathBuf::from("A.txt")]);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let repo = TestRepo::new();
        apply_file_edits(
            repo.path(),
            &[edit("src/main/java/App.java", "class App {}\n")],
            &allowed(),
        )
        .expect("apply");
        assert_eq!(repo.read("src/main/java/App.java"), "class App {}\n");
    }

    /// Verifies one bad record rejects the whole batch before any write.
    #[test]
    fn unsafe_path_rejects_whole_batch() {
        let repo = TestRepo::new();
        let before = repo.status();
        let err = apply_file_edits(
            repo.path(),
            &[edit("A.txt", "changed\n"), edit("../escape.txt", "x\n")],
            &allowed(),
        )
        .unwrap_err();
        assert!(matches!(err, EditApplyError::UnsafePath { index: 1, .. }));
        assert_eq!(repo.read("A.txt"), "initial\n");
        assert_eq!(repo.status(), before);
    }

    #[test]
    fn empty_content_rejects_whole_batch() {
        let repo = TestRepo::new();
        let err = apply_file_edits(
            repo.path(),
            &[edit("A.txt", "changed\n"), edit("B.txt", "")],
            &allowed(),
        )
        .unwrap_err();
        assert!(matches!(err, EditApplyError::EmptyContent { index: 1, .. }));
        assert_eq!(repo.read("A.txt"), "initial\n");
        assert!(!repo.abs("B.txt").exists());
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let repo = TestRepo::new();
        let err = apply_file_edits(repo.path(), &[edit("run.sh", "echo hi\n")], &allowed())
            .unwrap_err();
        assert!(matches!(err, EditApplyError::DisallowedExtension { index: 0, .. }));
    }

    #[test]
    fn git_directory_is_protected() {
        let repo = TestRepo::new();
        let err =
            apply_file_edits(repo.path(), &[edit(".git/hooks.txt", "x\n")], &allowed())
                .unwrap_err();
        assert!(err.is_validation());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_rejected() {
        let repo = TestRepo::new();
        let outside = tempfile::tempdir().expect("outside");
        std::os::unix::fs::symlink(outside.path(), repo.abs("link")).expect("symlink");
        let err = apply_file_edits(repo.path(), &[edit("link/evil.txt", "x\n")], &allowed())
            .unwrap_err();
        assert!(matches!(err, EditApplyError::UnsafePath { .. }));
        assert!(!outside.path().join("evil.txt").exists());
    }

    /// Verifies a mid-batch write failure restores files already written.
    #[test]
    fn write_failure_rolls_back_earlier_records() {
        let repo = TestRepo::new();
        repo.write("F.txt", "file\n");
        repo.commit_all("add F");
        // `F.txt` is a file, so creating `F.txt/` as a directory fails.
        let err = apply_file_edits(
            repo.path(),
            &[
                edit("A.txt", "changed\n"),
                edit("New.txt", "new\n"),
                edit("F.txt/G.txt", "x\n"),
            ],
            &allowed(),
        )
        .unwrap_err();
        assert!(matches!(err, EditApplyError::WriteFailure { index: 2, .. }));
        assert!(!err.is_validation());
        assert_eq!(repo.read("A.txt"), "initial\n");
        assert!(!repo.abs("New.txt").exists());
        assert_eq!(repo.read("F.txt"), "file\n");
    }

    #[test]
    fn rollback_removes_directories_the_batch_created() {
        let repo = TestRepo::new();
        repo.write("F.txt", "file\n");
        repo.write("keep/Old.txt", "old\n");
        repo.commit_all("add F and keep");
        let err = apply_file_edits(
            repo.path(),
            &[
                edit("pkg/sub/New.java", "class New {}\n"),
                edit("keep/inner/New.txt", "new\n"),
                edit("F.txt/G.txt", "x\n"),
            ],
            &allowed(),
        )
        .unwrap_err();
        assert!(matches!(err, EditApplyError::WriteFailure { index: 2, .. }));
        assert!(!repo.abs("pkg").exists());
        assert!(!repo.abs("keep/inner").exists());
        assert_eq!(repo.read("keep/Old.txt"), "old\n");
        assert!(repo.status().is_empty());
    }

    #[test]
    fn duplicate_paths_are_reported_once() {
        let repo = TestRepo::new();
        let applied = apply_file_edits(
            repo.path(),
            &[edit("A.txt", "one\n"), edit("B.txt", "b\n"), edit("./A.txt", "two\n")],
            &allowed(),
        )
        .expect("apply");
        assert_eq!(applied.changed_paths.len(), 2);
        assert_eq!(repo.read("A.txt"), "two\n");
    }
}

//! Git adapter for the repair engine.
//!
//! Every repository mutation outside the structured applier goes through
//! these `git` subprocess calls, so each primitive is a single, individually
//! checkable invocation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of one `git apply` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRun {
    pub success: bool,
    /// Diagnostic text (stderr, falling back to stdout).
    pub diagnostics: String,
}

/// Committer identity passed with `-c user.name=... -c user.email=...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    identity: Option<Identity>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            identity: None,
        }
    }

    /// Commit as `identity` instead of the repository's configured user.
    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if the working directory is inside a git work tree.
    pub fn is_work_tree(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true")
    }

    /// True once the repository has at least one commit.
    pub fn has_head(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(out.status.success())
    }

    /// Return the current HEAD short SHA (stable given repo state).
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Resolve a path inside the git directory (handles worktrees).
    pub fn git_path(&self, name: &str) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--git-path", name])?;
        let path = PathBuf::from(out.trim());
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.workdir.join(path))
        }
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Paths with unmerged (conflicted) index entries.
    pub fn unmerged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only", "--diff-filter=U"])?;
        let mut paths: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        paths.dedup();
        Ok(paths)
    }

    /// Untracked paths matching `pathspec`, ignored ones included.
    pub fn untracked_files(&self, pathspec: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files", "--others", "-z", "--", pathspec])?;
        Ok(out
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// True while a merge is in progress (`MERGE_HEAD` exists).
    pub fn merge_in_progress(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--quiet", "--verify", "MERGE_HEAD"])?;
        Ok(out.status.success())
    }

    #[instrument(skip_all)]
    pub fn merge_abort(&self) -> Result<()> {
        debug!("aborting in-progress merge");
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    /// Reset index and working tree to HEAD.
    #[instrument(skip_all)]
    pub fn reset_hard(&self) -> Result<()> {
        debug!("hard reset to HEAD");
        self.run_checked(&["reset", "--hard", "--quiet", "HEAD"])?;
        Ok(())
    }

    /// Remove untracked files and directories (ignored files are kept).
    #[instrument(skip_all)]
    pub fn clean_untracked(&self) -> Result<()> {
        debug!("removing untracked files");
        self.run_checked(&["clean", "-f", "-d", "--quiet"])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        let mut args: Vec<String> = Vec::new();
        if let Some(identity) = &self.identity {
            args.push("-c".to_string());
            args.push(format!("user.name={}", identity.name));
            args.push("-c".to_string());
            args.push(format!("user.email={}", identity.email));
        }
        args.extend(["commit", "--quiet", "-m", message].map(str::to_string));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args)?;
        Ok(true)
    }

    /// Feed `patch` to `git apply` with the given flags.
    ///
    /// A non-zero exit is reported in the returned value, not as an error;
    /// only failing to run git at all is an error.
    #[instrument(skip_all, fields(flags = %flags.join(" ")))]
    pub fn apply(&self, patch: &str, flags: &[&str]) -> Result<ApplyRun> {
        let mut args = vec!["apply"];
        args.extend_from_slice(flags);
        let output = self.run_with_stdin(&args, patch.as_bytes())?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostics = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "git apply failed");
        }
        Ok(ApplyRun {
            success: output.status.success(),
            diagnostics,
        })
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }

    fn run_with_stdin(&self, args: &[&str], input: &[u8]) -> Result<Output> {
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            stdin
                .write_all(input)
                .with_context(|| format!("write stdin for git {}", args.join(" ")))?;
        }
        child
            .wait_with_output()
            .with_context(|| format!("wait for git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: unquote(path.trim()),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry {
        code,
        path: unquote(&path),
    })
}

/// Porcelain quotes paths containing spaces or special characters.
fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "src/main.rs");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn parses_quoted_path() {
        let e = parse_status_line("?? \"with space.txt\"").expect("parse");
        assert_eq!(e.path, "with space.txt");
    }

    #[test]
    fn plain_directory_is_not_a_work_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        assert!(!git.is_work_tree().expect("rev-parse"));
    }
}

//! Test-only helpers: scratch git repositories and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::BuildResult;
use crate::io::git::Git;
use crate::io::oracle::BuildOracle;
use crate::io::transport::{ModelCall, ModelTransport};

/// Git repository in a temp dir with one commit containing `A.txt = "initial\n"`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Self { dir };
        repo.git_cmd(&["init", "--quiet"]);
        repo.git_cmd(&["config", "user.name", "Test User"]);
        repo.git_cmd(&["config", "user.email", "test@example.com"]);
        repo.git_cmd(&["config", "commit.gpgsign", "false"]);
        repo.write("A.txt", "initial\n");
        repo.commit_all("initial");
        repo
    }

    /// Empty `git init` repository with no commits.
    pub fn without_commits() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Self { dir };
        repo.git_cmd(&["init", "--quiet"]);
        repo.git_cmd(&["config", "user.name", "Test User"]);
        repo.git_cmd(&["config", "user.email", "test@example.com"]);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path())
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        self.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.abs(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.abs(rel)).expect("read file")
    }

    pub fn commit_all(&self, message: &str) {
        self.git_cmd(&["add", "-A"]);
        self.git_cmd(&["commit", "--quiet", "-m", message]);
    }

    pub fn head(&self) -> String {
        self.git_cmd(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Commit subjects, newest first.
    pub fn log_subjects(&self) -> Vec<String> {
        self.git_cmd(&["log", "--format=%s"])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `git status --porcelain` output, for "tree unchanged" assertions.
    pub fn status(&self) -> String {
        self.git_cmd(&["status", "--porcelain=v1", "-uall"])
    }

    /// Run git and report whether it succeeded, for commands expected to fail.
    pub fn git_succeeds(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .expect("spawn git")
            .status
            .success()
    }

    /// Run git, assert success, and return stdout.
    pub fn git_cmd(&self, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .expect("spawn git");
        assert!(
            out.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).into_owned()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport that returns scripted responses in order and records each call.
///
/// `Err` entries simulate transport failures. Running out of script is an
/// error too, so an unexpected extra call fails loudly.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: RefCell<VecDeque<Result<String, String>>>,
    calls: RefCell<Vec<ModelCall>>,
}

impl ScriptedTransport {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn push_failure(&self, message: &str) {
        self.responses
            .borrow_mut()
            .push_back(Err(message.to_string()));
    }

    pub fn push_response(&self, response: &str) {
        self.responses
            .borrow_mut()
            .push_back(Ok(response.to_string()));
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl ModelTransport for ScriptedTransport {
    fn call_model(&self, call: &ModelCall) -> Result<String> {
        self.calls.borrow_mut().push(call.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted transport has no response left")),
        }
    }
}

/// Oracle returning scripted build results in order; the last one repeats.
pub struct ScriptedOracle {
    results: RefCell<VecDeque<BuildResult>>,
    runs: RefCell<usize>,
}

impl ScriptedOracle {
    pub fn new(results: Vec<BuildResult>) -> Self {
        assert!(!results.is_empty(), "scripted oracle needs at least one result");
        Self {
            results: RefCell::new(results.into()),
            runs: RefCell::new(0),
        }
    }

    /// `failures` failing builds followed by a passing one.
    pub fn failing_then_green(failures: usize) -> Self {
        let mut results: Vec<BuildResult> = (1..=failures).map(failing_build).collect();
        results.push(passing_build());
        Self::new(results)
    }

    pub fn always_failing() -> Self {
        Self::new(vec![failing_build(1)])
    }

    pub fn runs(&self) -> usize {
        *self.runs.borrow()
    }
}

impl BuildOracle for ScriptedOracle {
    fn run_build(&self) -> Result<BuildResult> {
        *self.runs.borrow_mut() += 1;
        let mut results = self.results.borrow_mut();
        let result = if results.len() > 1 {
            results.pop_front()
        } else {
            results.front().cloned()
        };
        result.ok_or_else(|| anyhow!("scripted oracle is empty"))
    }
}

pub fn passing_build() -> BuildResult {
    BuildResult {
        exit_status: Some(0),
        stdout: "BUILD SUCCESSFUL\n".to_string(),
        stderr: String::new(),
        timed_out: false,
    }
}

/// Failing build whose output names `src/Main.java` and carries `n`.
pub fn failing_build(n: usize) -> BuildResult {
    BuildResult {
        exit_status: Some(1),
        stdout: "> Task :compileJava FAILED\n".to_string(),
        stderr: format!("src/Main.java:{n}: error: cannot find symbol\n"),
        timed_out: false,
    }
}

/// Structured edit response replacing one file.
pub fn edits_response(path: &str, content: &str) -> String {
    serde_json::json!({
        "edits": [{"path": path, "action": "replace", "content": content}]
    })
    .to_string()
}

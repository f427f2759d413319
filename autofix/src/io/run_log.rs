//! Run log under `.autofix/runs/<run-id>/<cycle>/`.
//!
//! Product artifacts for post-mortem inspection: every prompt and raw
//! response, build output and a `meta.json` per cycle. Written regardless of
//! `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{BuildResult, RequestKind, Strictness};
use crate::io::init::AutofixPaths;
use crate::io::prompt::RenderedPrompt;

/// One model attempt as recorded in `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub number: usize,
    pub model: String,
    pub strictness: Strictness,
    /// `ok (<shape>)`, or the transport/sanitize failure text.
    pub result: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleMeta {
    pub run_id: String,
    pub cycle: String,
    pub kind: Option<RequestKind>,
    pub attempts: Vec<AttemptRecord>,
    pub apply: Option<String>,
    pub commit: Option<String>,
    pub build_exit_status: Option<i32>,
    pub build_timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
}

impl RunLog {
    /// Create a fresh run directory named `run-<head>`, suffixed `-2`, `-3`...
    /// when that name is taken.
    pub fn create(paths: &AutofixPaths, head_short_sha: &str) -> Result<Self> {
        fs::create_dir_all(&paths.runs_dir)
            .with_context(|| format!("create runs dir {}", paths.runs_dir.display()))?;
        let base = format!("run-{head_short_sha}");
        let mut run_id = base.clone();
        let mut suffix = 2u32;
        while paths.runs_dir.join(&run_id).exists() {
            run_id = format!("{base}-{suffix}");
            suffix += 1;
        }
        let dir = paths.runs_dir.join(&run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(Self { run_id, dir })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory for one cycle (`baseline`, `change`, `fix-1`, ...).
    pub fn cycle(&self, name: &str) -> Result<CycleLog> {
        let dir = self.dir.join(name);
        fs::create_dir_all(&dir).with_context(|| format!("create cycle dir {}", dir.display()))?;
        Ok(CycleLog {
            dir,
            meta: CycleMeta {
                run_id: self.run_id.clone(),
                cycle: name.to_string(),
                ..CycleMeta::default()
            },
        })
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf> {
        let path = self.dir.join("summary.json");
        write_json(&path, summary)?;
        Ok(path)
    }
}

/// Artifacts of one cycle. `meta.json` is rewritten on every `flush`.
#[derive(Debug, Clone)]
pub struct CycleLog {
    dir: PathBuf,
    pub meta: CycleMeta,
}

impl CycleLog {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_prompt(&self, attempt: usize, prompt: &RenderedPrompt) -> Result<()> {
        let body = format!(
            "<!-- system -->\n{}\n\n<!-- user -->\n{}",
            prompt.system, prompt.user
        );
        write_text(&self.dir.join(format!("prompt-{attempt}.md")), &body)
    }

    pub fn write_response(&self, attempt: usize, response: &str) -> Result<()> {
        write_text(&self.dir.join(format!("response-{attempt}.txt")), response)
    }

    pub fn write_build(&mut self, build: &BuildResult) -> Result<()> {
        self.meta.build_exit_status = build.exit_status;
        self.meta.build_timed_out = build.timed_out;
        write_text(&self.dir.join("build.log"), &build.combined_output())
    }

    pub fn flush(&self) -> Result<()> {
        write_json(&self.dir.join("meta.json"), &self.meta)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

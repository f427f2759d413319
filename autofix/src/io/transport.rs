//! Model transport abstraction.
//!
//! The [`ModelTransport`] trait decouples the request controller from the
//! model backend. [`CommandTransport`] drives a CLI agent (by default
//! `codex exec`); tests use scripted transports that return canned responses.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{command_from_argv, run_command_with_timeout};

/// One model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCall {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model_id: String,
    /// Reasoning effort hint passed through to the backend.
    pub effort_hint: String,
}

/// Abstraction over model backends. Any error counts as a failed attempt.
pub trait ModelTransport {
    fn call_model(&self, call: &ModelCall) -> Result<String>;
}

const MODEL_PLACEHOLDER: &str = "{model}";
const EFFORT_PLACEHOLDER: &str = "{effort}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Transport that runs a configured command per call.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandTransport {
    fn uses_output_file(&self) -> bool {
        self.argv.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER))
    }
}

impl ModelTransport for CommandTransport {
    #[instrument(skip_all, fields(model = %call.model_id, effort = %call.effort_hint))]
    fn call_model(&self, call: &ModelCall) -> Result<String> {
        let output_dir = tempfile::tempdir().context("create model output dir")?;
        let output_path = output_dir.path().join("response.txt");
        let output_arg = output_path.to_string_lossy().into_owned();

        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| {
                arg.replace(MODEL_PLACEHOLDER, &call.model_id)
                    .replace(EFFORT_PLACEHOLDER, &call.effort_hint)
                    .replace(OUTPUT_PLACEHOLDER, &output_arg)
            })
            .collect();
        let cmd = command_from_argv(&argv, &self.workdir).context("model.command")?;
        let program = &argv[0];

        let stdin = format!("{}\n\n{}", call.system_prompt.trim_end(), call.user_prompt);
        let output = run_command_with_timeout(
            cmd,
            Some(stdin.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command `{program}`"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model call timed out");
            return Err(anyhow!("model call timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }

        let response = if self.uses_output_file() {
            fs::read_to_string(&output_path)
                .with_context(|| format!("read model output {}", output_path.display()))?
        } else {
            output.stdout_lossy()
        };
        debug!(bytes = response.len(), "model responded");
        if response.trim().is_empty() {
            return Err(anyhow!("model returned an empty response"));
        }
        Ok(response)
    }
}

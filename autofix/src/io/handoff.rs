//! Post-success handoff hook: an optional command run after a green build.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Run `argv` in `workdir`. An empty command is a no-op that returns `Ok(false)`.
#[instrument(skip_all, fields(command = %argv.join(" ")))]
pub fn run_handoff(
    argv: &[String],
    workdir: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<bool> {
    if argv.is_empty() {
        return Ok(false);
    }
    let cmd = command_from_argv(argv, workdir)?;
    let output = run_command_with_timeout(cmd, None, timeout, output_limit_bytes)
        .with_context(|| format!("run handoff command `{}`", argv.join(" ")))?;
    if output.timed_out || !output.status.success() {
        warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "handoff failed");
        return Err(anyhow!(
            "handoff command failed with status {:?}: {}",
            output.status.code(),
            output.stderr_lossy().trim()
        ));
    }
    info!("handoff completed");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn empty_command_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!run_handoff(&[], temp.path(), Duration::from_secs(1), 100).expect("skip"));
    }

    #[test]
    fn successful_command_reports_true() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(run_handoff(&sh("touch deployed"), temp.path(), Duration::from_secs(10), 100)
            .expect("run"));
        assert!(temp.path().join("deployed").exists());
    }

    #[test]
    fn failing_command_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = run_handoff(&sh("echo nope >&2; exit 1"), temp.path(), Duration::from_secs(10), 100)
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}

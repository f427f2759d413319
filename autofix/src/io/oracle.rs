//! Build oracle: runs the configured build/test command and reports the result.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::types::BuildResult;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Abstraction over build execution. Tests script results without processes.
pub trait BuildOracle {
    fn run_build(&self) -> Result<BuildResult>;
}

/// Oracle that runs `build.command` in the repository root.
#[derive(Debug, Clone)]
pub struct CommandBuildOracle {
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl BuildOracle for CommandBuildOracle {
    #[instrument(skip_all, fields(command = %self.argv.join(" ")))]
    fn run_build(&self) -> Result<BuildResult> {
        let cmd = command_from_argv(&self.argv, &self.workdir)?;
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run build command `{}`", self.argv.join(" ")))?;

        let result = BuildResult {
            exit_status: output.status.code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: output.timed_out,
        };
        info!(
            exit_code = ?result.exit_status,
            timed_out = result.timed_out,
            success = result.success(),
            "build finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle(script: &str, timeout: Duration) -> (tempfile::TempDir, CommandBuildOracle) {
        let temp = tempfile::tempdir().expect("tempdir");
        let oracle = CommandBuildOracle {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: temp.path().to_path_buf(),
            timeout,
            output_limit_bytes: 10_000,
        };
        (temp, oracle)
    }

    #[test]
    fn passing_build_is_success() {
        let (_temp, oracle) = oracle("echo ok", Duration::from_secs(10));
        let result = oracle.run_build().expect("build");
        assert!(result.success());
        assert_eq!(result.stdout, "ok\n");
    }

    #[test]
    fn failing_build_keeps_output_verbatim() {
        let (_temp, oracle) = oracle(
            "echo 'Compiling'; echo 'A.java:3: error: missing ;' >&2; exit 1",
            Duration::from_secs(10),
        );
        let result = oracle.run_build().expect("build");
        assert!(!result.success());
        assert_eq!(result.exit_status, Some(1));
        assert_eq!(
            result.combined_output(),
            "Compiling\nA.java:3: error: missing ;\n"
        );
    }

    #[test]
    fn build_runs_in_workdir() {
        let (temp, oracle) = oracle("test -f marker", Duration::from_secs(10));
        assert!(!oracle.run_build().expect("build").success());
        std::fs::write(temp.path().join("marker"), "").expect("write marker");
        assert!(oracle.run_build().expect("build").success());
    }

    #[test]
    fn timed_out_build_fails() {
        let (_temp, oracle) = oracle("sleep 5", Duration::from_millis(200));
        let result = oracle.run_build().expect("build");
        assert!(result.timed_out);
        assert!(!result.success());
    }
}

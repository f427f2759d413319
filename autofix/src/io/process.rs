//! Child process execution with a timeout and bounded output capture.
//!
//! Shared by the build oracle, the model transport and the handoff hook.

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the capture limit, per stream.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        push_truncation_notice(&mut text, "stdout", self.stdout_truncated);
        text
    }

    pub fn stderr_lossy(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).into_owned();
        push_truncation_notice(&mut text, "stderr", self.stderr_truncated);
        text
    }
}

fn push_truncation_notice(text: &mut String, label: &str, truncated: usize) {
    if truncated > 0 {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("[{label} truncated {truncated} bytes]\n"));
    }
}

/// Build a `Command` from an argv vector, running in `workdir`.
pub fn command_from_argv(argv: &[String], workdir: &Path) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(workdir);
    Ok(cmd)
}

/// How long to keep draining output after the child has exited. A
/// grandchild that inherited the pipes can hold them open indefinitely.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Run a command with a timeout, capturing stdout/stderr without pipe deadlocks.
///
/// Input is fed and both streams are drained on their own threads, so the
/// timeout covers a child that never reads its stdin. Bytes past
/// `output_limit_bytes` are counted and dropped. A timed-out child is killed
/// and reported with `timed_out = true` rather than as an error. Output still
/// arriving `OUTPUT_GRACE` after the child exits is abandoned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Detached: the pipe breaks once the child exits or is killed.
        thread::spawn(move || {
            if let Err(err) = child_stdin.write_all(&input) {
                warn!(err = %err, "child closed stdin before reading all input");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = Instant::now() + OUTPUT_GRACE;
    let (stdout, stdout_truncated) = stdout_reader.finish(deadline).context("read stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish(deadline).context("read stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// Drains one stream on its own thread into a shared buffer, so whatever
/// arrived can be taken even if the stream never closes.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: Receiver<io::Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&captured);
        thread::spawn(move || {
            let _ = tx.send(read_stream_limited(reader, limit, &sink));
        });
        Self { captured, done }
    }

    /// Wait for end of stream until `deadline`, then take what was captured.
    fn finish(self, deadline: Instant) -> Result<(Vec<u8>, usize)> {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(wait) {
            Ok(result) => result.context("read output")?,
            Err(RecvTimeoutError::Timeout) => {
                warn!("output stream still open after exit, abandoning it");
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
        let mut captured = self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let bytes = std::mem::take(&mut captured.bytes);
        Ok((bytes, captured.truncated))
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Captured>,
) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }
}

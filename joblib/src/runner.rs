//! Bounded invocation of the external dumper.
//!
//! The dumper is spawned directly from an argument vector, never through a shell, so the
//! caller-supplied `key` always stays a single literal argument. Its stdout and stderr are
//! pumped by two reader tasks into one channel, and the runner collects them while racing
//! the child's exit against the wall-clock deadline.

use crate::error::{Error, Result};
use crate::events::{JobStatus, Output};
use crate::types::{Args, Dir, OutputBlob, Program};
use bytes::BytesMut;
use serde::Deserialize;
use std::{
    ffi::OsString,
    fmt,
    os::unix::process::ExitStatusExt,
    path::Path,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    select,
    sync::mpsc,
    time,
};
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 20 * 1024 * 1024;

/// Upper bound on reading leftover output once the deadline has passed.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// The program (plus any fixed leading arguments) that implements the dumper.
///
/// Job arguments are appended after `args`: `<program> [args..] <input> <output> [key] [placeId]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: Program,
    pub args: Args,
    pub dir: Option<Dir>,
}

impl ToolCommand {
    pub fn new(program: impl Into<Program>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<Dir>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

impl Default for ToolCommand {
    fn default() -> Self {
        Self::new("lua5.3").arg("dumper.lua")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock budget. The child gets SIGKILL once it is spent.
    pub timeout: Duration,
    /// Cap on stdout + stderr combined.
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Place id as received from the client. Passed through unvalidated.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PlaceId {
    Number(serde_json::Number),
    Text(String),
}

impl PlaceId {
    /// Zero and the empty string count as "not given".
    pub fn is_set(&self) -> bool {
        match self {
            PlaceId::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
            PlaceId::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceId::Number(n) => write!(f, "{}", n),
            PlaceId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobOptions {
    pub key: Option<String>,
    pub place_id: Option<PlaceId>,
}

/// What one dumper process left behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: JobStatus,
    /// Set whenever the process did not exit cleanly with code 0.
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Clone, Debug, Default)]
pub struct Runner {
    tool: ToolCommand,
    limits: Limits,
}

impl Runner {
    pub fn new(tool: ToolCommand, limits: Limits) -> Self {
        Self { tool, limits }
    }

    /// Argument vector handed to the dumper program.
    pub fn build_args(&self, input: &Path, output: &Path, options: &JobOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.tool.args.iter().map(OsString::from).collect();
        args.push(input.into());
        args.push(output.into());
        if let Some(key) = options.key.as_deref().filter(|key| !key.is_empty()) {
            args.push(key.into());
        }
        if let Some(place_id) = options.place_id.as_ref().filter(|id| id.is_set()) {
            args.push(place_id.to_string().into());
        }
        args
    }

    /// Run the dumper to completion, to its deadline, or until it floods the output cap.
    ///
    /// A timeout or a failing exit is not an error here: the result carries the status and
    /// whatever output was captured. Errors are reserved for spawn/wait failures and for
    /// output over `max_output_bytes`.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        options: &JobOptions,
    ) -> Result<ExecutionResult> {
        let mut command = Command::new(&self.tool.program);
        command
            .args(self.build_args(input, output, options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.tool.dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(Error::Spawn)?;
        debug!(pid = ?child.id(), program = %self.tool.program, "dumper spawned");

        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            pipe(stdout, output_tx.clone(), Output::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            pipe(stderr, output_tx, Output::Stderr);
        }

        let mut captured = Captured::new(self.limits.max_output_bytes);
        let mut exit_status = None;
        let mut output_open = true;
        let deadline = time::sleep(self.limits.timeout);
        tokio::pin!(deadline);

        while exit_status.is_none() || output_open {
            let pushed = select! {
                maybe_output = output_rx.recv(), if output_open => {
                    match maybe_output {
                        Some(output) => captured.push(output),
                        None => {
                            output_open = false;
                            Ok(())
                        }
                    }
                }
                status = child.wait(), if exit_status.is_none() => {
                    exit_status = Some(status.map_err(Error::Wait)?);
                    Ok(())
                }
                _ = &mut deadline => break,
            };
            if let Err(err) = pushed {
                let _ = child.kill().await;
                warn!(limit = self.limits.max_output_bytes, "dumper output over limit, killed");
                return Err(err);
            }
        }

        let status = match exit_status {
            Some(exit_status) => job_status(exit_status),
            None => {
                // deadline hit while the child was still running
                let _ = child.kill().await;
                JobStatus::TimedOut
            }
        };
        if output_open {
            // pipes may still be held by the dying child or a stray grandchild
            let drain = async {
                while let Some(output) = output_rx.recv().await {
                    captured.push(output)?;
                }
                Ok::<(), Error>(())
            };
            if let Ok(pushed) = time::timeout(DRAIN_GRACE, drain).await {
                pushed?;
            }
        }

        let error = match status {
            JobStatus::TimedOut => Some(format!(
                "dumper timed out after {}s",
                self.limits.timeout.as_secs_f64()
            )),
            status if !status.success() => Some(format!("dumper {}", status)),
            _ => None,
        };
        debug!(%status, elapsed_ms = started.elapsed().as_millis() as u64, "dumper finished");

        let (stdout, stderr) = captured.into_strings();
        Ok(ExecutionResult {
            status,
            error,
            stdout,
            stderr,
        })
    }
}

/// Stdout/stderr collected so far, bounded by a combined byte limit.
struct Captured {
    stdout: BytesMut,
    stderr: BytesMut,
    limit: usize,
}

impl Captured {
    fn new(limit: usize) -> Self {
        Self {
            stdout: BytesMut::new(),
            stderr: BytesMut::new(),
            limit,
        }
    }

    fn push(&mut self, output: Output) -> Result<()> {
        match output {
            Output::Stdout(blob) => self.stdout.extend_from_slice(&blob),
            Output::Stderr(blob) => self.stderr.extend_from_slice(&blob),
        }
        if self.stdout.len() + self.stderr.len() > self.limit {
            return Err(Error::OutputLimitExceeded { limit: self.limit });
        }
        Ok(())
    }

    fn into_strings(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}

/// Forward everything read from `reader` into `output_tx` until EOF or until the collector hangs up.
fn pipe<R>(mut reader: R, output_tx: mpsc::UnboundedSender<Output>, wrap: fn(OutputBlob) -> Output)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match reader.read_buf(&mut buf).await {
                Ok(n) if n > 0 => {
                    // move the bytes out of buf and into a message
                    if output_tx.send(wrap(buf.split().freeze())).is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    });
}

fn job_status(exit_status: ExitStatus) -> JobStatus {
    match (exit_status.code(), exit_status.signal()) {
        (Some(code), _) => JobStatus::Exited { code },
        (None, Some(signal)) => JobStatus::Killed { signal },
        (None, None) => unreachable!("a reaped child either exits or is signalled"),
    }
}

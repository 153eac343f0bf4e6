//! Action that runs an external program.
//!
//! The child is polled rather than waited on, so a lost lease or a timeout
//! can kill it.

use crate::background_jobs::{
    context::ActionContext,
    job::{JobAction, JobError},
};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Tail of stderr kept in the error message of a failed run.
const STDERR_TAIL_BYTES: usize = 512;
/// How long a failed run waits for the rest of stderr after the child exits.
const STDERR_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ShellCommandAction {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ShellCommandAction {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from a single command line, split with shell quoting rules.
    pub fn from_command_line(command_line: &str, timeout: Option<Duration>) -> Result<Self, JobError> {
        let mut parts = shlex::split(command_line)
            .filter(|parts| !parts.is_empty())
            .ok_or_else(|| {
                JobError::ExecutionFailed(format!("invalid command line: {}", command_line))
            })?;
        let program = parts.remove(0);
        Ok(Self::new(program, parts, timeout))
    }

    fn kill(&self, child: &mut Child) {
        if let Err(e) = child.kill() {
            warn!("Failed to kill {}: {}", self.program, e);
        }
        // Reap so the child does not linger as a zombie
        let _ = child.wait();
    }

    fn wait(&self, child: &mut Child, ctx: &ActionContext) -> Result<ExitStatus, JobError> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => return Err(JobError::ExecutionFailed(e.to_string())),
            }
            if ctx.is_cancelled() {
                self.kill(child);
                return Err(JobError::Cancelled);
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    self.kill(child);
                    return Err(JobError::Timeout(timeout.as_secs()));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl JobAction for ShellCommandAction {
    fn description(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn execute(&self, ctx: &ActionContext) -> Result<(), JobError> {
        debug!("[{}] running {}", ctx.job_id, self.description());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("FLEETCRON_JOB_ID", &ctx.job_id)
            .env("FLEETCRON_ENTRY_ID", ctx.entry_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                JobError::ExecutionFailed(format!("failed to spawn {}: {}", self.program, e))
            })?;

        // Drained on a separate thread so a chatty child cannot fill the pipe
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer);
                let _ = tx.send(buffer);
            });
            rx
        });

        let status = self.wait(&mut child, ctx)?;
        if status.success() {
            return Ok(());
        }

        // A background grandchild can hold the pipe open long after the child
        // exits, so only wait a bounded time for EOF
        let stderr = stderr_reader
            .and_then(|rx| rx.recv_timeout(STDERR_GRACE).ok())
            .unwrap_or_default();
        let tail_start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
        let tail = String::from_utf8_lossy(&stderr[tail_start..]);
        Err(JobError::ExecutionFailed(format!(
            "{} exited with {}: {}",
            self.program,
            status,
            tail.trim()
        )))
    }
}

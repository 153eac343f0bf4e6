use super::context::ActionContext;
use thiserror::Error;

/// Errors an action can report. Recorded as `last_error` on the queue entry.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Action was cancelled")]
    Cancelled,

    #[error("Action timed out after {0}s")]
    Timeout(u64),
}

/// The work behind a job id.
///
/// Actions are executed synchronously on a blocking thread via
/// `spawn_blocking`, while the worker keeps the entry's lease alive.
/// Long-running actions should poll `ctx.is_cancelled()`: it turns true
/// once the worker has lost the lease and another worker may already be
/// running the same job.
pub trait JobAction: Send + Sync {
    /// Short description used in logs.
    fn description(&self) -> String;

    fn execute(&self, ctx: &ActionContext) -> Result<(), JobError>;
}

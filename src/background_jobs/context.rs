use tokio_util::sync::CancellationToken;

/// Context provided to an action while it runs.
#[derive(Clone)]
pub struct ActionContext {
    /// Cancelled when the worker loses the lease on this entry.
    pub cancellation_token: CancellationToken,

    pub job_id: String,

    /// Queue entry being executed.
    pub entry_id: i64,

    /// Number of earlier executions of this entry that lost their lease.
    pub attempts: i64,
}

impl ActionContext {
    pub fn new(
        cancellation_token: CancellationToken,
        job_id: impl Into<String>,
        entry_id: i64,
        attempts: i64,
    ) -> Self {
        Self {
            cancellation_token,
            job_id: job_id.into(),
            entry_id,
            attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

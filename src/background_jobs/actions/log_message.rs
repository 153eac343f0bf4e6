//! Action that only records that it ran.
//!
//! Used as the fallback for job ids without a registered action, and for
//! jobs configured with `kind = "log"`.

use crate::background_jobs::{
    context::ActionContext,
    job::{JobAction, JobError},
};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct LogMessageAction {
    message: Option<String>,
}

impl LogMessageAction {
    pub fn new(message: Option<String>) -> Self {
        Self { message }
    }
}

impl JobAction for LogMessageAction {
    fn description(&self) -> String {
        match &self.message {
            Some(message) => format!("log \"{}\"", message),
            None => "log execution".to_string(),
        }
    }

    fn execute(&self, ctx: &ActionContext) -> Result<(), JobError> {
        match &self.message {
            Some(message) => info!("[{}] {}", ctx.job_id, message),
            None => info!(
                "Executing {} (entry {}, no action registered)",
                ctx.job_id, ctx.entry_id
            ),
        }
        Ok(())
    }
}

//! Scheduler and worker loops, and the actions they execute.
//!
//! The scheduler loop turns due jobs into queue entries while it holds
//! leadership. Worker loops claim those entries and execute the action
//! registered for the job id on a blocking thread.

pub mod actions;
mod context;
mod job;
mod registry;
mod scheduler;
mod worker;

pub use context::ActionContext;
pub use job::{JobAction, JobError};
pub use registry::ActionRegistry;
pub use scheduler::{SchedulerLoop, SchedulerSettings, SchedulerTickReport};
pub use worker::{RunOutcome, WorkerLoop, WorkerSettings, WorkerTick};

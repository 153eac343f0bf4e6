//! Read-only view over job definitions, reloaded every scheduling cycle.

use crate::store::{JobDefinition, JobDefinitionStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct JobRegistry {
    store: Arc<dyn JobDefinitionStore>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobDefinitionStore>) -> Self {
        Self { store }
    }

    /// Fresh snapshot of all job definitions, ordered by id.
    pub fn load_jobs(&self) -> Result<Vec<JobDefinition>> {
        self.store.list_jobs()
    }

    /// Unpaused jobs whose next run time has been reached.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobDefinition>> {
        Ok(self
            .load_jobs()?
            .into_iter()
            .filter(|job| job.is_schedulable(now))
            .collect())
    }
}

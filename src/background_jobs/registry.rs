use super::actions::{LogMessageAction, ShellCommandAction};
use super::job::JobAction;
use crate::config::ActionConfig;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Maps job ids to the action executed for them.
///
/// Job ids without an entry resolve to a placeholder that only logs.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn JobAction>>,
    fallback: Arc<dyn JobAction>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self {
            actions: HashMap::new(),
            fallback: Arc::new(LogMessageAction::default()),
        }
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the `[actions.<job_id>]` config tables.
    pub fn from_config(configs: &HashMap<String, ActionConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (job_id, config) in configs {
            let action: Arc<dyn JobAction> = match config {
                ActionConfig::Log { message } => Arc::new(LogMessageAction::new(message.clone())),
                ActionConfig::Command {
                    program,
                    args,
                    command,
                    timeout_secs,
                } => {
                    let timeout = timeout_secs.map(Duration::from_secs);
                    let action = match (program, command) {
                        (Some(program), None) => {
                            ShellCommandAction::new(program.clone(), args.clone(), timeout)
                        }
                        (None, Some(command)) if args.is_empty() => {
                            ShellCommandAction::from_command_line(command, timeout)
                                .with_context(|| format!("Invalid command for job {}", job_id))?
                        }
                        _ => bail!(
                            "Action for job {} needs either `program` (with optional `args`) or `command`",
                            job_id
                        ),
                    };
                    Arc::new(action)
                }
            };
            registry.register(job_id.clone(), action);
        }
        Ok(registry)
    }

    pub fn register(&mut self, job_id: impl Into<String>, action: Arc<dyn JobAction>) {
        let job_id = job_id.into();
        info!("Registering action for {}: {}", job_id, action.description());
        self.actions.insert(job_id, action);
    }

    pub fn resolve(&self, job_id: &str) -> Arc<dyn JobAction> {
        self.actions
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn is_registered(&self, job_id: &str) -> bool {
        self.actions.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (override CLI and environment)
    pub db_path: Option<String>,
    pub lease_seconds: Option<i64>,
    pub lock_ttl_seconds: Option<i64>,
    pub max_attempts: Option<i64>,
    pub tick_interval_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub poll_jitter_ms: Option<u64>,

    /// Jobs inserted at startup if they do not exist yet.
    pub jobs: Vec<JobSeed>,

    /// Action to run per job id.
    pub actions: HashMap<String, ActionConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct JobSeed {
    pub id: String,
    pub interval_seconds: i64,
    /// Only applied when the job is first created.
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConfig {
    Log {
        #[serde(default)]
        message: Option<String>,
    },
    /// Either `program` with `args`, or a single `command` line.
    Command {
        #[serde(default)]
        program: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        /// Command line, split with shell quoting rules.
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

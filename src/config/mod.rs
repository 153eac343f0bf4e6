mod file_config;

pub use file_config::{ActionConfig, FileConfig, JobSeed};

use crate::background_jobs::{SchedulerSettings, WorkerSettings};
use crate::coordination::QueueSettings;
use crate::store::MAX_INTERVAL_SECONDS;
use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "fleetcron.db";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_POLL_JITTER_MS: u64 = 250;

/// CLI arguments (and their environment fallbacks) used for config resolution.
/// This struct mirrors the values that can be overridden by the TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: PathBuf,
    pub lease_seconds: i64,
    pub lock_ttl_seconds: i64,
    pub max_attempts: i64,
    pub tick_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub poll_jitter_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            lease_seconds: crate::coordination::DEFAULT_LEASE_SECONDS,
            lock_ttl_seconds: crate::coordination::DEFAULT_LOCK_TTL_SECONDS,
            max_attempts: crate::coordination::DEFAULT_MAX_ATTEMPTS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            poll_jitter_ms: DEFAULT_POLL_JITTER_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub lock_ttl: chrono::Duration,
    pub queue: QueueSettings,
    pub scheduler: SchedulerSettings,
    pub worker: WorkerSettings,
    pub jobs: Vec<JobSeed>,
    pub actions: HashMap<String, ActionConfig>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.db_path.clone());
        let lease_seconds = file.lease_seconds.unwrap_or(cli.lease_seconds);
        let lock_ttl_seconds = file.lock_ttl_seconds.unwrap_or(cli.lock_ttl_seconds);
        let max_attempts = file.max_attempts.unwrap_or(cli.max_attempts);
        let tick_interval_ms = file.tick_interval_ms.unwrap_or(cli.tick_interval_ms);
        let heartbeat_interval_ms = file
            .heartbeat_interval_ms
            .unwrap_or(cli.heartbeat_interval_ms);
        let poll_jitter_ms = file.poll_jitter_ms.unwrap_or(cli.poll_jitter_ms);

        let lease = bounded_seconds("lease_seconds", lease_seconds)?;
        let lock_ttl = bounded_seconds("lock_ttl_seconds", lock_ttl_seconds)?;
        if max_attempts < 1 {
            bail!("max_attempts must be at least 1, got {}", max_attempts);
        }
        if tick_interval_ms == 0 {
            bail!("tick_interval_ms must be positive");
        }
        // Both are positive and bounded, so the casts are lossless
        if tick_interval_ms >= lock_ttl.num_milliseconds() as u64 {
            bail!(
                "lock_ttl_seconds ({}s) must be longer than the tick interval ({}ms)",
                lock_ttl_seconds,
                tick_interval_ms
            );
        }
        if heartbeat_interval_ms == 0 || heartbeat_interval_ms >= lease.num_milliseconds() as u64
        {
            bail!(
                "heartbeat_interval_ms ({}) must be positive and shorter than the lease ({}s)",
                heartbeat_interval_ms,
                lease_seconds
            );
        }
        if poll_jitter_ms > MAX_INTERVAL_SECONDS as u64 * 1000 {
            bail!(
                "poll_jitter_ms must be at most {}, got {}",
                MAX_INTERVAL_SECONDS as u64 * 1000,
                poll_jitter_ms
            );
        }

        let mut seen = HashSet::new();
        for job in &file.jobs {
            if job.interval_seconds <= 0 || job.interval_seconds > MAX_INTERVAL_SECONDS {
                bail!(
                    "Job {} must have an interval_seconds between 1 and {}, got {}",
                    job.id,
                    MAX_INTERVAL_SECONDS,
                    job.interval_seconds
                );
            }
            if !seen.insert(job.id.as_str()) {
                bail!("Job {} is declared more than once", job.id);
            }
        }

        let tick_interval = Duration::from_millis(tick_interval_ms);
        Ok(AppConfig {
            db_path,
            lock_ttl,
            queue: QueueSettings {
                lease,
                max_attempts,
            },
            scheduler: SchedulerSettings { tick_interval },
            worker: WorkerSettings {
                poll_interval: tick_interval,
                poll_jitter: Duration::from_millis(poll_jitter_ms),
                heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            },
            jobs: file.jobs,
            actions: file.actions,
        })
    }
}

/// A positive duration setting no longer than [`MAX_INTERVAL_SECONDS`].
fn bounded_seconds(name: &str, seconds: i64) -> Result<chrono::Duration> {
    if seconds <= 0 || seconds > MAX_INTERVAL_SECONDS {
        bail!(
            "{} must be between 1 and {}, got {}",
            name,
            MAX_INTERVAL_SECONDS,
            seconds
        );
    }
    chrono::Duration::try_seconds(seconds)
        .ok_or_else(|| anyhow!("{} of {}s is out of range", name, seconds))
}

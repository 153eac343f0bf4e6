use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use fleetcron::background_jobs::{ActionRegistry, SchedulerLoop, WorkerLoop};
use fleetcron::config::{AppConfig, CliConfig, FileConfig};
use fleetcron::coordination::{
    JobQueue, JobRegistry, LeaderElection, DEFAULT_LEASE_SECONDS, DEFAULT_LOCK_TTL_SECONDS,
    DEFAULT_MAX_ATTEMPTS,
};
use fleetcron::{JobAdmin, SqliteCoordinationStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Compete for leadership and enqueue due jobs.
    Scheduler,
    /// Claim and execute queue entries.
    Worker,
    /// Run both loops in this process.
    All,
}

impl Role {
    fn runs_scheduler(self) -> bool {
        matches!(self, Role::Scheduler | Role::All)
    }

    fn runs_worker(self) -> bool {
        matches!(self, Role::Worker | Role::All)
    }
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Which loops this process runs.
    #[clap(value_enum, default_value = "all")]
    pub role: Role,

    /// Path to a TOML config file. Values in the file override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the shared SQLite database file.
    #[clap(long, env = "FLEETCRON_DB", value_parser = parse_path, default_value = fleetcron::config::DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Lease granted to a worker on claim and on every heartbeat.
    #[clap(long, env = "LEASE_SECONDS", default_value_t = DEFAULT_LEASE_SECONDS)]
    pub lease_seconds: i64,

    /// Lifetime of the leadership lock between renewals.
    #[clap(long, env = "LOCK_TTL_SECONDS", default_value_t = DEFAULT_LOCK_TTL_SECONDS)]
    pub lock_ttl_seconds: i64,

    /// Lease expirations tolerated before an entry is marked failed.
    #[clap(long, env = "MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i64,

    /// Scheduler tick and worker poll interval.
    #[clap(long, env = "TICK_INTERVAL_MS", default_value_t = fleetcron::config::DEFAULT_TICK_INTERVAL_MS)]
    pub tick_interval_ms: u64,

    /// How often a worker renews the lease of the entry it is running.
    #[clap(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = fleetcron::config::DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,

    /// Upper bound of the random delay added to idle worker polls.
    #[clap(long, env = "POLL_JITTER_MS", default_value_t = fleetcron::config::DEFAULT_POLL_JITTER_MS)]
    pub poll_jitter_ms: u64,

    /// Number of worker loops to run in this process.
    #[clap(long, default_value_t = 1)]
    pub workers: usize,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            lease_seconds: self.lease_seconds,
            lock_ttl_seconds: self.lock_ttl_seconds,
            max_attempts: self.max_attempts,
            tick_interval_ms: self.tick_interval_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            poll_jitter_ms: self.poll_jitter_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening coordination database at {:?}...", config.db_path);
    let store = Arc::new(SqliteCoordinationStore::new(&config.db_path)?);

    if !config.jobs.is_empty() {
        let admin = JobAdmin::new(store.clone(), config.queue);
        let created = admin.seed_jobs(&config.jobs, Utc::now())?;
        info!(
            "Seeded {} of {} configured jobs",
            created,
            config.jobs.len()
        );
    }

    let actions = Arc::new(ActionRegistry::from_config(&config.actions)?);
    info!("{} job actions configured", actions.len());

    let queue = Arc::new(JobQueue::new(store.clone(), config.queue));
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    if cli_args.role.runs_scheduler() {
        let owner_id = format!("scheduler-{}", uuid::Uuid::new_v4());
        let leader = LeaderElection::new(store.clone(), owner_id, config.lock_ttl);
        let registry = JobRegistry::new(store.clone());
        let mut scheduler =
            SchedulerLoop::new(leader, registry, queue.clone(), config.scheduler.clone());
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { scheduler.run(token).await }));
    }

    if cli_args.role.runs_worker() {
        for _ in 0..cli_args.workers.max(1) {
            let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
            let worker = WorkerLoop::new(
                worker_id,
                queue.clone(),
                actions.clone(),
                config.worker.clone(),
            );
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(token).await }));
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for loops to finish...");
    shutdown.cancel();

    for handle in handles {
        handle.await?;
    }
    info!("Bye");
    Ok(())
}

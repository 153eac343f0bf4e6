use crate::coordination::{checked_offset, JobQueue, JobRegistry, LeaderElection, ReclaimReport};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// What a single scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerTickReport {
    /// Whether this instance still held leadership at the end of the tick.
    pub is_leader: bool,
    /// Leadership was held at the start of the tick but the renewal failed.
    pub lost_leadership: bool,
    pub reclaimed: ReclaimReport,
    /// Jobs that got a new queue entry.
    pub enqueued: Vec<String>,
    /// Due jobs that already had an entry in flight.
    pub skipped_in_flight: Vec<String>,
    /// Due jobs whose next run cannot be computed. They are never enqueued.
    pub unschedulable: Vec<String>,
}

/// Leader-only loop that turns due jobs into queue entries.
pub struct SchedulerLoop {
    leader: LeaderElection,
    registry: JobRegistry,
    queue: Arc<JobQueue>,
    settings: SchedulerSettings,
    is_leader: bool,
}

impl SchedulerLoop {
    pub fn new(
        leader: LeaderElection,
        registry: JobRegistry,
        queue: Arc<JobQueue>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            leader,
            registry,
            queue,
            settings,
            is_leader: false,
        }
    }

    pub fn owner_id(&self) -> &str {
        self.leader.owner_id()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Run one scheduling cycle.
    ///
    /// Without leadership this has no side effects beyond the acquisition
    /// attempt. With it: reclaim stale entries, enqueue every due unpaused
    /// job, advance the next run of each job that was enqueued, then renew.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<SchedulerTickReport> {
        let mut report = SchedulerTickReport::default();

        let acquired = self.leader.try_acquire(now)?;
        if acquired && !self.is_leader {
            info!("Scheduler {} became leader", self.owner_id());
        } else if !acquired && self.is_leader {
            warn!("Scheduler {} is no longer leader", self.owner_id());
        }
        self.is_leader = acquired;
        if !acquired {
            return Ok(report);
        }

        report.reclaimed = self.queue.reclaim_stale(now)?;

        for job in self.registry.due_jobs(now)? {
            // Checked before enqueue so a bad row never holds an entry
            let interval = match job
                .interval()
                .and_then(|interval| checked_offset(now, interval).map(|_| interval))
            {
                Ok(interval) => interval,
                Err(e) => {
                    error!("Not scheduling {}: {:#}", job.id, e);
                    report.unschedulable.push(job.id);
                    continue;
                }
            };
            match self.queue.enqueue(&job.id, now)? {
                Some(entry_id) => {
                    let next_run = self.queue.advance_next_run(&job.id, interval, now)?;
                    info!(
                        "Enqueued {} as entry {}, next run at {}",
                        job.id, entry_id, next_run
                    );
                    report.enqueued.push(job.id);
                }
                None => {
                    debug!("Job {} is due but still in flight", job.id);
                    report.skipped_in_flight.push(job.id);
                }
            }
        }

        if self.leader.renew(now)? {
            report.is_leader = true;
        } else {
            warn!(
                "Scheduler {} lost leadership while dispatching",
                self.owner_id()
            );
            self.is_leader = false;
            report.lost_leadership = true;
        }
        Ok(report)
    }

    /// Tick until `shutdown` is cancelled.
    ///
    /// Errors from a tick are logged and retried on the next one. A leader
    /// resigns on the way out so a standby can take over right away.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            "Starting scheduler {} (tick every {:?}, lock ttl {}s)",
            self.owner_id(),
            self.settings.tick_interval,
            self.leader.ttl().num_seconds()
        );

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!("Scheduler tick failed: {:#}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        if self.is_leader {
            match self.leader.resign(Utc::now()) {
                Ok(true) => info!("Scheduler {} resigned leadership", self.owner_id()),
                Ok(false) => {}
                Err(e) => error!("Failed to resign leadership: {:#}", e),
            }
            self.is_leader = false;
        }
        info!("Scheduler {} stopped", self.owner_id());
    }
}

//! Recurring backup triggers and the worker that serves them.
//!
//! The scheduler and the worker are separate tasks joined by a trigger
//! queue. The scheduler only ever `try_send`s, so a long backup can never
//! delay the next tick.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use crate::domain::{Result, RunReport, Schedule, Snowflake};

use super::archive_store::ArchiveStore;
use super::orchestrator::Orchestrator;

/// Longest single wait between schedule checks.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Where a backup request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrigin {
    Manual,
    Scheduled,
}

/// Request to back up one guild now.
#[derive(Debug)]
pub struct BackupTrigger {
    pub guild_id: Snowflake,
    pub origin: TriggerOrigin,
    reply: Option<oneshot::Sender<Result<RunReport>>>,
}

impl BackupTrigger {
    #[must_use]
    pub const fn scheduled(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            origin: TriggerOrigin::Scheduled,
            reply: None,
        }
    }

    /// A manual trigger plus the receiver its run result is delivered on.
    #[must_use]
    pub fn manual(guild_id: Snowflake) -> (Self, oneshot::Receiver<Result<RunReport>>) {
        let (tx, rx) = oneshot::channel();
        let trigger = Self {
            guild_id,
            origin: TriggerOrigin::Manual,
            reply: Some(tx),
        };
        (trigger, rx)
    }
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Uninitialized,
    Disabled,
    Armed { next: NaiveDateTime },
    Firing,
}

/// Emits one [`BackupTrigger`] per guild each time the schedule comes due.
pub struct Scheduler {
    schedule: Schedule,
    guilds: Vec<Snowflake>,
    tx: mpsc::Sender<BackupTrigger>,
    state: SchedulerState,
    clock: Clock,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        schedule: Schedule,
        guilds: Vec<Snowflake>,
        tx: mpsc::Sender<BackupTrigger>,
    ) -> Self {
        Self {
            schedule,
            guilds,
            tx,
            state: SchedulerState::Uninitialized,
            clock: Box::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used by [`run`](Self::run).
    #[cfg(test)]
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[must_use]
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    /// Compute the next firing after `now`.
    pub fn arm(&mut self, now: NaiveDateTime) -> SchedulerState {
        self.state = self
            .schedule
            .next_after(now)
            .map_or(SchedulerState::Disabled, |next| SchedulerState::Armed { next });
        self.state
    }

    /// Fire if due at `now`, then re-arm. Returns the number of triggers queued.
    pub fn tick(&mut self, now: NaiveDateTime) -> usize {
        let SchedulerState::Armed { next } = self.state else {
            return 0;
        };
        if now < next {
            return 0;
        }

        self.state = SchedulerState::Firing;
        let queued = self.fire();
        self.arm(now);
        queued
    }

    /// Queue one trigger per guild without waiting on the worker.
    fn fire(&self) -> usize {
        tracing::info!(guilds = self.guilds.len(), "Scheduled backup firing");

        let mut queued = 0;
        for &guild_id in &self.guilds {
            match self.tx.try_send(BackupTrigger::scheduled(guild_id)) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(guild = %guild_id, "Backup queue full; skipping this firing");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::error!(guild = %guild_id, "Backup worker has stopped");
                }
            }
        }
        queued
    }

    /// Check loop; returns when disabled or when the worker goes away.
    pub async fn run(mut self) {
        if self.arm((self.clock)()) == SchedulerState::Disabled {
            tracing::info!("Scheduled backups disabled");
            return;
        }
        tracing::info!(schedule = %self.schedule, state = ?self.state(), "Scheduler armed");

        while !self.tx.is_closed() {
            let now = (self.clock)();
            let wait = match self.state() {
                SchedulerState::Armed { next } => (next - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(CHECK_INTERVAL),
                _ => CHECK_INTERVAL,
            };
            tokio::time::sleep(wait).await;

            let now = (self.clock)();
            self.tick(now);
        }

        tracing::info!("Scheduler stopped");
    }
}

/// Serve triggers one at a time until every sender is dropped.
///
/// Manual and scheduled runs share this queue, so runs never overlap.
/// Run failures are logged and never end the loop; a manual trigger also
/// gets its result back. After each scheduled run, archives older than
/// `retention_days` are pruned (0 disables).
pub async fn run_worker(
    orchestrator: Orchestrator,
    mut rx: mpsc::Receiver<BackupTrigger>,
    retention_days: u32,
) {
    while let Some(BackupTrigger {
        guild_id,
        origin,
        reply,
    }) = rx.recv().await
    {
        let result = orchestrator.run(guild_id).await;
        match &result {
            Ok(report) => tracing::info!(
                guild = %report.guild_name,
                origin = ?origin,
                archive = %report.archive_path.display(),
                "Backup completed"
            ),
            Err(e) => tracing::error!(
                guild = %guild_id,
                origin = ?origin,
                error = %e,
                "Backup failed"
            ),
        }

        if let Some(reply) = reply {
            if reply.send(result).is_err() {
                tracing::debug!(guild = %guild_id, "Manual trigger stopped waiting");
            }
        }

        if origin == TriggerOrigin::Scheduled && retention_days > 0 {
            let store = ArchiveStore::new(orchestrator.options().root.clone());
            match tokio::task::spawn_blocking(move || store.prune(retention_days)).await {
                Ok(Ok(result)) if result.deleted_count > 0 => tracing::info!(
                    deleted = result.deleted_count,
                    freed = %result.freed_human(),
                    "Pruned old archives"
                ),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Pruning failed"),
                Err(e) => tracing::warn!(error = %e, "Pruning task failed"),
            }
        }
    }

    tracing::info!("Backup worker stopped");
}

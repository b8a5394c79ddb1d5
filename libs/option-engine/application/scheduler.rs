//! Settlement Scheduler
//!
//! Every tick: replay the outbox, find matured wagers, settle each one at the
//! latest cached price. Wagers settle concurrently and independently; a
//! wager without a price waits for the next tick.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::wager_service::WagerService;
use crate::domain::{EngineError, Wager};
use crate::infrastructure::config::EngineConfig;

pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_MAX_CONCURRENT_SETTLEMENTS: usize = 32;
pub const DEFAULT_OUTBOX_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub max_concurrent_settlements: usize,
    pub outbox_batch_size: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            max_concurrent_settlements: DEFAULT_MAX_CONCURRENT_SETTLEMENTS,
            outbox_batch_size: DEFAULT_OUTBOX_BATCH,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            tick: config.tick_period(),
            max_concurrent_settlements: config.scheduler.max_concurrent_settlements.max(1),
            outbox_batch_size: config.scheduler.outbox_batch_size.max(1),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub settled: usize,
    pub skipped_no_price: usize,
    pub already_settled: usize,
    pub failed: usize,
    pub outbox_applied: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WagerOutcome {
    Settled,
    SkippedNoPrice,
    AlreadySettled,
    Failed,
}

/// Running totals for the heartbeat line
#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    settled: AtomicU64,
    skipped_no_price: AtomicU64,
    failed: AtomicU64,
    outbox_applied: AtomicU64,
}

impl SchedulerStats {
    fn record(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.settled.fetch_add(report.settled as u64, Ordering::Relaxed);
        self.skipped_no_price
            .fetch_add(report.skipped_no_price as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        self.outbox_applied
            .fetch_add(report.outbox_applied as u64, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn settled(&self) -> u64 {
        self.settled.load(Ordering::Relaxed)
    }

    pub fn skipped_no_price(&self) -> u64 {
        self.skipped_no_price.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn outbox_applied(&self) -> u64 {
        self.outbox_applied.load(Ordering::Relaxed)
    }
}

pub struct SettlementScheduler {
    service: Arc<WagerService>,
    settings: SchedulerSettings,
    stats: SchedulerStats,
}

impl SettlementScheduler {
    pub fn new(service: Arc<WagerService>, settings: SchedulerSettings) -> Self {
        Self {
            service,
            settings,
            stats: SchedulerStats::default(),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// One pass; never fails, problems are logged and retried next tick
    pub async fn run_tick(&self) -> TickReport {
        let mut report = TickReport::default();

        match self
            .service
            .effects()
            .drain_outbox(self.settings.outbox_batch_size)
            .await
        {
            Ok(drained) => {
                report.outbox_applied = drained.applied;
                self.service.notify_accounts(&drained.touched_accounts).await;
            }
            Err(e) => warn!(error = %e, "Outbox unavailable, retrying next tick"),
        }

        let now = self.service.clock().now();
        let due = match self.service.ports().wagers.find_due(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Failed to load due wagers, retrying next tick");
                self.stats.record(&report);
                return report;
            }
        };
        report.due = due.len();

        let outcomes: Vec<WagerOutcome> = stream::iter(due)
            .map(|wager| self.settle_one(wager))
            .buffer_unordered(self.settings.max_concurrent_settlements)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                WagerOutcome::Settled => report.settled += 1,
                WagerOutcome::SkippedNoPrice => report.skipped_no_price += 1,
                WagerOutcome::AlreadySettled => report.already_settled += 1,
                WagerOutcome::Failed => report.failed += 1,
            }
        }

        if report.due > 0 {
            debug!(
                due = report.due,
                settled = report.settled,
                skipped_no_price = report.skipped_no_price,
                already_settled = report.already_settled,
                failed = report.failed,
                "Settlement tick"
            );
        }

        self.stats.record(&report);
        report
    }

    async fn settle_one(&self, wager: Wager) -> WagerOutcome {
        match self.service.settle_at_latest_price(&wager.id).await {
            Ok(_) => WagerOutcome::Settled,
            Err(EngineError::NoPriceAvailable(_)) => {
                debug!(wager_id = %wager.id, instrument = %wager.instrument, "No price yet, retrying next tick");
                WagerOutcome::SkippedNoPrice
            }
            Err(EngineError::AlreadySettled(_)) => {
                debug!(wager_id = %wager.id, "Already settled by another path");
                WagerOutcome::AlreadySettled
            }
            Err(e) => {
                error!(wager_id = %wager.id, reason = e.reason(), error = %e, "Settlement failed");
                WagerOutcome::Failed
            }
        }
    }

    /// Tick until the shutdown flag clears; overrunning ticks are delayed
    pub async fn run(&self, shutdown_flag: Arc<AtomicBool>) {
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.settings.tick.as_millis() as u64,
            max_concurrent = self.settings.max_concurrent_settlements,
            "Settlement scheduler started"
        );

        while shutdown_flag.load(Ordering::Acquire) {
            ticker.tick().await;
            if !shutdown_flag.load(Ordering::Acquire) {
                break;
            }
            self.run_tick().await;
        }

        info!(
            ticks = self.stats.ticks(),
            settled = self.stats.settled(),
            "Settlement scheduler stopped"
        );
    }
}

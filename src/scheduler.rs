//! Reporting cycle scheduling.
//!
//! A cycle is collect → authenticate → report, run strictly in sequence.
//! The first failing stage ends the cycle; the next tick is the only retry.
//! Cycles run once at startup and then on a fixed period, and at most one is
//! in flight: a tick that fires while a cycle is still running is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::CredentialBroker;
use crate::collector::collect;
use crate::config::StaticCredentials;
use crate::device::DeviceSession;
use crate::reporter::MetricsReporter;

/// Stage a cycle is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Collecting,
    Authenticating,
    Reporting,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "idle"),
            CyclePhase::Collecting => write!(f, "collecting"),
            CyclePhase::Authenticating => write!(f, "authenticating"),
            CyclePhase::Reporting => write!(f, "reporting"),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Snapshot accepted by the metrics endpoint
    Reported,

    /// Device session unreachable, nothing submitted
    CollectionFailed,

    /// No token obtained, nothing submitted
    AuthFailed,

    /// Metrics endpoint unreachable or rejected the payload
    SubmitFailed,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Reported)
    }
}

/// Statistics about scheduled cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Cycles that were started
    pub cycles_started: u64,

    /// Cycles that ended with the snapshot reported
    pub cycles_reported: u64,

    /// Cycles abandoned at some stage
    pub cycles_failed: u64,

    /// Ticks dropped because a cycle was still running
    pub ticks_skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    reported: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// The collect → authenticate → report pipeline.
pub struct ReportingPipeline {
    session: Arc<dyn DeviceSession>,
    broker: CredentialBroker,
    reporter: MetricsReporter,
    credentials: StaticCredentials,
}

impl ReportingPipeline {
    pub fn new(
        session: Arc<dyn DeviceSession>,
        broker: CredentialBroker,
        reporter: MetricsReporter,
        credentials: StaticCredentials,
    ) -> Self {
        Self {
            session,
            broker,
            reporter,
            credentials,
        }
    }

    /// Run one cycle to completion. Never fails; the outcome says where it stopped.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle_id = Uuid::new_v4();

        debug!(cycle_id = %cycle_id, phase = %CyclePhase::Collecting, "Getting sensor values");
        let snapshot = match collect(self.session.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "Error getting info from sensors");
                return CycleOutcome::CollectionFailed;
            }
        };
        info!(cycle_id = %cycle_id, snapshot = ?snapshot, "Sending sensor data to metrics platform");

        debug!(cycle_id = %cycle_id, phase = %CyclePhase::Authenticating, "Authenticating");
        let credential = match self.broker.authenticate(&self.credentials).await {
            Ok(credential) => credential,
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "Authentication error");
                return CycleOutcome::AuthFailed;
            }
        };

        debug!(cycle_id = %cycle_id, phase = %CyclePhase::Reporting, "Submitting metrics");
        match self.reporter.report(&snapshot, &credential).await {
            Ok(()) => {
                info!(cycle_id = %cycle_id, "Reporting cycle complete");
                CycleOutcome::Reported
            }
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "Error sending data to metrics API");
                CycleOutcome::SubmitFailed
            }
        }
    }
}

/// Drives the pipeline on a fixed period with at most one cycle in flight.
#[derive(Clone)]
pub struct CycleScheduler {
    pipeline: Arc<ReportingPipeline>,
    period: Duration,
    permit: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl CycleScheduler {
    pub fn new(pipeline: Arc<ReportingPipeline>, period: Duration) -> Self {
        Self {
            pipeline,
            period,
            permit: Arc::new(Semaphore::new(1)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start a cycle in the background unless one is already running.
    ///
    /// Returns `None` when the tick was dropped.
    pub fn try_start_cycle(&self) -> Option<JoinHandle<CycleOutcome>> {
        let permit = match Arc::clone(&self.permit).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                warn!("Previous reporting cycle still running, skipping this tick");
                return None;
            }
        };

        self.counters.started.fetch_add(1, Ordering::Relaxed);
        let pipeline = Arc::clone(&self.pipeline);
        let counters = Arc::clone(&self.counters);

        Some(tokio::spawn(async move {
            let outcome = pipeline.run_cycle().await;
            if outcome.is_success() {
                counters.reported.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            drop(permit);
            debug!(phase = %CyclePhase::Idle, outcome = ?outcome, "Cycle finished");
            outcome
        }))
    }

    /// Run cycles until `shutdown` fires, then wait for the in-flight cycle.
    ///
    /// The first cycle starts immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period_secs = self.period.as_secs(), "Cycle scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.try_start_cycle();
                }
                _ = shutdown.changed() => break,
            }
        }

        // Cycles are never cancelled; wait for the running one to release its permit
        if self.permit.acquire().await.is_err() {
            warn!("Cycle permit closed during shutdown");
        }
        info!(stats = ?self.stats(), "Cycle scheduler stopped");
    }

    /// Get current scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            cycles_started: self.counters.started.load(Ordering::Relaxed),
            cycles_reported: self.counters.reported.load(Ordering::Relaxed),
            cycles_failed: self.counters.failed.load(Ordering::Relaxed),
            ticks_skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

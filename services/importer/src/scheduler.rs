use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use listsync_state::WatermarkStore;

use crate::connector::{Sink, Source};
use crate::runner::{JobError, JobRunner, SyncResult};

/// Identifiers with a run in progress. A second claim for the same
/// identifier fails until the first guard is dropped.
#[derive(Debug, Default)]
struct InFlight {
    running: Mutex<HashSet<String>>,
}

struct InFlightGuard {
    set: Arc<InFlight>,
    job_id: String,
}

impl InFlight {
    fn try_claim(self: &Arc<Self>, job_id: &str) -> Option<InFlightGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(job_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(self),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut running = self.set.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.job_id);
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Synced(SyncResult),
    Failed(JobError),
    /// The previous run for this identifier had not finished.
    Skipped(String),
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub synced: Vec<SyncResult>,
    pub failed: Vec<JobError>,
    pub skipped: Vec<String>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn push(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Synced(result) => self.synced.push(result),
            JobOutcome::Failed(err) => self.failed.push(err),
            JobOutcome::Skipped(job_id) => self.skipped.push(job_id),
        }
    }
}

/// Runs the configured jobs once or on a fixed period.
pub struct Scheduler<S, K, W> {
    runner: Arc<JobRunner<S, K, W>>,
    job_ids: Arc<[String]>,
    period: Duration,
    in_flight: Arc<InFlight>,
}

impl<S, K, W> Clone for Scheduler<S, K, W> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            job_ids: Arc::clone(&self.job_ids),
            period: self.period,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<S, K, W> Scheduler<S, K, W>
where
    S: Source + 'static,
    K: Sink + 'static,
    W: WatermarkStore + 'static,
{
    pub fn new(runner: JobRunner<S, K, W>, job_ids: Vec<String>, period: Duration) -> Self {
        Self {
            runner: Arc::new(runner),
            job_ids: job_ids.into(),
            period,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn job_ids(&self) -> &[String] {
        &self.job_ids
    }

    /// One cycle: every job runs concurrently; a failing job does not stop
    /// the others. Jobs whose previous run is still going are skipped.
    pub async fn run_once(&self, cancel: &CancellationToken) -> CycleReport {
        let mut jobs = JoinSet::new();

        for job_id in self.job_ids.iter() {
            let job_id = job_id.clone();
            let runner = Arc::clone(&self.runner);
            let in_flight = Arc::clone(&self.in_flight);
            let cancel = cancel.clone();

            jobs.spawn(async move {
                let Some(_guard) = in_flight.try_claim(&job_id) else {
                    tracing::info!(job_id = %job_id, "previous run still in progress, skipping");
                    return JobOutcome::Skipped(job_id);
                };

                match runner.run_job(&cancel, &job_id).await {
                    Ok(result) => {
                        tracing::info!(
                            job_id = %result.job_id,
                            delivered = result.delivered,
                            previous = result.previous.last_update,
                            last_update = result.current.last_update,
                            "job completed"
                        );
                        JobOutcome::Synced(result)
                    }
                    Err(e) => {
                        tracing::error!(
                            job_id = %e.job_id,
                            stage = %e.stage,
                            redelivery_expected = e.delivered_without_watermark(),
                            transient = e.source.is_transient(),
                            error = %e.source,
                            "job failed"
                        );
                        JobOutcome::Failed(e)
                    }
                }
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(outcome) => report.push(outcome),
                Err(e) => tracing::error!(error = %e, "job task panicked"),
            }
        }

        tracing::info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "cycle finished"
        );
        report
    }

    /// Run a cycle immediately and then once per period until `cancel` fires.
    ///
    /// A tick starts a new cycle without waiting for the previous one. After
    /// cancellation no new cycles start; running ones see the same token and
    /// are awaited before returning.
    pub async fn run(&self, cancel: &CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();

        tracing::info!(
            jobs = self.job_ids.len(),
            period_secs = self.period.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let scheduler = self.clone();
                    let cancel = cancel.clone();
                    cycles.spawn(async move { scheduler.run_once(&cancel).await });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "cycle task panicked");
                    }
                }
            }
        }

        tracing::info!(running = cycles.len(), "scheduler stopping, draining cycles");
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "cycle task panicked");
            }
        }
    }
}

use std::fmt;

use tokio_util::sync::CancellationToken;

use listsync_common::error::ListsyncError;
use listsync_state::{Watermark, WatermarkStore};

use crate::connector::{Sink, Source};

/// Step of a job run; names the step that failed in a [`JobError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadWatermark,
    Fetch,
    Deliver,
    AdvanceWatermark,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadWatermark => "load watermark",
            Self::Fetch => "fetch",
            Self::Deliver => "deliver",
            Self::AdvanceWatermark => "advance watermark",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("[{job_id}] {stage} failed: {source}")]
pub struct JobError {
    pub job_id: String,
    pub stage: Stage,
    #[source]
    pub source: ListsyncError,
}

impl JobError {
    fn new(job_id: &str, stage: Stage, source: ListsyncError) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            source,
        }
    }

    /// Records were delivered but the watermark was not saved; the next run
    /// delivers them again.
    pub fn delivered_without_watermark(&self) -> bool {
        self.stage == Stage::AdvanceWatermark
    }
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub job_id: String,
    pub delivered: usize,
    pub previous: Watermark,
    pub current: Watermark,
}

/// Runs one job: load watermark, fetch, deliver, advance watermark.
///
/// Each step starts only after the previous one succeeded, so the watermark
/// moves only once every fetched record has been accepted downstream.
pub struct JobRunner<S, K, W> {
    source: S,
    sink: K,
    store: W,
}

impl<S, K, W> JobRunner<S, K, W>
where
    S: Source,
    K: Sink,
    W: WatermarkStore,
{
    pub fn new(source: S, sink: K, store: W) -> Self {
        Self {
            source,
            sink,
            store,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &W {
        &self.store
    }

    pub async fn run_job(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
    ) -> Result<SyncResult, JobError> {
        let previous = self
            .store
            .get(job_id)
            .await
            .map_err(|e| JobError::new(job_id, Stage::LoadWatermark, e))?;

        tracing::debug!(job_id, last_update = previous.last_update, "watermark loaded");

        let fetched = self
            .source
            .fetch(cancel, job_id, previous)
            .await
            .map_err(|e| JobError::new(job_id, Stage::Fetch, e))?;

        tracing::debug!(
            job_id,
            source = self.source.source_name(),
            count = fetched.records.len(),
            "records fetched"
        );

        self.sink
            .put(cancel, &fetched.records)
            .await
            .map_err(|e| JobError::new(job_id, Stage::Deliver, e))?;

        tracing::debug!(
            job_id,
            sink = self.sink.sink_name(),
            count = fetched.records.len(),
            "records delivered"
        );

        let current = self
            .store
            .update(job_id, fetched.watermark)
            .await
            .map_err(|e| {
                tracing::error!(
                    job_id,
                    count = fetched.records.len(),
                    error = %e,
                    "records delivered but watermark not saved; they will be sent again"
                );
                JobError::new(job_id, Stage::AdvanceWatermark, e)
            })?;

        Ok(SyncResult {
            job_id: job_id.to_string(),
            delivered: fetched.records.len(),
            previous,
            current,
        })
    }
}

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use listsync_common::error::ListsyncResult;
use listsync_state::Watermark;

use crate::models::Record;

/// Everything changed since a watermark, fully read.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub records: Vec<Record>,
    /// `current` advanced to the newest change-time seen, or unchanged.
    pub watermark: Watermark,
}

#[async_trait]
pub trait Source: Send + Sync {
    fn source_name(&self) -> &str;

    /// Fetch all records for `job_id` changed since `current`.
    /// Fails as a whole: no partial results on error.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
        current: Watermark,
    ) -> ListsyncResult<FetchResult>;
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn sink_name(&self) -> &str;

    /// Deliver every record. Succeeds only if all of them were accepted;
    /// on error some records may already have been delivered.
    async fn put(&self, cancel: &CancellationToken, records: &[Record]) -> ListsyncResult<()>;
}

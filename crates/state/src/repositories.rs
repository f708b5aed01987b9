use async_trait::async_trait;

use crate::models::Watermark;
use listsync_common::error::ListsyncResult;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark for a job; the zero watermark if the job was never synced.
    async fn get(&self, job_id: &str) -> ListsyncResult<Watermark>;

    /// Persist a new watermark and return the value now stored.
    ///
    /// Calls for the same job are serialized. A watermark lower than the stored
    /// one is ignored, so the stored value never decreases.
    async fn update(&self, job_id: &str, watermark: Watermark) -> ListsyncResult<Watermark>;
}

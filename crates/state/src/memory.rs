use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::Watermark;
use crate::repositories::WatermarkStore;
use listsync_common::error::ListsyncResult;

/// Process-local store; watermarks are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    entries: Mutex<HashMap<String, Watermark>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store, e.g. to resume from a known position.
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Watermark)>,
        K: Into<String>,
    {
        Self {
            entries: Mutex::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, job_id: &str) -> ListsyncResult<Watermark> {
        Ok(self
            .entries
            .lock()
            .await
            .get(job_id)
            .copied()
            .unwrap_or_default())
    }

    async fn update(&self, job_id: &str, watermark: Watermark) -> ListsyncResult<Watermark> {
        let mut entries = self.entries.lock().await;
        let slot = entries.entry(job_id.to_owned()).or_default();
        *slot = (*slot).max(watermark);
        Ok(*slot)
    }
}

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::Watermark;
use crate::repositories::WatermarkStore;
use crate::validate_job_id;
use listsync_common::error::{ListsyncError, ListsyncResult};

const LOCK_NAME: &str = ".lock";

/// One JSON file per job (`<dir>/<job_id>.json`).
///
/// Opening the store claims `<dir>/.lock`; a second process pointed at the same
/// directory fails to open until the first one drops its store. A lock left
/// behind by a crashed process must be removed by hand.
pub struct DiskWatermarkStore {
    dir: PathBuf,
    lock_path: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DiskWatermarkStore {
    pub fn open(dir: impl Into<PathBuf>) -> ListsyncResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            ListsyncError::Storage(format!("state dir {} is not accessible: {e}", dir.display()))
        })?;

        let lock_path = dir.join(LOCK_NAME);
        let mut lock_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => ListsyncError::Storage(format!(
                    "{} exists: another importer instance is using {}",
                    lock_path.display(),
                    dir.display()
                )),
                _ => ListsyncError::Storage(format!(
                    "failed to create {}: {e}",
                    lock_path.display()
                )),
            })?;

        if let Err(e) = writeln!(lock_file, "{}", std::process::id()) {
            let _ = fs::remove_file(&lock_path);
            return Err(ListsyncError::Storage(format!(
                "failed to write {}: {e}",
                lock_path.display()
            )));
        }

        tracing::info!(dir = %dir.display(), "watermark store opened");

        Ok(Self {
            dir,
            lock_path,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    fn lock_for(&self, job_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(job_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read(&self, job_id: &str) -> ListsyncResult<Watermark> {
        let path = self.path_for(job_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Watermark::default()),
            Err(e) => {
                return Err(ListsyncError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            ListsyncError::Storage(format!("corrupt watermark in {}: {e}", path.display()))
        })
    }

    async fn write(&self, job_id: &str, watermark: Watermark) -> ListsyncResult<()> {
        let path = self.path_for(job_id);
        let tmp = self.dir.join(format!("{job_id}.json.tmp"));
        let body = serde_json::to_vec(&watermark)
            .map_err(|e| ListsyncError::Internal(format!("failed to encode watermark: {e}")))?;

        let write_err = |e: std::io::Error| {
            ListsyncError::Storage(format!("failed to write {}: {e}", tmp.display()))
        };
        let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
        file.write_all(&body).await.map_err(write_err)?;
        // Contents must be on disk before the rename makes them visible
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            ListsyncError::Storage(format!("failed to replace {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl WatermarkStore for DiskWatermarkStore {
    async fn get(&self, job_id: &str) -> ListsyncResult<Watermark> {
        validate_job_id(job_id)?;
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;
        self.read(job_id).await
    }

    async fn update(&self, job_id: &str, watermark: Watermark) -> ListsyncResult<Watermark> {
        validate_job_id(job_id)?;
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        let stored = self.read(job_id).await?;
        if watermark < stored {
            tracing::warn!(
                job_id,
                stored = stored.last_update,
                requested = watermark.last_update,
                "ignoring watermark older than stored value"
            );
            return Ok(stored);
        }
        if watermark == stored {
            let path = self.path_for(job_id);
            let persisted = tokio::fs::try_exists(&path).await.map_err(|e| {
                ListsyncError::Storage(format!("failed to stat {}: {e}", path.display()))
            })?;
            if persisted {
                return Ok(stored);
            }
        }

        self.write(job_id, watermark).await?;
        tracing::debug!(job_id, last_update = watermark.last_update, "watermark persisted");
        Ok(watermark)
    }
}

impl Drop for DiskWatermarkStore {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            tracing::warn!(path = %self.lock_path.display(), error = %e, "failed to remove lock marker");
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use listsync_common::error::{ListsyncError, ListsyncResult};
use listsync_config::env::{get_var, parse_positive_or, parse_var_or, process_env, Lookup};

use super::batch::dispatch_chunks;
use super::models::IngestResponse;
use crate::connector::Sink;
use crate::http::{body_text, read_body, HttpTransport, TransportError};
use crate::models::Record;

const SINK_NAME: &str = "ometria";

#[derive(Debug, Clone)]
pub struct OmetriaClientConfig {
    pub url: String,
    pub api_key: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl OmetriaClientConfig {
    /// Load Ometria config from environment. URL and API key are mandatory.
    pub fn from_env() -> ListsyncResult<Self> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> ListsyncResult<Self> {
        Ok(Self {
            url: get_var(lookup, "OMETRIA_URL")?,
            api_key: get_var(lookup, "OMETRIA_API_KEY")?,
            batch_size: parse_positive_or(lookup, "OMETRIA_BATCH_SIZE", 1000)?,
            concurrency: parse_positive_or(lookup, "OMETRIA_CONCURRENCY", 10)?,
            max_retries: parse_var_or(lookup, "OMETRIA_MAX_RETRIES", 0)?,
            timeout_secs: parse_positive_or(lookup, "OMETRIA_TIMEOUT_SECS", 60)?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OmetriaClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed ingest response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("destination accepted {accepted} of {sent} records (status {status})")]
    PartialAccept {
        sent: usize,
        accepted: i64,
        status: String,
    },
}

impl From<OmetriaClientError> for ListsyncError {
    fn from(err: OmetriaClientError) -> Self {
        match err {
            OmetriaClientError::Transport(TransportError::Cancelled) => ListsyncError::Cancelled,
            OmetriaClientError::Transport(e) => ListsyncError::Transport(e.to_string()),
            OmetriaClientError::HttpError { .. }
            | OmetriaClientError::Decode(_)
            | OmetriaClientError::PartialAccept { .. } => ListsyncError::Protocol(err.to_string()),
        }
    }
}

/// Batching client for the record ingestion endpoint.
///
/// Clones share one pool of delivery permits, so `concurrency` caps the
/// requests in flight across every `put` issued through this client.
#[derive(Clone)]
pub struct OmetriaClient {
    http: HttpTransport,
    config: OmetriaClientConfig,
    permits: Arc<Semaphore>,
}

impl OmetriaClient {
    pub fn new(config: OmetriaClientConfig) -> Result<Self, reqwest::Error> {
        let http = HttpTransport::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Ok(Self {
            http,
            config,
            permits,
        })
    }

    /// For testing: create a client pointing at a specific URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_url(mut self, url: &str) -> Self {
        self.config.url = url.to_string();
        self
    }

    pub fn config(&self) -> &OmetriaClientConfig {
        &self.config
    }

    /// POST one chunk and check that every record was accepted.
    pub async fn insert(
        &self,
        cancel: &CancellationToken,
        chunk: &[Record],
    ) -> Result<(), OmetriaClientError> {
        let body = serde_json::to_vec(chunk)?;

        let response = self
            .http
            .send(cancel, |client| {
                client
                    .post(&self.config.url)
                    .header(AUTHORIZATION, &self.config.api_key)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = body_text(cancel, response).await?;
            return Err(OmetriaClientError::HttpError { status, body });
        }

        let bytes = read_body(cancel, response).await?;
        let ingest: IngestResponse = serde_json::from_slice(&bytes)?;

        if !ingest.accepted_all(chunk.len()) {
            return Err(OmetriaClientError::PartialAccept {
                sent: chunk.len(),
                accepted: ingest.content,
                status: ingest.status,
            });
        }

        tracing::debug!(count = chunk.len(), "ingested records");
        Ok(())
    }
}

#[async_trait]
impl Sink for OmetriaClient {
    fn sink_name(&self) -> &str {
        SINK_NAME
    }

    async fn put(&self, cancel: &CancellationToken, records: &[Record]) -> ListsyncResult<()> {
        let chunks = dispatch_chunks(
            records,
            self.config.batch_size,
            &self.permits,
            cancel,
            |index, chunk| {
                let client = self.clone();
                let cancel = cancel.clone();
                async move {
                    client.insert(&cancel, &chunk).await.map_err(|e| {
                        tracing::warn!(chunk = index, size = chunk.len(), error = %e, "chunk rejected");
                        ListsyncError::from(e)
                    })
                }
            },
        )
        .await?;

        tracing::info!(
            count = records.len(),
            chunks,
            batch_size = self.config.batch_size,
            "delivered records"
        );
        Ok(())
    }
}

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;

/// A `reqwest` client with an absolute per-request timeout and an optional
/// retry budget for transient failures. With `max_retries = 0` every request
/// is attempted exactly once.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,
}

impl HttpTransport {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .build()?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    /// Send the request produced by `build`, retrying timeouts, connection
    /// failures, 429 and 5xx while budget remains.
    ///
    /// Any other response (including non-2xx) is returned to the caller, as is
    /// the outcome of the final attempt. Cancellation aborts both the in-flight
    /// request and any backoff sleep.
    pub async fn send<F>(
        &self,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<Response, TransportError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let last_attempt = attempt >= self.max_retries;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                outcome = build(&self.client).send() => outcome,
            };

            let wait = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if last_attempt || !is_retryable(status) {
                        return Ok(response);
                    }
                    let wait = retry_after(&response).unwrap_or_else(|| backoff(attempt + 1));
                    tracing::warn!(%status, attempt, wait_secs = wait.as_secs(), "retryable response, backing off");
                    wait
                }
                Err(e) => {
                    if last_attempt || !(e.is_timeout() || e.is_connect()) {
                        return Err(TransportError::Request(e));
                    }
                    let wait = backoff(attempt + 1);
                    tracing::warn!(error = %e, attempt, wait_secs = wait.as_secs(), "request failed, backing off");
                    wait
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(std::cmp::min(1u64 << attempt.min(5), 30))
}

// Honor Retry-After for 429, capped at a minute
fn retry_after(response: &Response) -> Option<Duration> {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.min(60)))
}

/// Read the whole response body, giving up as soon as `cancel` fires.
pub async fn read_body(
    cancel: &CancellationToken,
    response: Response,
) -> Result<Vec<u8>, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        body = response.bytes() => Ok(body?.to_vec()),
    }
}

/// Read a response body for an error message. Only cancellation fails; an
/// unreadable body becomes an empty string.
pub async fn body_text(
    cancel: &CancellationToken,
    response: Response,
) -> Result<String, TransportError> {
    match read_body(cancel, response).await {
        Ok(body) => Ok(String::from_utf8_lossy(&body).into_owned()),
        Err(TransportError::Cancelled) => Err(TransportError::Cancelled),
        Err(_) => Ok(String::new()),
    }
}

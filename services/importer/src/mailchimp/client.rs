use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use listsync_common::error::{ListsyncError, ListsyncResult};
use listsync_config::env::{get_var, get_var_or, parse_positive_or, parse_var_or, process_env, Lookup};
use listsync_state::Watermark;

use super::models::MembersResponse;
use crate::connector::{FetchResult, Source};
use crate::http::{body_text, read_body, HttpTransport, TransportError};
use crate::models::Record;

const SOURCE_NAME: &str = "mailchimp";

#[derive(Debug, Clone)]
pub struct MailchimpClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub page_limit: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl MailchimpClientConfig {
    /// Load Mailchimp config from environment. A missing API key is a
    /// configuration error: the importer cannot run without its source.
    pub fn from_env() -> ListsyncResult<Self> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> ListsyncResult<Self> {
        let base_url = get_var_or(lookup, "MAILCHIMP_BASE_URL", "https://us9.api.mailchimp.com/3.0");

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: get_var(lookup, "MAILCHIMP_API_KEY")?,
            page_limit: parse_positive_or(lookup, "MAILCHIMP_PAGE_LIMIT", 100)?,
            max_retries: parse_var_or(lookup, "MAILCHIMP_MAX_RETRIES", 0)?,
            timeout_secs: parse_positive_or(lookup, "MAILCHIMP_TIMEOUT_SECS", 30)?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailchimpClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed members response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("watermark {0} is not a representable timestamp")]
    InvalidWatermark(i64),
}

impl From<MailchimpClientError> for ListsyncError {
    fn from(err: MailchimpClientError) -> Self {
        match err {
            MailchimpClientError::Transport(TransportError::Cancelled) => ListsyncError::Cancelled,
            MailchimpClientError::Transport(e) => ListsyncError::Transport(e.to_string()),
            MailchimpClientError::HttpError { .. } | MailchimpClientError::Decode(_) => {
                ListsyncError::Protocol(err.to_string())
            }
            MailchimpClientError::InvalidWatermark(_) => ListsyncError::Validation(err.to_string()),
        }
    }
}

/// One page of mapped records plus the newest change-time on it.
#[derive(Debug, Clone, Default)]
pub struct FetchPage {
    pub records: Vec<Record>,
    pub max_change_time: Option<i64>,
}

#[derive(Clone)]
pub struct MailchimpClient {
    http: HttpTransport,
    config: MailchimpClientConfig,
}

impl MailchimpClient {
    pub fn new(config: MailchimpClientConfig) -> Result<Self, reqwest::Error> {
        let http = HttpTransport::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { http, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn config(&self) -> &MailchimpClientConfig {
        &self.config
    }

    /// Fetch one page of members of `list_id`, starting at `offset`.
    pub async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        list_id: &str,
        offset: usize,
        since: Option<&str>,
    ) -> Result<FetchPage, MailchimpClientError> {
        let url = format!("{}/lists/{}/members", self.config.base_url, list_id);
        let offset = offset.to_string();
        let count = self.config.page_limit.to_string();

        let response = self
            .http
            .send(cancel, |client| {
                let mut request = client
                    .get(&url)
                    .basic_auth("", Some(&self.config.api_key))
                    .query(&[("offset", offset.as_str()), ("count", count.as_str())]);
                if let Some(since) = since {
                    request = request.query(&[("since_last_changed", since)]);
                }
                request
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = body_text(cancel, response).await?;
            return Err(MailchimpClientError::HttpError { status, body });
        }

        let bytes = read_body(cancel, response).await?;
        let page: MembersResponse = serde_json::from_slice(&bytes)?;

        Ok(FetchPage {
            max_change_time: page.members.iter().filter_map(|m| m.change_time()).max(),
            records: page.members.iter().map(|m| m.to_record()).collect(),
        })
    }

    /// Page through every member changed since `current`, starting at offset 0
    /// and stopping at the first page shorter than the page limit.
    ///
    /// Returns the records and the newest change-time seen across all pages.
    pub async fn fetch_changed_members(
        &self,
        cancel: &CancellationToken,
        list_id: &str,
        current: Watermark,
    ) -> Result<(Vec<Record>, Option<i64>), MailchimpClientError> {
        let since = since_filter(current)?;
        let limit = self.config.page_limit;
        let mut offset = 0;
        let mut all_records = Vec::new();
        let mut newest: Option<i64> = None;

        loop {
            let page = self.fetch_page(cancel, list_id, offset, since.as_deref()).await?;
            let page_len = page.records.len();
            newest = newest.max(page.max_change_time);
            offset += page_len;
            all_records.extend(page.records);

            tracing::debug!(
                list_id,
                received = page_len,
                offset,
                total = all_records.len(),
                newest,
                "fetched members page"
            );

            if page_len < limit {
                break;
            }
        }

        Ok((all_records, newest))
    }
}

/// `since_last_changed` value for a watermark: `None` before the first sync,
/// otherwise ISO-8601 in UTC with an explicit offset.
pub fn since_filter(current: Watermark) -> Result<Option<String>, MailchimpClientError> {
    if current.is_initial() {
        return Ok(None);
    }
    let at = DateTime::<Utc>::from_timestamp(current.last_update, 0)
        .ok_or(MailchimpClientError::InvalidWatermark(current.last_update))?;
    Ok(Some(at.format("%Y-%m-%dT%H:%M:%S%:z").to_string()))
}

#[async_trait]
impl Source for MailchimpClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
        current: Watermark,
    ) -> ListsyncResult<FetchResult> {
        let (records, newest) = self.fetch_changed_members(cancel, job_id, current).await?;
        let watermark = newest.map_or(current, |candidate| current.advance_to(candidate));

        tracing::info!(
            job_id,
            count = records.len(),
            previous = current.last_update,
            last_update = watermark.last_update,
            "fetched mailchimp members"
        );

        Ok(FetchResult { records, watermark })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{cancel_after, stalled_body_server};
    use listsync_config::env::map_lookup;
    use wiremock::matchers::{basic_auth, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIST: &str = "list123";
    const MEMBERS_PATH: &str = "/lists/list123/members";

    fn test_config(page_limit: usize) -> MailchimpClientConfig {
        MailchimpClientConfig {
            base_url: "http://localhost".to_string(),
            api_key: "mc-test-key".to_string(),
            page_limit,
            max_retries: 0,
            timeout_secs: 5,
        }
    }

    fn client(server: &MockServer, page_limit: usize) -> MailchimpClient {
        MailchimpClient::new(test_config(page_limit))
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn make_members(count: usize, offset: usize, base_time: i64) -> serde_json::Value {
        let members: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                let changed = DateTime::<Utc>::from_timestamp(base_time + (i + offset) as i64, 0)
                    .unwrap()
                    .to_rfc3339();
                serde_json::json!({
                    "id": format!("member-{}", i + offset),
                    "email_address": format!("user{}@example.com", i + offset),
                    "merge_fields": {"FNAME": format!("First{}", i + offset), "LNAME": "Last"},
                    "status": "subscribed",
                    "last_changed": changed
                })
            })
            .collect();
        serde_json::json!({ "members": members, "total_items": count })
    }

    #[test]
    fn since_filter_omitted_for_initial_watermark() {
        assert_eq!(since_filter(Watermark::default()).unwrap(), None);
    }

    #[test]
    fn since_filter_formats_utc_with_offset() {
        let since = since_filter(Watermark::new(1_700_000_000)).unwrap();
        assert_eq!(since.as_deref(), Some("2023-11-14T22:13:20+00:00"));
    }

    #[test]
    fn since_filter_rejects_out_of_range() {
        let err = since_filter(Watermark::new(i64::MAX)).unwrap_err();
        assert!(matches!(err, MailchimpClientError::InvalidWatermark(_)));
    }

    #[test]
    fn config_requires_api_key() {
        let lookup = map_lookup(&[("MAILCHIMP_BASE_URL", "https://us1.api.mailchimp.com/3.0")]);
        let err = MailchimpClientConfig::from_lookup(&lookup).unwrap_err();
        assert!(matches!(err, ListsyncError::Config(_)));
    }

    #[test]
    fn config_defaults_and_trailing_slash() {
        let lookup = map_lookup(&[
            ("MAILCHIMP_API_KEY", "key-us1"),
            ("MAILCHIMP_BASE_URL", "https://us1.api.mailchimp.com/3.0/"),
        ]);
        let cfg = MailchimpClientConfig::from_lookup(&lookup).unwrap();
        assert_eq!(cfg.base_url, "https://us1.api.mailchimp.com/3.0");
        assert_eq!(cfg.page_limit, 100);
        assert_eq!(cfg.max_retries, 0);
        assert_eq!(cfg.timeout_secs, 30);
    }

    #[test]
    fn config_rejects_zero_page_limit() {
        let lookup = map_lookup(&[("MAILCHIMP_API_KEY", "k"), ("MAILCHIMP_PAGE_LIMIT", "0")]);
        assert!(MailchimpClientConfig::from_lookup(&lookup).is_err());
    }

    #[tokio::test]
    async fn initial_sync_fetches_single_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("offset", "0"))
            .and(query_param("count", "10"))
            .and(query_param_is_missing("since_last_changed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_members(3, 0, 1_000)))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, 10)
            .fetch(&CancellationToken::new(), LIST, Watermark::default())
            .await
            .unwrap();

        assert_eq!(result.records.len(), 3);
        assert_eq!(result.records[0].id, "member-0");
        assert_eq!(result.records[0].firstname, "First0");
        assert_eq!(result.watermark.last_update, 1_002);
    }

    #[tokio::test]
    async fn fetch_multiple_pages_until_short_page() {
        let server = MockServer::start().await;

        // Two full pages, then a partial one
        for (offset, count) in [(0, 2), (2, 2), (4, 1)] {
            Mock::given(method("GET"))
                .and(path(MEMBERS_PATH))
                .and(query_param("offset", offset.to_string()))
                .and(query_param("count", "2"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(make_members(count, offset, 5_000)),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let result = client(&server, 2)
            .fetch(&CancellationToken::new(), LIST, Watermark::default())
            .await
            .unwrap();

        let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["member-0", "member-1", "member-2", "member-3", "member-4"]);
        assert_eq!(result.watermark.last_update, 5_004);
    }

    #[tokio::test]
    async fn empty_first_page_terminates_after_one_call() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"members": []})))
            .expect(1)
            .mount(&server)
            .await;

        let current = Watermark::new(1_700_000_000);
        let result = client(&server, 100)
            .fetch(&CancellationToken::new(), LIST, current)
            .await
            .unwrap();

        assert!(result.records.is_empty());
        assert_eq!(result.watermark, current);
    }

    #[tokio::test]
    async fn incremental_sync_sends_since_filter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("since_last_changed", "2023-11-14T22:13:20+00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_members(1, 0, 1_700_000_500)))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, 100)
            .fetch(&CancellationToken::new(), LIST, Watermark::new(1_700_000_000))
            .await
            .unwrap();

        assert_eq!(result.watermark.last_update, 1_700_000_500);
    }

    #[tokio::test]
    async fn older_records_do_not_move_watermark_back() {
        let server = MockServer::start().await;

        // Clock skew: the source returns records older than the watermark
        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_members(2, 0, 100)))
            .mount(&server)
            .await;

        let current = Watermark::new(500);
        let result = client(&server, 100)
            .fetch(&CancellationToken::new(), LIST, current)
            .await
            .unwrap();

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.watermark, current);
    }

    #[tokio::test]
    async fn uses_basic_auth_with_key_as_password() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(basic_auth("", "mc-test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"members": []})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, 100)
            .fetch(&CancellationToken::new(), LIST, Watermark::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn error_on_later_page_discards_partial_results() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_members(2, 0, 100)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server, 2)
            .fetch(&CancellationToken::new(), LIST, Watermark::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ListsyncError::Protocol(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn fails_fast_on_401() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server, 100)
            .fetch_changed_members(&CancellationToken::new(), LIST, Watermark::default())
            .await
            .unwrap_err();
        match err {
            MailchimpClientError::HttpError { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("expected HttpError, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(MEMBERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = client(&server, 100)
            .fetch(&CancellationToken::new(), LIST, Watermark::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ListsyncError::Protocol(_)));
    }

    #[tokio::test]
    async fn cancelled_fetch_reports_cancelled() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client(&server, 100)
            .fetch(&cancel, LIST, Watermark::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ListsyncError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_during_stalled_body_aborts_promptly() {
        let base = stalled_body_server(200).await;
        let config = MailchimpClientConfig {
            timeout_secs: 8,
            ..test_config(100)
        };
        let client = MailchimpClient::new(config).unwrap().with_base_url(&base);
        let cancel = CancellationToken::new();
        cancel_after(&cancel, 200);

        let started = std::time::Instant::now();
        let err = client
            .fetch(&cancel, LIST, Watermark::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ListsyncError::Cancelled), "got {err:?}");
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}

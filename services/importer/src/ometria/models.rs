use serde::Deserialize;

pub const STATUS_OK: &str = "OK";

/// Body returned by the record ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestResponse {
    /// Number of records accepted.
    pub content: i64,
    pub status: String,
}

impl IngestResponse {
    pub fn accepted_all(&self, sent: usize) -> bool {
        self.status == STATUS_OK && usize::try_from(self.content).ok() == Some(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_count() {
        let resp: IngestResponse = serde_json::from_str(r#"{"content": 2, "status": "OK"}"#).unwrap();
        assert!(resp.accepted_all(2));
    }

    #[test]
    fn rejects_count_mismatch() {
        let resp = IngestResponse { content: 1, status: STATUS_OK.to_string() };
        assert!(!resp.accepted_all(2));
    }

    #[test]
    fn rejects_non_ok_status() {
        let resp = IngestResponse { content: 2, status: "ERROR".to_string() };
        assert!(!resp.accepted_all(2));
    }

    #[test]
    fn negative_content_never_matches() {
        let resp = IngestResponse { content: -1, status: STATUS_OK.to_string() };
        assert!(!resp.accepted_all(0));
    }

    #[test]
    fn missing_fields_fail_to_parse() {
        assert!(serde_json::from_str::<IngestResponse>(r#"{"status": "OK"}"#).is_err());
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a running importer reports about itself on `/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub service: String,
    pub version: String,
    /// Fresh per process; tells restarts apart.
    pub instance_id: Uuid,
    pub mode: String,
    pub jobs: Vec<String>,
    pub period_secs: u64,
}

impl InstanceInfo {
    pub fn new(service: &str, mode: impl ToString) -> Self {
        Self {
            service: service.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            instance_id: Uuid::new_v4(),
            mode: mode.to_string(),
            jobs: Vec::new(),
            period_secs: 0,
        }
    }

    pub fn with_schedule(mut self, jobs: &[String], period_secs: u64) -> Self {
        self.jobs = jobs.to_vec();
        self.period_secs = period_secs;
        self
    }
}

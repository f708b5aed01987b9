use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::models::Record;

/// One page of `GET /lists/{list_id}/members`.
#[derive(Debug, Clone, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub merge_fields: Option<MergeFields>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_changed: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeFields {
    #[serde(rename = "FNAME", default)]
    pub first_name: Option<String>,
    #[serde(rename = "LNAME", default)]
    pub last_name: Option<String>,
}

impl Member {
    /// Unix seconds of `last_changed`, if the member carries one.
    pub fn change_time(&self) -> Option<i64> {
        self.last_changed.map(|t| t.timestamp())
    }

    pub fn to_record(&self) -> Record {
        let merge = self.merge_fields.clone().unwrap_or_default();
        Record {
            id: self.id.clone().unwrap_or_default(),
            firstname: merge.first_name.unwrap_or_default(),
            lastname: merge.last_name.unwrap_or_default(),
            email: self.email_address.clone().unwrap_or_default(),
            status: self.status.clone().unwrap_or_default(),
        }
    }
}

use serde::{Deserialize, Serialize};

/// A contact in the destination's shape. Produced by mapping one source
/// member; lives only for the duration of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub status: String,
}

use serde::{Deserialize, Serialize};

/// Newest change-time (unix seconds) already delivered for one job.
/// `0` means the job has never completed a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub last_update: i64,
}

impl Watermark {
    pub const fn new(last_update: i64) -> Self {
        Self { last_update }
    }

    /// `true` before the first successful sync: fetch everything.
    pub fn is_initial(&self) -> bool {
        self.last_update == 0
    }

    /// The watermark after observing `candidate`; never moves backwards.
    pub fn advance_to(self, candidate: i64) -> Self {
        if candidate > self.last_update {
            Self::new(candidate)
        } else {
            self
        }
    }
}

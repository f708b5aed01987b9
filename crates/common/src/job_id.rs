use crate::error::{ListsyncError, ListsyncResult};

/// Job identifiers double as file names, so reject anything that could escape the state dir.
pub fn validate_job_id(job_id: &str) -> ListsyncResult<()> {
    let valid = !job_id.is_empty()
        && !job_id.starts_with('.')
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ListsyncError::Validation(format!(
            "invalid job identifier '{job_id}'"
        )))
    }
}

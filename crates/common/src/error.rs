use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ListsyncError {
    /// Errors that leave the watermark untouched and are retried by the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_) | Self::Cancelled)
    }
}

pub type ListsyncResult<T> = Result<T, ListsyncError>;

use thiserror::Error;

/// Errors from store adapter operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("unexpected script reply: {0}")]
    UnexpectedReply(String),
}

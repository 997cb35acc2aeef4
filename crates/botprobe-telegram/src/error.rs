/// Errors produced while building probe payloads.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("message text must not be empty")]
    EmptyText,

    #[error("callback data must not be empty")]
    EmptyCallbackData,

    #[error("failed to serialize update: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type PayloadResult<T> = Result<T, PayloadError>;

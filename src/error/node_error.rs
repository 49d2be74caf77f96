use thiserror::Error;

/// Node-level errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    HttpError(String),
    #[error("AbortError: The operation was aborted.")]
    Aborted,
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Connection timeout")]
    ConnectionTimeout,
    #[error("Emit error: {0}")]
    EmitError(String),
    #[error("Expression error: {0}")]
    ExpressionError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}

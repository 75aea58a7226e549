use thiserror::Error;

/// Top-level error type for EmoScan.
///
/// Each variant corresponds to one failure class of the analysis flow. The
/// upload client, the store and the pipeline all report through this type so
/// that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EmoscanError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// No response was received (connect failure, timeout, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The inference service answered with a non-2xx status or reported
    /// `"status": "error"` in its body.
    #[error("Server returned error: {status} - {body}")]
    Server { status: u16, body: String },

    /// The response body could not be decoded into a prediction.
    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Rejected before any I/O (nothing selected, unsupported media, out of
    /// range values).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl EmoscanError {
    /// Short message suitable for a transient notice in the front end.
    pub fn user_message(&self) -> String {
        match self {
            EmoscanError::Network(_) | EmoscanError::Server { .. } => {
                format!("Upload failed: {}", self)
            }
            EmoscanError::Decode(msg) => format!("Error parsing response: {}", msg),
            EmoscanError::InvalidInput(msg) => msg.clone(),
            other => format!("Error: {}", other),
        }
    }
}

impl From<toml::de::Error> for EmoscanError {
    fn from(err: toml::de::Error) -> Self {
        EmoscanError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for EmoscanError {
    fn from(err: toml::ser::Error) -> Self {
        EmoscanError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for EmoscanError {
    fn from(err: serde_json::Error) -> Self {
        EmoscanError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for EmoScan operations.
pub type Result<T> = std::result::Result<T, EmoscanError>;

use thiserror::Error;

/// Crate-wide error type
///
/// Only conditions that abort a negotiation or an API call live here.
/// Retryable signaling failures are reported as diagnostics and never
/// surface as errors.
#[derive(Error, Debug)]
pub enum WhepError {
    #[error("No local description available after ICE gathering")]
    NoLocalDescription,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Media capability error: {0}")]
    Capability(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<webrtc::Error> for WhepError {
    fn from(e: webrtc::Error) -> Self {
        WhepError::Capability(e.to_string())
    }
}

impl From<reqwest::Error> for WhepError {
    fn from(e: reqwest::Error) -> Self {
        WhepError::Signaling(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WhepError>;

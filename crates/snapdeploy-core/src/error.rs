//! Error types for the deploy system.

use thiserror::Error;

/// Errors that can occur during deploy operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Channel query failed or returned an unusable response
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status
    #[error("request failed with status {status}")]
    HttpStatus { status: u16 },

    /// Archive fetch failed
    #[error("archive transfer failed: {0}")]
    Transfer(String),

    /// Archive decode or per-entry write failed
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Settings store read or write failed
    #[error("settings error: {0}")]
    Settings(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Download requested without a pending candidate
    #[error("no pending update to download")]
    NoPendingUpdate,

    /// Snapshot metadata response had no `user_metadata`
    #[error("There was an error fetching the metadata")]
    MetadataUnavailable,

    /// Command invoked with missing or bad arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Caller-facing error code surfaced through the command layer.
    pub fn code(&self) -> &'static str {
        match self {
            DeployError::Network(_) | DeployError::HttpStatus { .. } | DeployError::Json(_) => {
                "DEPLOY_HTTP_ERROR"
            }
            DeployError::Transfer(_) => "DEPLOY_TRANSFER_ERROR",
            DeployError::Extraction(_) => "DEPLOY_EXTRACT_ERROR",
            DeployError::Settings(_) | DeployError::Io(_) => "DEPLOY_IO_ERROR",
            DeployError::Config(_) => "DEPLOY_CONFIG_ERROR",
            DeployError::NoPendingUpdate => "NO_DEPLOY_AVAILABLE",
            DeployError::MetadataUnavailable => "DEPLOY_METADATA_ERROR",
            DeployError::InvalidArgument(_) => "INVALID_ARGUMENTS",
        }
    }
}

impl From<reqwest::Error> for DeployError {
    fn from(err: reqwest::Error) -> Self {
        DeployError::Network(err.to_string())
    }
}

impl From<zip::result::ZipError> for DeployError {
    fn from(err: zip::result::ZipError) -> Self {
        DeployError::Extraction(err.to_string())
    }
}

//! Error types for on-device decisioning
//!
//! Structured error definitions with thiserror. Most of these never escape
//! the crate: artifact and condition failures are logged and degrade to
//! "keep the previous artifact" or "rule did not match". The ones callers
//! see are notification rejections and configuration problems.

use thiserror::Error;

/// Main error type for decisioning operations
#[derive(Error, Debug)]
pub enum DecisioningError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No rule artifact has been published yet
    #[error("Local-decisioning rule set not yet available")]
    ArtifactUnavailable,

    /// Artifact body parsed but is structurally unusable
    #[error("Unable to parse local-decisioning rule set: {0}")]
    InvalidArtifact(String),

    /// Artifact version missing or not of the supported major version
    #[error("Unknown rules version: {}", .0.as_deref().unwrap_or("null"))]
    UnsupportedVersion(Option<String>),

    /// Artifact endpoint answered with an unexpected status
    #[error("Received invalid HTTP response while getting local-decisioning rule set: {status} from {location}")]
    ArtifactFetch { status: u16, location: String },

    /// A rule condition could not be evaluated
    #[error("Hit exception while evaluating local-decisioning rule: {0}")]
    ConditionEvaluation(String),

    /// Notification work queue is at capacity
    #[error("On-device-decisioning notification queue full")]
    NotificationQueueFull,

    /// Notification service not started or already stopped
    #[error("On-device-decisioning notification service is not running")]
    NotificationServiceStopped,

    /// Remote transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for decisioning operations
pub type Result<T> = std::result::Result<T, DecisioningError>;

/// Convert anyhow::Error to DecisioningError
impl From<anyhow::Error> for DecisioningError {
    fn from(err: anyhow::Error) -> Self {
        DecisioningError::Other(err.to_string())
    }
}

impl DecisioningError {
    /// True for failures that only affect the artifact refresh and leave
    /// the currently published artifact in place.
    pub fn is_artifact_error(&self) -> bool {
        matches!(
            self,
            DecisioningError::InvalidArtifact(_)
                | DecisioningError::UnsupportedVersion(_)
                | DecisioningError::ArtifactFetch { .. }
                | DecisioningError::Http(_)
                | DecisioningError::Serialization(_)
        )
    }
}

//! Error taxonomy for client construction and message delivery.

use super::types::{Platform, SendReport};

/// Errors surfaced by adapters, the factory and the client pool.
#[derive(Debug, thiserror::Error)]
pub enum ImError {
    /// Missing or malformed call arguments (empty content, no targets)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Capability not offered by the platform
    #[error("{platform} does not support {operation}")]
    UnsupportedOperation {
        platform: Platform,
        operation: &'static str,
    },

    /// Credential endpoint call failed
    #[error("failed to refresh {platform} access token: {reason}")]
    TokenRefresh { platform: Platform, reason: String },

    /// The HTTP call itself could not complete
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with a failure envelope
    #[error("{platform} API error {code}: {message}")]
    PlatformApi {
        platform: Platform,
        code: i64,
        message: String,
    },

    /// Response body could not be parsed
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// One or more targets exhausted their retries
    #[error("partial send failure: {0}")]
    PartialSend(SendReport),

    #[error("invalid config: {0}")]
    ConfigValidation(String),

    #[error("config platform {actual} does not match requested platform {expected}")]
    ConfigTypeMismatch { expected: Platform, actual: Platform },

    #[error("unsupported platform: {0}")]
    UnknownPlatform(String),

    #[error("client pool is closed")]
    PoolClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImError {
    /// Whether a failed delivery attempt may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ImError::TokenRefresh { .. }
                | ImError::Transport(_)
                | ImError::PlatformApi { .. }
                | ImError::Decode(_)
        )
    }

    pub fn partial_report(&self) -> Option<&SendReport> {
        match self {
            ImError::PartialSend(report) => Some(report),
            _ => None,
        }
    }

    pub(crate) fn unsupported(platform: Platform, operation: &'static str) -> Self {
        ImError::UnsupportedOperation {
            platform,
            operation,
        }
    }
}

impl From<reqwest::Error> for ImError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs can carry bot tokens and secrets
        ImError::Transport(err.without_url().to_string())
    }
}

impl From<serde_json::Error> for ImError {
    fn from(err: serde_json::Error) -> Self {
        ImError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImError>;

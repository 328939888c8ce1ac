//! Error types for TideSense voice guidance

use std::time::Duration;

use thiserror::Error;

/// Result type alias for voice guidance operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving or playing voice guidance
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Guidance text was empty after normalization
    #[error("guidance text is empty")]
    EmptyText,

    /// No credentials for the remote synthesis service
    #[error("synthesis not configured: {0}")]
    Unconfigured(String),

    /// Remote service rejected the request with a rate limit
    #[error("synthesis rate limited: {0}")]
    RateLimited(String),

    /// Remote service failed or returned an unusable response
    #[error("synthesis service error: {0}")]
    Service(String),

    /// Remote call exceeded its time budget
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    /// Local artifact persistence failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Device audio or speech engine failure
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error came from the remote synthesis path
    ///
    /// These are absorbed by the cache orchestrator and answered with the
    /// local speech fallback.
    #[must_use]
    pub const fn is_synthesis_failure(&self) -> bool {
        matches!(
            self,
            Self::Unconfigured(_)
                | Self::RateLimited(_)
                | Self::Service(_)
                | Self::Timeout(_)
                | Self::Http(_)
        )
    }

    /// Whether a retry later might succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Service(_) | Self::Timeout(_) | Self::Http(_)
        )
    }
}

//! Error types for reapctl
//!
//! Two error types: `ReapError` (main error enum) and `ConfigError`
//! (configuration-specific).
//!
//! ## Error Handling Philosophy
//!
//! Library code uses `crate::error::Result<T>` which returns `ReapError`.
//! CLI code uses `anyhow::Result<T>` for top-level error handling. The
//! conversion happens at the CLI boundary via `anyhow::Error::from`, which
//! preserves error chains.
//!
//! ## Retry Awareness
//!
//! Errors implement `IsRetryable` so the `RetryPolicy` in `src/retry.rs`
//! can decide whether to retry. Only `ProviderUnavailable`, `Io`, and
//! `Retryable` are retryable; those cover transient network or throttling
//! failures when talking to the inventory and metrics providers.
//!
//! Termination errors are deliberately NOT retryable here. Termination is
//! the one destructive operation this tool performs; retrying the batch
//! call is left as caller policy rather than something the error type
//! opts into.
//!
//! ## When to Use Which Error
//!
//! - `ConfigError`: configuration parsing and validation issues,
//!   auto-converted to `ReapError::Config` via `#[from]`
//! - `ProviderUnavailable`: transient failure of an inventory or metrics
//!   read; a single instance's metric failure downgrades to a "no data"
//!   decision, this variant surfaces only when the whole read path is down
//! - `Aws`: AWS-specific context for a failed SDK call
//! - `TerminationFailed`: the batch terminate call itself failed; nothing
//!   is assumed terminated

use thiserror::Error;

/// Main error type for reapctl
#[derive(Error, Debug)]
pub enum ReapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider unavailable: {provider} - {message}")]
    ProviderUnavailable {
        provider: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("AWS SDK error: {0}")]
    Aws(String),

    #[error("Termination request failed: {message}")]
    TerminationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Retryable error (attempt {attempt}/{max_attempts}): {reason}")]
    Retryable {
        attempt: u32,
        max_attempts: u32,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ReapError>;

/// Trait for determining if an error is retryable
///
/// Used by `RetryPolicy` implementations to determine whether an error
/// should trigger a retry attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ReapError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReapError::Retryable { .. }
                | ReapError::ProviderUnavailable { .. }
                | ReapError::Io(_)
        )
    }
}

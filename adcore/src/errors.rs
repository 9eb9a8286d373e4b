//! Error types for AdCore.
//!
//! Ad failures are recoverable by definition: a unit that failed to load
//! simply is not ready, and the next `ensure_loaded` starts over. The error
//! types exist so callers that care (logging, tests, the coordinator) can
//! tell the failure modes apart.
//!
//! # Error Categories
//!
//! - **AdError**: load/show failures reported by the lifecycle manager
//! - **StorageError**: key-value persistence failures and malformed values
//! - **ConfigError**: invalid configuration documents
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use adcore::errors::AdError;
//!
//! match interstitial.ensure_loaded(None).await {
//!     Ok(()) => show_button_enabled(),
//!     Err(AdError::LoadTimeout { .. }) => show_button_loading(),
//!     Err(other) => tracing::debug!(error = %other, "ad not ready"),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::types::AdFormat;

/// Errors produced by an ad unit.
///
/// `AdError` is `Clone` because a single in-flight load is shared by every
/// caller awaiting it, and each of them receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdError {
    /// The unit did not reach `Loaded` before the deadline.
    ///
    /// The underlying SDK request is not cancelled; a late LOADED event still
    /// marks the unit ready.
    #[error("{format} ad did not load within {timeout:?}")]
    LoadTimeout {
        /// Ad format of the unit that timed out
        format: AdFormat,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// The ad network reported a load or presentation failure.
    #[error("ad network error: {0}")]
    Adapter(String),

    /// The ad SDK could not be initialised (e.g. missing native module).
    #[error("ad module unavailable: {0}")]
    ModuleUnavailable(String),

    /// The unit was cleaned up while the caller was waiting on it.
    #[error("ad unit was disposed")]
    Disposed,
}

impl AdError {
    /// Whether a later `ensure_loaded` may reasonably succeed.
    ///
    /// Only a missing SDK module is permanent for the lifetime of the process.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ModuleUnavailable(_))
    }
}

/// Errors from the persisted key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The backend failed to read or write.
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// A persisted value could not be parsed.
    #[error("malformed value for '{key}': {detail}")]
    Malformed {
        /// Storage key holding the value
        key: String,
        /// Parser diagnostic
        detail: String,
    },
}

/// Errors raised while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document is not valid JSON or violates a bound.
    #[error("invalid ad configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    /// An ad unit identifier was empty.
    #[error("invalid ad unit id: {0}")]
    UnitId(String),
}

/// Result alias for ad operations.
pub type AdResult<T> = Result<T, AdError>;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

//! Error types for Turnstile.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations.
///
/// Store failures during a decision never surface here; the limiter
/// fails open on them. Only configuration problems and startup failures
/// are reported through this type.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate with a zero limit or window
    #[error("Invalid rate config: limit={limit}, window={window}")]
    InvalidRateConfig { limit: u64, window: u64 },

    /// No identity strategy produced a value for the route
    #[error("No identity could be resolved for route {route}")]
    MissingIdentity { route: String },

    /// No rate strategy produced a value for the route
    #[error("No rate could be resolved for route {route}")]
    MissingRate { route: String },

    /// The increment script could not be registered with the store
    #[error("Failed to load counter script: {0}")]
    ScriptLoad(#[source] StoreError),

    /// A decision was requested before `Limiter::initialize` succeeded
    #[error("Limiter has not been initialized")]
    NotInitialized,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

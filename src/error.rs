//! Custom error types for diary-pilot.
//!
//! This module provides the shared failure taxonomy used by the locator, the
//! submission state machine and the provider fallback chain.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for diary-pilot operations
#[derive(Error, Debug)]
pub enum PilotError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Locator Errors
    // =========================================================================
    /// Every tier of the self-healing locator failed
    #[error("All selectors exhausted for '{field}'. Tried {attempted} strategies + heuristic")]
    LocatorExhausted { field: String, attempted: usize },

    // =========================================================================
    // Submission Errors
    // =========================================================================
    /// The portal reports the date as already filled in
    #[error("Date {date} appears to be already submitted")]
    AlreadySubmitted { date: String },

    /// The entry form never appeared, even after re-running the selection flow
    #[error("Date {date}: form failed to load after retry: {message}")]
    FatalForm { date: String, message: String },

    /// Login could not be completed
    #[error("Login failed: {message}")]
    Login { message: String },

    /// A browser automation command failed
    #[error("Driver error during {operation}: {message}")]
    Driver { operation: String, message: String },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// No inference backend has a usable credential
    #[error("No LLM providers available. Set at least one API key or pass credentials explicitly")]
    NoProvidersAvailable,

    /// Every provider in the chain was tried without success
    #[error("All providers exhausted. Tried: {attempted:?}")]
    AllProvidersExhausted { attempted: Vec<String> },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// HTTP transport error wrapper
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PilotError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a driver error
    pub fn driver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a login error
    pub fn login(message: impl Into<String>) -> Self {
        Self::Login {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error marks an entry as skipped rather than failed
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::AlreadySubmitted { .. })
    }

    /// Short tag used when naming failure screenshots
    pub fn screenshot_context(&self) -> &'static str {
        match self {
            Self::LocatorExhausted { .. } => "locator_exhausted",
            Self::FatalForm { .. } => "form_error",
            Self::Login { .. } => "login_error",
            Self::Driver { .. } => "driver_error",
            _ => "error",
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoProvidersAvailable | Self::AllProvidersExhausted { .. } => 3,
            Self::Login { .. } => 4,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for diary-pilot results
pub type Result<T> = std::result::Result<T, PilotError>;

/// Extension trait for converting foreign errors to [`PilotError`]
pub trait IntoPilotError<T> {
    fn into_pilot_config(self) -> Result<T>;
    fn into_pilot_driver(self, operation: &str) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoPilotError<T> for std::result::Result<T, E> {
    fn into_pilot_config(self) -> Result<T> {
        self.map_err(|e| PilotError::config(e.into().to_string()))
    }

    fn into_pilot_driver(self, operation: &str) -> Result<T> {
        self.map_err(|e| PilotError::driver(operation, e.into().to_string()))
    }
}

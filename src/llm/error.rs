//! Provider failure classification.
//!
//! Every backend maps its failures onto [`ProviderError`], and the fallback
//! chain only ever asks one question of an error: what [`Outcome`] it implies.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::retry::backoff_delay;

/// Body markers that identify an exhausted account rather than a burst limit.
const QUOTA_MARKERS: &[&str] = &["quota", "rate_limit", "resource_exhausted"];

const INVALID_KEY_MARKER: &str = "invalid_api_key";
const PAYMENT_MARKER: &str = "payment_required";

/// Base of the exponential delay between attempts on the same provider.
pub const ATTEMPT_BACKOFF_BASE: f64 = 2.0;

/// How a provider call ended, as far as the fallback chain is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Worth retrying on the same provider.
    Transient,
    /// The provider is unusable for this run; move on.
    Fatal,
}

impl Outcome {
    /// Classify a finished call.
    pub fn of<T>(result: &Result<T, ProviderError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.outcome(),
        }
    }
}

/// Errors returned by a single inference backend.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Credential rejected (401/403 or an invalid-key body).
    #[error("Authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    /// Billing problem on the account (402).
    #[error("Payment required: {message}")]
    Payment { message: String },

    /// The request is larger than the backend accepts (413).
    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    /// Account-level limit reached; retrying soon will not help.
    #[error("Quota exhausted: {message}")]
    QuotaExhausted { message: String },

    /// Short-term throttling (bare 429).
    #[error("Throttled: {message}")]
    Throttled {
        message: String,
        /// Wait suggested by the backend, when the body names one.
        retry_after: Option<Duration>,
    },

    /// Server-side failure (5xx).
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Any other rejected request (4xx). Retried on the same provider;
    /// only the statuses and markers above end a provider's turn.
    #[error("Invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    /// The connection could not be made or broke mid-request.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No response within the client timeout.
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    /// The envelope around the generated text was not what the API documents.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },
}

impl ProviderError {
    /// Map an HTTP status and response body onto an error.
    pub fn from_response(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        let message = body.trim().to_string();

        if lower.contains(INVALID_KEY_MARKER) {
            return Self::Authentication { status, message };
        }
        if lower.contains(PAYMENT_MARKER) {
            return Self::Payment { message };
        }

        match status {
            401 | 403 => Self::Authentication { status, message },
            402 => Self::Payment { message },
            413 => Self::PayloadTooLarge { message },
            429 if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) => {
                Self::QuotaExhausted { message }
            }
            429 => Self::Throttled {
                retry_after: retry_after_hint(&lower),
                message,
            },
            500..=599 => Self::Server { status, message },
            _ => Self::InvalidRequest { status, message },
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Throttled { .. }
            | Self::Server { .. }
            | Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::MalformedResponse { .. }
            | Self::InvalidRequest { .. } => Outcome::Transient,
            Self::Authentication { .. }
            | Self::Payment { .. }
            | Self::PayloadTooLarge { .. }
            | Self::QuotaExhausted { .. } => Outcome::Fatal,
        }
    }

    /// Delay before the next attempt on the same provider.
    ///
    /// Throttling waits `throttle_delay`, or less when the backend says so;
    /// everything else backs off exponentially from one second.
    pub fn retry_delay(&self, attempt: u32, throttle_delay: Duration) -> Duration {
        match self {
            Self::Throttled { retry_after, .. } => retry_after
                .map_or(throttle_delay, |hint| hint.min(throttle_delay)),
            _ => backoff_delay(ATTEMPT_BACKOFF_BASE, attempt),
        }
    }
}

/// Parse "try again in 7.5s" / "retry after 20 seconds" style hints.
fn retry_after_hint(body: &str) -> Option<Duration> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let re = PATTERN
        .get_or_init(|| {
            Regex::new(r"(?:try again in|retry[ _-]?after)[:\s]*([0-9]+(?:\.[0-9]+)?)\s*s").ok()
        })
        .as_ref()?;
    let secs: f64 = re.captures(body)?.get(1)?.as_str().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                message: e.to_string(),
            }
        } else if e.is_decode() {
            Self::MalformedResponse {
                message: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            Self::from_response(status.as_u16(), &e.to_string())
        } else {
            Self::Connection {
                message: e.to_string(),
            }
        }
    }
}

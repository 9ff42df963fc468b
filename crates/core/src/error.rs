//! Error taxonomy for the trading core.
//!
//! Transport-independent kinds with classification helpers so the engine can
//! decide between retry, warn-and-continue, and session-fatal handling.

use thiserror::Error;

/// Errors surfaced by an exchange adapter.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Authentication or signature failure. Fatal for the session.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request deadline exceeded.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Non-success HTTP status outside the exchange envelope.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        message: String,
    },

    /// Exchange envelope error that maps to no more specific kind.
    #[error("exchange error: [{code}] {message}")]
    Exchange { code: String, message: String },

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    /// Unknown trading symbol.
    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    /// Order rejected: not enough margin.
    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    /// Order rejected: size outside the symbol's bounds.
    #[error("invalid order size: {0}")]
    InvalidSize(String),

    /// Position to close does not exist (already closed).
    #[error("position not found: {position_id}")]
    PositionNotFound { position_id: String },

    /// Malformed response payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Client-side configuration problem.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ExchangeError {
    /// Transient failures are retried (by the adapter internally, or by the
    /// engine on the next tick); everything else is surfaced as-is.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            Self::Exchange { code, .. } => {
                matches!(code.as_str(), "50000" | "40034" | "40001")
            }
            _ => false,
        }
    }

    /// Authentication-class failures terminate the session.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Suggested delay before the next attempt, if retrying makes sense.
    #[must_use]
    pub fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_secs } => Some(*retry_after_secs),
            Self::Network(_) | Self::Timeout(_) => Some(1),
            Self::Api { status_code, .. } if *status_code >= 500 => Some(2),
            Self::Exchange { code, .. } if matches!(code.as_str(), "50000" | "40034" | "40001") => {
                Some(2)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Session configuration rejection. All problems are collected before the
/// error is produced so the caller sees everything at once.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid session configuration: {}", .errors.join("; "))]
    Invalid { errors: Vec<String> },
}

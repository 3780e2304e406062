//! Unified error type for the options explorer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Quote API error (status={status}): {message}")]
    QuoteApi { status: u16, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Rate limited — retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Candidate contract violation: {0}")]
    ContractViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transport failure while `context` was in progress. The cause chain
    /// (DNS, TLS, socket) is flattened into the message.
    pub fn transport(context: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = format!("{}: {}", context, err);
        let mut source = err.source();
        while let Some(cause) = source {
            let cause_msg = cause.to_string();
            if !cause_msg.is_empty() && !message.contains(&cause_msg) {
                message.push_str(" <- ");
                message.push_str(&cause_msg);
            }
            source = cause.source();
        }
        Error::Http(message)
    }

    /// Whether a single retry with backoff is worth attempting.
    ///
    /// Transport failures, timeouts, throttling and 5xx responses are
    /// transient. A 4xx from the quoting API is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout { .. } | Error::RateLimited { .. } => true,
            Error::QuoteApi { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Fatal errors abort a whole batch instead of annotating one row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ContractViolation(_) | Error::Config(_))
    }
}

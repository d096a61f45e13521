//! Error taxonomy.
//!
//! [`HarnessError`] is what callers of the cache, search engine and tools
//! see: a stable kind plus a human-readable summary. [`RemoteError`] is the
//! remote client's own error and carries the HTTP status and Notion error
//! code for logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// First enumeration page failed, or no remote call could be made.
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// The integration token is not set. Fatal at startup.
    #[error("credential missing: set the {0} environment variable")]
    CredentialMissing(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Every search strategy that was attempted failed to run.
    #[error("no search strategy could run for query '{0}'")]
    NoStrategyAvailable(String),

    /// The remote rejected a create or update.
    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl HarnessError {
    /// Machine-readable code used in tool error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::RemoteUnavailable(_) => "remote_unavailable",
            HarnessError::CredentialMissing(_) => "credential_missing",
            HarnessError::NotFound(_) => "not_found",
            HarnessError::NoStrategyAvailable(_) => "no_strategy_available",
            HarnessError::WriteFailed(_) => "write_failed",
            HarnessError::InvalidInput(_) => "invalid_input",
        }
    }
}

/// A failed call against the remote service.
#[derive(Debug, Error, Clone)]
#[error("{}", display_remote(.status, .code, .message))]
pub struct RemoteError {
    /// HTTP status, if a response was received at all.
    pub status: Option<u16>,
    /// Notion error code (`rate_limited`, `object_not_found`, ...) or a
    /// local classification such as `network` or `timeout`.
    pub code: String,
    pub message: String,
}

fn display_remote(status: &Option<u16>, code: &str, message: &str) -> String {
    match status {
        Some(s) => format!("remote error {} ({}): {}", s, code, message),
        None => format!("remote error ({}): {}", code, message),
    }
}

impl RemoteError {
    pub fn new(status: Option<u16>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(None, "network", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(None, "timeout", message)
    }

    /// A response body that did not match the expected shape.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(None, "decode", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Some(404), "object_not_found", message)
    }

    /// 429 and 5xx responses and network failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            Some(s) => s == 429 || s >= 500,
            None => self.code == "network" || self.code == "timeout",
        }
    }
}

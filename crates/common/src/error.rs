//! Unified error type for field-sync.
//!
//! Every variant carries owned strings so the type is `Clone`: one renewal
//! failure is delivered to every caller queued on it.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Authorization expired (status={status})")]
    AuthExpired { status: u16 },

    #[error("Credential renewal rejected (status={status}): {message}")]
    RenewalFailed { status: u16, message: String },

    #[error("Credential renewal network error: {0}")]
    RenewalNetworkError(String),

    #[error("Invalid geometry for field {field}: {reason}")]
    InvalidGeometry { field: String, reason: String },

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("API error (status={status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Json(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Both renewal variants end the session; callers treat them alike.
    pub fn is_renewal_failure(&self) -> bool {
        matches!(
            self,
            Error::RenewalFailed { .. } | Error::RenewalNetworkError(_)
        )
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::AuthExpired { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

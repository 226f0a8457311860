//! Error types for Lodestone core

use lodestone_types::{TaskError, TaskErrorKind};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while resolving and downloading a version
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("SHA-1 mismatch: expected {expected}, found {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Invalid version descriptor: {0}")]
    Descriptor(String),

    #[error("Inheritance cycle at version {0}")]
    InheritanceCycle(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Timeout")]
    Timeout,
}

impl DownloadError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_)
            | DownloadError::Timeout
            | DownloadError::Io(_)
            | DownloadError::SizeMismatch { .. }
            | DownloadError::HashMismatch { .. }
            | DownloadError::ServerError { .. } => true,
            _ => false,
        }
    }

    /// Integrity failures discard the partial file before retrying
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            DownloadError::SizeMismatch { .. } | DownloadError::HashMismatch { .. }
        )
    }

    /// Convert into the serializable error attached to task progress
    pub fn to_task_error(&self) -> TaskError {
        let kind = match self {
            DownloadError::Network(_) | DownloadError::Timeout => TaskErrorKind::Network,
            DownloadError::ServerError { .. } => TaskErrorKind::Http,
            DownloadError::SizeMismatch { .. } | DownloadError::HashMismatch { .. } => {
                TaskErrorKind::Integrity
            }
            DownloadError::Io(_) => TaskErrorKind::Io,
            DownloadError::Cancelled => TaskErrorKind::Cancelled,
            _ => TaskErrorKind::Other,
        };
        TaskError {
            kind,
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DownloadError::Timeout
        } else if let Some(status) = error.status() {
            DownloadError::ServerError {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            DownloadError::Network(error.to_string())
        }
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(error: serde_json::Error) -> Self {
        DownloadError::Descriptor(error.to_string())
    }
}

// Allow converting to String for UI layers
impl From<DownloadError> for String {
    fn from(error: DownloadError) -> Self {
        error.to_string()
    }
}

/// Reason an XSTS authorization was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XstsDenial {
    /// The Microsoft account has no Xbox profile yet
    NoXboxAccount,
    /// Xbox Live is not available in the account's country
    RegionUnavailable,
    /// South Korean accounts need adult verification
    AdultVerificationRequired,
    /// Child accounts must be added to a family by an adult
    ChildAccount,
    Unknown(u64),
}

impl XstsDenial {
    pub fn from_code(code: u64) -> Self {
        match code {
            2_148_916_233 => XstsDenial::NoXboxAccount,
            2_148_916_235 => XstsDenial::RegionUnavailable,
            2_148_916_236 | 2_148_916_237 => XstsDenial::AdultVerificationRequired,
            2_148_916_238 => XstsDenial::ChildAccount,
            other => XstsDenial::Unknown(other),
        }
    }
}

impl fmt::Display for XstsDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XstsDenial::NoXboxAccount => write!(f, "the account has no Xbox profile"),
            XstsDenial::RegionUnavailable => {
                write!(f, "Xbox Live is unavailable in the account's region")
            }
            XstsDenial::AdultVerificationRequired => {
                write!(f, "the account needs adult verification")
            }
            XstsDenial::ChildAccount => {
                write!(f, "child accounts must be added to a family")
            }
            XstsDenial::Unknown(code) => write!(f, "XErr {}", code),
        }
    }
}

/// Errors that can occur during the login chain
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("OAuth error: {error} - {description}")]
    OAuth { error: String, description: String },

    #[error("The user declined the authorization request")]
    AuthorizationDeclined,

    #[error("The device code was not recognised")]
    BadVerificationCode,

    #[error("The device code has expired")]
    ExpiredToken,

    #[error("XSTS authorization denied: {0}")]
    XstsDenied(XstsDenial),

    #[error("The account does not own the game")]
    NotOwned,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Login was cancelled")]
    Cancelled,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl AuthError {
    /// Terminal errors are never retried by the login chain
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthError::Network(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        AuthError::Network(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        AuthError::InvalidResponse(error.to_string())
    }
}

impl From<AuthError> for String {
    fn from(error: AuthError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failures_are_retryable() {
        let err = DownloadError::HashMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(err.is_retryable());
        assert!(err.is_integrity());
        assert_eq!(err.to_task_error().kind, TaskErrorKind::Integrity);
    }

    #[test]
    fn every_http_status_is_retryable() {
        for status in [403, 404, 410, 429, 503] {
            let err = DownloadError::ServerError {
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "status {}", status);
        }
        assert!(!DownloadError::InvalidUrl("nope".into()).is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn xsts_codes_map_to_denials() {
        assert_eq!(XstsDenial::from_code(2148916233), XstsDenial::NoXboxAccount);
        assert_eq!(XstsDenial::from_code(2148916238), XstsDenial::ChildAccount);
        assert_eq!(XstsDenial::from_code(42), XstsDenial::Unknown(42));
    }
}

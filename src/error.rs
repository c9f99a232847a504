use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Auth(String),
    Protocol(String),
    Timeout,
    NotConnected,
    Json(serde_json::Error),
    Io(std::io::Error),
    UnknownStatus(String),
    ReadOnly(String),
    InvalidValue { key: String, reason: String },
    InvalidConfig(String),
}

impl Error {
    /// Authentication failures are terminal for the session and need new
    /// credentials; everything else is worth retrying later.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::NotConnected => write!(f, "not logged in"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::UnknownStatus(id) => write!(f, "unknown status: {id}"),
            Error::ReadOnly(key) => write!(f, "field is read-only: {key}"),
            Error::InvalidValue { key, reason } => write!(f, "invalid value for {key}: {reason}"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Http(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed poll cycle as seen by its driver. Previously published
/// data stays valid in both cases.
#[derive(Debug)]
pub enum UpdateError {
    /// Credentials were rejected on every attempt; ask for re-authentication.
    AuthFailed(Error),
    /// Connectivity or vendor-side failure; keep polling.
    UpdateFailed(Error),
}

impl UpdateError {
    pub fn inner(&self) -> &Error {
        match self {
            UpdateError::AuthFailed(e) | UpdateError::UpdateFailed(e) => e,
        }
    }
}

impl From<Error> for UpdateError {
    fn from(e: Error) -> Self {
        if e.is_auth() {
            UpdateError::AuthFailed(e)
        } else {
            UpdateError::UpdateFailed(e)
        }
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::AuthFailed(e) => write!(f, "re-authentication required: {e}"),
            UpdateError::UpdateFailed(e) => write!(f, "update failed: {e}"),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner())
    }
}

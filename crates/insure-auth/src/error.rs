//! Error types for session storage and auth payload parsing

/// Errors from token persistence and auth response parsing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("session parse error: {0}")]
    Parse(String),

    #[error("invalid auth response: {0}")]
    InvalidResponse(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error taxonomy shared by every stage of the pipeline
//!
//! `AppError` is the only error a caller ever sees. Raw transport failures
//! (`TransportError`) stop at the end of the chain, where the classifier turns
//! them into an `AppError` with status 0.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed set of error categories surfaced to callers and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkError,
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    BusinessRuleViolation,
    TimeoutError,
    ServerError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::NetworkError,
        ErrorCode::ValidationError,
        ErrorCode::Unauthorized,
        ErrorCode::Forbidden,
        ErrorCode::NotFound,
        ErrorCode::Conflict,
        ErrorCode::BusinessRuleViolation,
        ErrorCode::TimeoutError,
        ErrorCode::ServerError,
    ];

    /// Wire name, e.g. `BUSINESS_RULE_VIOLATION`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::ServerError => "SERVER_ERROR",
        }
    }

    /// Parse a wire name sent by the server. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized failure of one logical request.
///
/// Built once by the classifier and never mutated afterwards; stages that need
/// to hand the same failure to several parties clone it.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code} ({status_code}) on {method} {path}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub message_localized: String,
    /// HTTP status, or 0 when no response was received.
    pub status_code: u16,
    pub path: String,
    pub method: String,
    /// Unix milliseconds at classification time.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    /// The server answered 401. A body code alone does not count.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }
}

/// A request that produced no HTTP response at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP request failed: {0}")]
    Http(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(Duration::ZERO)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_wire_names() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, serde_json::Value::String(code.as_str().into()));
        }
        assert_eq!(ErrorCode::parse("TEAPOT"), None);
    }

    #[test]
    fn app_error_serializes_camel_case() {
        let err = AppError {
            code: ErrorCode::NotFound,
            message: "Policy not found".into(),
            message_localized: "ไม่พบกรมธรรม์".into(),
            status_code: 404,
            path: "/policies/9".into(),
            method: "GET".into(),
            timestamp: 1,
            details: None,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["messageLocalized"], "ไม่พบกรมธรรม์");
        assert_eq!(json["statusCode"], 404);
        assert!(json.get("details").is_none());
        assert_eq!(
            err.to_string(),
            "NOT_FOUND (404) on GET /policies/9: Policy not found"
        );
    }
}

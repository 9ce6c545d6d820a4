//! User-facing notifications for failed requests
//!
//! The pipeline never shows errors itself; it turns each surfaced `AppError`
//! into a `Notification` and hands it to a `NotificationSink` supplied by the
//! application (toast/snackbar in a UI, stderr in the CLI).

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, ErrorCode};

/// Codes that never produce a notification. A 401 is recovered or turned into
/// a logout by the auth middleware, which owns that user experience.
pub const SILENT_CODES: &[ErrorCode] = &[ErrorCode::Unauthorized];

pub const LONG: Duration = Duration::from_secs(8);
pub const MEDIUM: Duration = Duration::from_secs(5);
pub const SHORT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Action the user can take from the notification itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub message_localized: String,
    #[serde(serialize_with = "as_millis")]
    pub duration: Duration,
    pub action: Option<NotificationAction>,
}

impl Notification {
    /// Severity, duration, and action for an error:
    ///
    /// - network/timeout: error with a retry action, shown long
    /// - validation: warning, medium
    /// - forbidden/not found: info, short
    /// - everything else: error, medium, no action
    pub fn for_error(error: &AppError) -> Self {
        let (severity, duration, action) = match error.code {
            ErrorCode::NetworkError | ErrorCode::TimeoutError => {
                (Severity::Error, LONG, Some(NotificationAction::Retry))
            }
            ErrorCode::ValidationError => (Severity::Warning, MEDIUM, None),
            ErrorCode::Forbidden | ErrorCode::NotFound => (Severity::Info, SHORT, None),
            _ => (Severity::Error, MEDIUM, None),
        };
        Self {
            code: error.code,
            severity,
            message: error.message.clone(),
            message_localized: error.message_localized.clone(),
            duration,
            action,
        }
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(duration.as_millis() as u64)
}

pub fn is_silent(code: ErrorCode) -> bool {
    SILENT_CODES.contains(&code)
}

/// Receives notifications for display.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that only logs, for headless use.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => {
                info!(code = %notification.code, message = %notification.message, "notification")
            }
            Severity::Warning | Severity::Error => {
                warn!(code = %notification.code, message = %notification.message, "notification")
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::request::ApiRequest;

    fn notification_for(status: u16) -> Notification {
        let error = classify(status, &serde_json::Value::Null, &ApiRequest::get("/claims"));
        Notification::for_error(&error)
    }

    #[test]
    fn network_and_timeout_offer_retry() {
        for status in [0, 408, 504] {
            let n = notification_for(status);
            assert_eq!(n.severity, Severity::Error);
            assert_eq!(n.action, Some(NotificationAction::Retry));
            assert_eq!(n.duration, LONG);
        }
    }

    #[test]
    fn validation_is_a_warning() {
        let n = notification_for(400);
        assert_eq!(n.severity, Severity::Warning);
        assert_eq!(n.duration, MEDIUM);
        assert_eq!(n.action, None);
    }

    #[test]
    fn forbidden_and_not_found_are_informational() {
        for status in [403, 404] {
            let n = notification_for(status);
            assert_eq!(n.severity, Severity::Info);
            assert_eq!(n.duration, SHORT);
        }
    }

    #[test]
    fn other_errors_are_generic() {
        for status in [409, 422, 500] {
            let n = notification_for(status);
            assert_eq!(n.severity, Severity::Error);
            assert_eq!(n.action, None);
        }
    }

    #[test]
    fn only_unauthorized_is_silent() {
        assert!(is_silent(ErrorCode::Unauthorized));
        assert!(!is_silent(ErrorCode::Forbidden));
        assert!(!is_silent(ErrorCode::NetworkError));
    }

    #[test]
    fn serializes_duration_as_millis() {
        let json = serde_json::to_value(notification_for(404)).unwrap();
        assert_eq!(json["duration"], 3000);
        assert_eq!(json["severity"], "info");
        assert_eq!(json["code"], "NOT_FOUND");
    }
}

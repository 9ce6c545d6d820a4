//! Terminal renderings of notifications and session expiry

use request_pipeline::{
    AppError, Notification, NotificationAction, NotificationSink, SessionListener, Severity,
};
use tracing::warn;

/// Prints notifications to stderr, English first with the Thai text after.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl NotificationSink for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        eprintln!("{}", render(&notification));
    }
}

fn render(notification: &Notification) -> String {
    let label = match notification.severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
    };
    let mut line = format!(
        "[{label}] {} / {}",
        notification.message, notification.message_localized
    );
    if notification.action == Some(NotificationAction::Retry) {
        line.push_str(" (run the command again to retry)");
    }
    line
}

#[derive(Debug, Default)]
pub struct ConsoleSessionListener;

impl SessionListener for ConsoleSessionListener {
    fn session_expired(&self, error: &AppError) {
        warn!(code = %error.code, reason = %error.message, "session expired");
        eprintln!("Session expired: {}. Log in again with `insure login`.", error.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use request_pipeline::{ApiRequest, classify};
    use serde_json::Value;

    #[test]
    fn network_errors_mention_retry() {
        let error = classify(0, &Value::Null, &ApiRequest::get("/policies"));
        let line = render(&Notification::for_error(&error));
        assert!(line.starts_with("[error] "), "got: {line}");
        assert!(line.ends_with("(run the command again to retry)"));
        assert!(line.contains(&error.message_localized));
    }

    #[test]
    fn not_found_is_info_without_retry() {
        let error = classify(404, &Value::Null, &ApiRequest::get("/claims/9"));
        let line = render(&Notification::for_error(&error));
        assert!(line.starts_with("[info] "));
        assert!(!line.contains("retry"));
    }
}

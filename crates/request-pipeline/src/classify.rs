//! Error classification for failed API calls
//!
//! Maps an HTTP status (or the absence of a response) to an `ErrorCode`, then
//! lets a structured server error body override the defaults. Every result
//! carries a bilingual message pair, English plus Thai, so a notification can
//! always be shown in the user's language.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AppError, ErrorCode, TransportError};
use crate::request::ApiRequest;

/// Default code for an HTTP status. Status 0 means no response was received.
pub fn default_code(status: u16) -> ErrorCode {
    match status {
        0 => ErrorCode::NetworkError,
        400 => ErrorCode::ValidationError,
        401 => ErrorCode::Unauthorized,
        403 => ErrorCode::Forbidden,
        404 => ErrorCode::NotFound,
        409 => ErrorCode::Conflict,
        422 => ErrorCode::BusinessRuleViolation,
        408 | 504 => ErrorCode::TimeoutError,
        _ => ErrorCode::ServerError,
    }
}

/// Built-in `(english, thai)` messages used when the server sends none.
pub fn default_messages(code: ErrorCode) -> (&'static str, &'static str) {
    match code {
        ErrorCode::NetworkError => (
            "Unable to reach the server. Please check your connection.",
            "ไม่สามารถเชื่อมต่อกับเซิร์ฟเวอร์ได้ กรุณาตรวจสอบการเชื่อมต่อ",
        ),
        ErrorCode::ValidationError => (
            "Some of the submitted information is invalid.",
            "ข้อมูลที่ส่งไม่ถูกต้อง กรุณาตรวจสอบอีกครั้ง",
        ),
        ErrorCode::Unauthorized => (
            "Your session has expired. Please sign in again.",
            "เซสชันหมดอายุ กรุณาเข้าสู่ระบบอีกครั้ง",
        ),
        ErrorCode::Forbidden => (
            "You do not have permission to perform this action.",
            "คุณไม่มีสิทธิ์ดำเนินการนี้",
        ),
        ErrorCode::NotFound => (
            "The requested item could not be found.",
            "ไม่พบข้อมูลที่ร้องขอ",
        ),
        ErrorCode::Conflict => (
            "This change conflicts with an existing record.",
            "ข้อมูลขัดแย้งกับรายการที่มีอยู่แล้ว",
        ),
        ErrorCode::BusinessRuleViolation => (
            "The request cannot be completed under the current policy rules.",
            "ไม่สามารถดำเนินการได้ตามเงื่อนไขที่กำหนด",
        ),
        ErrorCode::TimeoutError => (
            "The server took too long to respond. Please try again.",
            "เซิร์ฟเวอร์ใช้เวลาตอบสนองนานเกินไป กรุณาลองใหม่อีกครั้ง",
        ),
        ErrorCode::ServerError => (
            "Something went wrong on the server. Please try again later.",
            "เกิดข้อผิดพลาดที่เซิร์ฟเวอร์ กรุณาลองใหม่ภายหลัง",
        ),
    }
}

/// Classify an HTTP error response.
///
/// The body may be the flat shape `{code, message, messageLocalized, errors}`
/// or nest the same fields under `error`. A `code` naming a known `ErrorCode`
/// replaces the status default; unknown codes are ignored.
pub fn classify(status: u16, body: &Value, request: &ApiRequest) -> AppError {
    let fields = server_fields(body);
    let text = |key: &str| {
        fields
            .and_then(|f| f.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned)
    };

    let code = text("code")
        .and_then(|c| ErrorCode::parse(&c))
        .unwrap_or_else(|| default_code(status));
    let (english, thai) = default_messages(code);

    let details = fields.and_then(|f| {
        f.get("errors")
            .or_else(|| f.get("details"))
            .filter(|v| !v.is_null())
            .cloned()
    });

    debug!(status, code = %code, path = %request.path, "classified error response");

    AppError {
        code,
        message: text("message").unwrap_or_else(|| english.to_owned()),
        message_localized: text("messageLocalized").unwrap_or_else(|| thai.to_owned()),
        status_code: status,
        path: request.path.clone(),
        method: request.method.to_string(),
        timestamp: insure_auth::now_millis(),
        details,
    }
}

/// Classify a request that never got a response (status 0).
pub fn classify_transport(error: &TransportError, request: &ApiRequest) -> AppError {
    let code = match error {
        TransportError::Timeout(_) => ErrorCode::TimeoutError,
        TransportError::Connect(_) | TransportError::Http(_) => ErrorCode::NetworkError,
    };
    let mut classified = client_error(code, default_messages(code).0, request);
    classified.details = Some(serde_json::json!({ "transport": error.to_string() }));
    debug!(code = %code, path = %request.path, error = %error, "classified transport failure");
    classified
}

/// An error raised on the client side, before or without any response.
pub(crate) fn client_error(code: ErrorCode, message: &str, request: &ApiRequest) -> AppError {
    AppError {
        code,
        message: message.to_owned(),
        message_localized: default_messages(code).1.to_owned(),
        status_code: 0,
        path: request.path.clone(),
        method: request.method.to_string(),
        timestamp: insure_auth::now_millis(),
        details: None,
    }
}

fn server_fields(body: &Value) -> Option<&Map<String, Value>> {
    let obj = body.as_object()?;
    match obj.get("error") {
        Some(Value::Object(nested)) => Some(nested),
        _ => Some(obj),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn get(path: &str) -> ApiRequest {
        ApiRequest::get(path)
    }

    #[test]
    fn default_status_table() {
        let cases = [
            (0, ErrorCode::NetworkError),
            (400, ErrorCode::ValidationError),
            (401, ErrorCode::Unauthorized),
            (403, ErrorCode::Forbidden),
            (404, ErrorCode::NotFound),
            (409, ErrorCode::Conflict),
            (422, ErrorCode::BusinessRuleViolation),
            (408, ErrorCode::TimeoutError),
            (504, ErrorCode::TimeoutError),
            (500, ErrorCode::ServerError),
            (502, ErrorCode::ServerError),
            (503, ErrorCode::ServerError),
            (418, ErrorCode::ServerError),
        ];
        for (status, expected) in cases {
            assert_eq!(default_code(status), expected, "status {status}");
        }
    }

    #[test]
    fn business_rule_violation_has_localized_message() {
        let err = classify(422, &Value::Null, &get("/claims"));
        assert_eq!(err.code, ErrorCode::BusinessRuleViolation);
        assert!(!err.message.is_empty());
        assert!(!err.message_localized.is_empty());
    }

    #[test]
    fn status_zero_is_network_error() {
        let err = classify(0, &Value::Null, &get("/policies"));
        assert_eq!(err.code, ErrorCode::NetworkError);
        assert_eq!(err.status_code, 0);
    }

    #[test]
    fn server_code_overrides_default() {
        // 400 would default to VALIDATION_ERROR
        let body = json!({"code": "CONFLICT", "message": "Plate number already insured"});
        let err = classify(400, &body, &get("/vehicles"));
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.message, "Plate number already insured");

        let err = classify(409, &json!({"code": "CONFLICT"}), &get("/vehicles"));
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[test]
    fn unknown_server_code_keeps_default() {
        let err = classify(404, &json!({"code": "POLICY_GONE"}), &get("/policies/1"));
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn nested_error_body_and_details() {
        let body = json!({
            "success": false,
            "error": {
                "code": "VALIDATION_ERROR",
                "message": "Invalid input",
                "messageLocalized": "ข้อมูลไม่ถูกต้อง",
                "errors": [{"field": "email", "message": "required"}]
            }
        });
        let err = classify(400, &body, &ApiRequest::post("/auth/register", json!({})));
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(err.message, "Invalid input");
        assert_eq!(err.message_localized, "ข้อมูลไม่ถูกต้อง");
        assert_eq!(err.details.unwrap()[0]["field"], "email");
        assert_eq!(err.method, "POST");
    }

    #[test]
    fn details_field_is_accepted() {
        let body = json!({"details": {"maxCoverage": 500000}});
        let err = classify(422, &body, &get("/quotes"));
        assert_eq!(err.details.unwrap()["maxCoverage"], 500000);
    }

    #[test]
    fn missing_localized_message_falls_back_to_default() {
        let err = classify(403, &json!({"message": "Admins only"}), &get("/admin/users"));
        assert_eq!(err.message, "Admins only");
        assert_eq!(err.message_localized, default_messages(ErrorCode::Forbidden).1);
    }

    #[test]
    fn plain_text_body_uses_defaults() {
        let err = classify(502, &json!("Bad Gateway"), &get("/policies"));
        assert_eq!(err.code, ErrorCode::ServerError);
        assert_eq!(err.message, default_messages(ErrorCode::ServerError).0);
        assert!(err.details.is_none());
    }

    #[test]
    fn error_carries_request_context() {
        let err = classify(404, &Value::Null, &get("/policies/123?expand=vehicle"));
        assert_eq!(err.path, "/policies/123?expand=vehicle");
        assert_eq!(err.method, "GET");
        assert_eq!(err.status_code, 404);
        assert!(err.timestamp > 0);
    }

    #[test]
    fn transport_timeout_and_connect() {
        let timeout = classify_transport(
            &TransportError::Timeout(Duration::from_secs(30)),
            &get("/policies"),
        );
        assert_eq!(timeout.code, ErrorCode::TimeoutError);
        assert_eq!(timeout.status_code, 0);

        let refused = classify_transport(
            &TransportError::Connect("connection refused".into()),
            &get("/policies"),
        );
        assert_eq!(refused.code, ErrorCode::NetworkError);
        assert!(
            refused.details.unwrap()["transport"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
    }

    #[test]
    fn every_code_has_both_messages() {
        for code in ErrorCode::ALL {
            let (en, th) = default_messages(code);
            assert!(!en.is_empty() && !th.is_empty(), "{code}");
        }
    }
}

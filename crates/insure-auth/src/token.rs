//! Session token and the auth endpoint payloads
//!
//! Login and refresh share one response envelope:
//! `{success, data: {user, token, refreshToken, expiresAt}}`. The backend
//! sends `expiresAt` either as unix milliseconds or as an RFC 3339 string;
//! both are normalized to absolute unix milliseconds on the `Token`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bearer/refresh token pair for the signed-in user.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
}

impl Token {
    /// Time left before the access token expires, zero once expired.
    pub fn expires_in(&self, now: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now))
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Body of `POST /auth/login`. No `Debug`: it carries the password.
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Body of `POST /auth/refresh-token`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// A successful login or refresh: the user profile plus the new token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: serde_json::Value,
    pub token: Token,
}

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<SessionData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    #[serde(default)]
    user: serde_json::Value,
    token: String,
    refresh_token: String,
    expires_at: ExpiresAt,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresAt {
    Millis(u64),
    Text(String),
}

impl ExpiresAt {
    fn to_millis(&self) -> Result<u64> {
        match self {
            ExpiresAt::Millis(ms) => Ok(*ms),
            ExpiresAt::Text(text) => {
                if let Ok(ms) = text.parse::<u64>() {
                    return Ok(ms);
                }
                let parsed = chrono::DateTime::parse_from_rfc3339(text)
                    .map_err(|e| Error::Parse(format!("expiresAt {text:?}: {e}")))?;
                Ok(u64::try_from(parsed.timestamp_millis()).unwrap_or(0))
            }
        }
    }
}

/// Parse the login/refresh response envelope into an `AuthSession`.
///
/// `success: false` or a missing `data` block is an `InvalidResponse`, carrying
/// the server's `message` when it sent one.
pub fn parse_session(body: &serde_json::Value) -> Result<AuthSession> {
    let envelope: Envelope = serde_json::from_value(body.clone())
        .map_err(|e| Error::Parse(format!("auth envelope: {e}")))?;

    let data = match (envelope.success, envelope.data) {
        (true, Some(data)) => data,
        (_, _) => {
            return Err(Error::InvalidResponse(
                envelope
                    .message
                    .unwrap_or_else(|| "response carried no session".into()),
            ));
        }
    };

    let expires_at = data.expires_at.to_millis()?;
    Ok(AuthSession {
        user: data.user,
        token: Token {
            access_token: data.token,
            refresh_token: data.refresh_token,
            expires_at,
        },
    })
}

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_millisecond_expiry() {
        let body = json!({
            "success": true,
            "data": {
                "user": {"id": 7, "email": "agent@example.com"},
                "token": "at_abc",
                "refreshToken": "rt_def",
                "expiresAt": 1_735_500_000_000u64
            }
        });
        let session = parse_session(&body).unwrap();
        assert_eq!(session.token.access_token, "at_abc");
        assert_eq!(session.token.refresh_token, "rt_def");
        assert_eq!(session.token.expires_at, 1_735_500_000_000);
        assert_eq!(session.user["email"], "agent@example.com");
    }

    #[test]
    fn parses_rfc3339_expiry() {
        let body = json!({
            "success": true,
            "data": {
                "token": "at",
                "refreshToken": "rt",
                "expiresAt": "2024-12-29T19:20:00Z"
            }
        });
        let session = parse_session(&body).unwrap();
        assert_eq!(session.token.expires_at, 1_735_500_000_000);
        assert!(session.user.is_null());
    }

    #[test]
    fn unsuccessful_envelope_surfaces_server_message() {
        let body = json!({"success": false, "message": "refresh token revoked"});
        let err = parse_session(&body).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(ref m) if m == "refresh token revoked"));
    }

    #[test]
    fn garbage_expiry_is_a_parse_error() {
        let body = json!({
            "success": true,
            "data": {"token": "at", "refreshToken": "rt", "expiresAt": "next tuesday"}
        });
        assert!(matches!(parse_session(&body), Err(Error::Parse(_))));
    }

    #[test]
    fn token_serializes_camel_case() {
        let token = Token {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: 42,
        };
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, r#"{"accessToken":"at","refreshToken":"rt","expiresAt":42}"#);
    }

    #[test]
    fn debug_redacts_tokens() {
        let token = Token {
            access_token: "at_secret".into(),
            refresh_token: "rt_secret".into(),
            expires_at: 42,
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("at_secret"));
        assert!(!debug.contains("rt_secret"));
        assert!(debug.contains("42"));
    }

    #[test]
    fn refresh_request_uses_camel_case_field() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "rt" }).unwrap();
        assert_eq!(body, json!({"refreshToken": "rt"}));
    }

    #[test]
    fn expiry_helpers() {
        let token = Token {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: 10_000,
        };
        assert_eq!(token.expires_in(4_000), Duration::from_secs(6));
        assert_eq!(token.expires_in(20_000), Duration::ZERO);
        assert!(token.is_expired(10_000));
        assert!(!token.is_expired(9_999));
    }
}

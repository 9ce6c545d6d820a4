//! Auth endpoint paths and refresh timing
//!
//! Paths are relative to the API base URL. The exempt list is the set of
//! endpoints that must never carry a bearer token or trigger a refresh.

use std::time::Duration;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh-token";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";

/// Client-local only; the server call is not needed to end a session.
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Endpoints forwarded without a bearer token and never refreshed on 401.
pub const AUTH_EXEMPT_PATHS: &[&str] = &[
    LOGIN_PATH,
    REGISTER_PATH,
    REFRESH_PATH,
    FORGOT_PASSWORD_PATH,
    RESET_PASSWORD_PATH,
    VERIFY_EMAIL_PATH,
];

/// How long before expiry the proactive refresh fires.
pub const REFRESH_LEAD: Duration = Duration::from_secs(5 * 60);

/// Floor for the proactive refresh delay, so a nearly expired token does not
/// produce a zero or negative timer.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(60);

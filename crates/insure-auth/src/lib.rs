//! Session credentials for the insurance API client
//!
//! Owns the bearer/refresh token pair and everything that touches it without
//! doing network I/O: the auth endpoint paths, the login/refresh payloads and
//! their response envelope, and the `TokenStore` that persists the session and
//! arms the proactive refresh timer.
//!
//! Session flow:
//! 1. Client posts `LoginRequest` to `LOGIN_PATH`, parses the reply with `parse_session()`
//! 2. Token saved via `TokenStore::set()`, which also arms the proactive refresh timer
//! 3. Timer fires five minutes before expiry (never sooner than 60s) and calls the hook
//! 4. Hook posts `RefreshRequest` to `REFRESH_PATH`; the new token goes back through `set()`
//! 5. Logout or a rejected refresh calls `TokenStore::clear()`

pub mod constants;
pub mod error;
pub mod store;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use store::{RefreshHook, TokenStore, proactive_delay};
pub use token::{AuthSession, LoginRequest, RefreshRequest, Token, now_millis, parse_session};

//! Request and response values passed along the middleware chain

use std::time::Duration;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;

use crate::error::{AppError, ErrorCode};

/// Marker header opting a request out of loading-state tracking. Stripped
/// before the request leaves the client.
pub const SKIP_LOADING_HEADER: &str = "x-skip-loading";

/// An outbound API call. `path` is relative to the API base URL and may carry
/// a query string.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Per-call timeout; the pipeline default applies when unset.
    pub timeout: Option<Duration>,
    pub skip_loading: bool,
    pub skip_notification: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            skip_loading: false,
            skip_notification: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep this request out of the busy indicator (background polling etc).
    pub fn without_loading(mut self) -> Self {
        self.skip_loading = true;
        self
    }

    /// Do not raise a user notification if this request fails.
    pub fn without_notification(mut self) -> Self {
        self.skip_notification = true;
        self
    }

    /// Path with any query string removed.
    pub fn route(&self) -> &str {
        route_of(&self.path)
    }

    /// Replace the `Authorization` header with a bearer token.
    pub fn set_bearer(&mut self, access_token: &str) -> Result<(), AppError> {
        let value = HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|e| {
            crate::classify::client_error(
                ErrorCode::Unauthorized,
                &format!("stored access token is not a valid header value: {e}"),
                self,
            )
        })?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A received HTTP response, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Parsed JSON body; `null` when empty, a JSON string when not JSON.
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// 4xx and 5xx responses.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Decode the whole body.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.body)
    }

    /// Decode the `data` member of a `{success, data}` envelope, falling back
    /// to the whole body when it is not wrapped.
    pub fn data<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match self.body.get("data") {
            Some(data) if self.body.get("success").is_some() => T::deserialize(data),
            _ => self.json(),
        }
    }
}

/// Decode raw response bytes into the JSON body representation.
pub fn body_from_bytes(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn route_of(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Path part of an absolute URL; relative paths pass through.
fn without_origin(route: &str) -> &str {
    match route.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => route,
    }
}

/// Drop a leading `/api` or `/api/v<N>` segment.
fn without_api_prefix(route: &str) -> &str {
    let rest = match route.strip_prefix("/api") {
        Some(rest) if rest.starts_with('/') => rest,
        _ => return route,
    };
    let segment = rest[1..].split('/').next().unwrap_or_default();
    match segment.strip_prefix('v') {
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
            &rest[1 + segment.len()..]
        }
        _ => rest,
    }
}

/// Whether `path` names the endpoint `pattern`. Query, origin and trailing
/// slash are ignored, and so is an `/api` or `/api/v<N>` prefix; any other
/// leading segments make it a different route.
pub fn path_matches(path: &str, pattern: &str) -> bool {
    let route = without_origin(route_of(path)).trim_end_matches('/');
    route == pattern || without_api_prefix(route) == pattern
}

pub fn matches_any(path: &str, patterns: &[impl AsRef<str>]) -> bool {
    patterns.iter().any(|p| path_matches(path, p.as_ref()))
}

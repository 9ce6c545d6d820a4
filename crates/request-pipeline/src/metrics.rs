//! Pipeline metrics
//!
//! Recorded through the `metrics` facade; calls are no-ops until the binary
//! installs a recorder.
//!
//! - `pipeline_requests_total` (counter): labels `method`, `status` (0 = no response)
//! - `pipeline_retries_total` (counter): label `method`
//! - `pipeline_errors_total` (counter): label `code`
//! - `pipeline_token_refresh_total` (counter): label `outcome`
//! - `pipeline_loading_keys` (gauge): busy loading keys

use crate::error::ErrorCode;

/// Record one transport exchange (every attempt, not every logical request).
pub fn record_response(method: &str, status: u16) {
    metrics::counter!(
        "pipeline_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_retry(method: &str) {
    metrics::counter!("pipeline_retries_total", "method" => method.to_string()).increment(1);
}

/// Record a request that surfaced an `AppError` to its caller.
pub fn record_error(code: ErrorCode) {
    metrics::counter!("pipeline_errors_total", "code" => code.as_str()).increment(1);
}

/// `outcome` is "success", "failure", or "no_refresh_token".
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("pipeline_token_refresh_total", "outcome" => outcome).increment(1);
}

pub fn set_loading_keys(busy: usize) {
    metrics::gauge!("pipeline_loading_keys").set(busy as f64);
}

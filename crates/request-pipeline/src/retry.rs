//! Retry with exponential backoff, and the terminal error hand-off
//!
//! `RetryMiddleware` sits closest to the transport. It retries transient
//! failures of idempotent requests, then turns whatever is still a failure
//! into one `AppError` and tells the `NotificationSink` about it. Everything
//! above it in the chain sees either a successful response or an `AppError`.
//!
//! Retry *k* (1-based) waits `base_delay * 2^(k-1)`: 1s, 2s, 4s with the
//! defaults. The attempt counter lives on the stack of one `handle()` call, so
//! a post-refresh replay from the auth middleware starts a fresh count.

use std::sync::Arc;
use std::time::Duration;

use insure_auth::AUTH_EXEMPT_PATHS;
use reqwest::Method;
use tracing::{debug, warn};

use crate::classify::classify;
use crate::config::PipelineConfig;
use crate::error::{AppError, ErrorCode};
use crate::metrics;
use crate::middleware::{BoxFuture, Middleware, Next, Outcome};
use crate::notify::{Notification, NotificationSink, is_silent};
use crate::request::{ApiRequest, matches_any};

/// Statuses worth another attempt. Status 0 (no response) is also transient.
pub const TRANSIENT_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Endpoints whose replay could have side effects even under GET.
pub const NON_RETRYABLE_PATHS: &[&str] = &[insure_auth::LOGIN_PATH, insure_auth::REGISTER_PATH];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub non_retryable_methods: Vec<Method>,
    pub non_retryable_paths: Vec<String>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            non_retryable_methods: vec![Method::POST, Method::PUT, Method::DELETE],
            non_retryable_paths: NON_RETRYABLE_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay())
    }

    pub fn should_retry(&self, request: &ApiRequest) -> bool {
        !self.non_retryable_methods.contains(&request.method)
            && !matches_any(&request.path, self.non_retryable_paths.as_slice())
    }

    /// Wait before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

fn is_transient(outcome: &Outcome) -> bool {
    match outcome {
        Ok(response) => TRANSIENT_STATUSES.contains(&response.status),
        Err(error) if error.status_code == 0 => {
            matches!(error.code, ErrorCode::NetworkError | ErrorCode::TimeoutError)
        }
        Err(error) => TRANSIENT_STATUSES.contains(&error.status_code),
    }
}

fn status_of(outcome: &Outcome) -> u16 {
    match outcome {
        Ok(response) => response.status,
        Err(error) => error.status_code,
    }
}

pub struct RetryMiddleware {
    policy: RetryPolicy,
    notifier: Arc<dyn NotificationSink>,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { policy, notifier }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl RetryMiddleware {
    /// A 401 on a guarded route is left to the auth middleware, whatever code
    /// the body carries: it usually ends in a refresh and a successful replay.
    fn is_quiet(&self, request: &ApiRequest, error: &AppError) -> bool {
        is_silent(error.code)
            || (error.is_unauthorized() && !matches_any(&request.path, AUTH_EXEMPT_PATHS))
    }
}

impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    fn handle<'a>(&'a self, request: ApiRequest, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let retryable = self.policy.should_retry(&request);
            let mut retries = 0;

            let outcome = loop {
                let outcome = next.run(request.clone()).await;
                if !retryable || retries >= self.policy.max_retries || !is_transient(&outcome) {
                    break outcome;
                }

                retries += 1;
                let delay = self.policy.backoff(retries);
                metrics::record_retry(request.method.as_str());
                warn!(
                    method = %request.method,
                    path = %request.path,
                    status = status_of(&outcome),
                    retry = retries,
                    max_retries = self.policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            };

            let error = match outcome {
                Ok(response) if !response.is_error() => return Ok(response),
                Ok(response) => classify(response.status, &response.body, &request),
                Err(error) => error,
            };

            if request.skip_notification || self.is_quiet(&request, &error) {
                debug!(code = %error.code, path = %request.path, "failure not notified");
            } else {
                self.notifier.notify(Notification::for_error(&error));
            }
            Err(error)
        })
    }
}

//! Client-side request resilience pipeline for the insurance API
//!
//! Every outbound call passes through an `ApiClient`, which runs it through
//! an ordered middleware chain in front of a `Transport`:
//!
//! - `loading`: keyed busy tracking with an aggregate busy signal
//! - `auth`: bearer attachment, single-flight refresh and replay on 401
//! - `retry`: exponential backoff for transient failures of idempotent calls
//!
//! Failures leave the chain as one classified `AppError`; user-facing ones are
//! also handed to the application's `NotificationSink`.

pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod loading;
pub mod metrics;
pub mod middleware;
pub mod notify;
pub mod request;
pub mod retry;
pub mod transport;

pub use auth::{
    AuthMiddleware, LogSessionListener, SessionListener, TokenRefresher, TransportRefresher,
};
pub use classify::{classify, classify_transport};
pub use client::{ApiClient, ApiClientBuilder};
pub use config::PipelineConfig;
pub use error::{AppError, ErrorCode, TransportError};
pub use loading::{LoadingEvent, LoadingMiddleware, LoadingTracker};
pub use middleware::{BoxFuture, Middleware, Next, Outcome, Pipeline, Transport};
pub use notify::{Notification, NotificationAction, NotificationSink, Severity, TracingSink};
pub use request::{ApiRequest, ApiResponse};
pub use retry::{RetryMiddleware, RetryPolicy};
pub use transport::HttpTransport;

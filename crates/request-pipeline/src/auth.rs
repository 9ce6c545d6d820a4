//! Bearer attachment and single-flight token refresh
//!
//! Every non-exempt request carries the stored access token. When one comes
//! back 401 the middleware refreshes the session and replays the request once
//! with the new token. However many requests fail at the same moment, only one
//! refresh call goes out:
//!
//! 1. The first 401 finds the refresh slot empty, installs a `watch` channel
//!    in it, and spawns the refresh task
//! 2. Later 401s find the slot occupied and subscribe to that channel
//! 3. The task stores (or clears) the session and empties the slot under the
//!    slot lock, then publishes the outcome; every subscriber wakes exactly
//!    once
//!
//! A 401 that lands after the refresh already failed gets that refresh's
//! error, the same as the requests that were queued behind it.
//!
//! The refresh runs detached from the request that started it, so cancelling
//! that request does not strand the others waiting on the outcome.

use std::sync::{Arc, Weak};
use std::time::Duration;

use insure_auth::{AUTH_EXEMPT_PATHS, REFRESH_PATH, RefreshRequest, Token, TokenStore};
use reqwest::Method;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::classify::{classify, client_error};
use crate::error::{AppError, ErrorCode};
use crate::metrics;
use crate::middleware::{BoxFuture, Middleware, Next, Outcome, Pipeline, Transport};
use crate::request::{ApiRequest, matches_any};

/// Exchanges a refresh token for a new session token.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<Token, AppError>>;
}

/// Told when the session ends because it could not be refreshed. The
/// application logs the user out and sends them to the sign-in screen.
pub trait SessionListener: Send + Sync {
    fn session_expired(&self, error: &AppError) {
        warn!(code = %error.code, reason = %error.message, "session expired");
    }
}

/// Listener that only logs.
#[derive(Debug, Default)]
pub struct LogSessionListener;

impl SessionListener for LogSessionListener {}

/// Posts `{refreshToken}` to the refresh endpoint straight through the
/// transport. The call bypasses the middleware chain: it must never carry a
/// bearer, be retried, or count as user-visible loading.
pub struct TransportRefresher {
    pipeline: Pipeline,
}

impl TransportRefresher {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            pipeline: Pipeline::new(transport, timeout),
        }
    }
}

impl TokenRefresher for TransportRefresher {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<Token, AppError>> {
        Box::pin(async move {
            let mut request = ApiRequest::new(Method::POST, REFRESH_PATH);
            let body = serde_json::to_value(RefreshRequest { refresh_token }).map_err(|e| {
                let message = format!("encoding refresh request: {e}");
                client_error(ErrorCode::ServerError, &message, &request)
            })?;
            request.body = Some(body);

            let response = self.pipeline.send(request.clone()).await?;
            if response.is_error() {
                return Err(classify(response.status, &response.body, &request));
            }

            insure_auth::parse_session(&response.body)
                .map(|session| session.token)
                .map_err(|e| {
                    let mut error = client_error(
                        ErrorCode::ServerError,
                        &format!("unusable refresh response: {e}"),
                        &request,
                    );
                    error.status_code = response.status;
                    error
                })
        })
    }
}

/// Published once per refresh cycle; `None` until the outcome is known.
type RefreshOutcome = Option<Result<Token, AppError>>;

#[derive(Default)]
struct RefreshSlot {
    pending: Option<watch::Receiver<RefreshOutcome>>,
    /// Access token of the session the last failed refresh ended, and why.
    ended: Option<(String, AppError)>,
}

struct AuthInner {
    store: Arc<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    listener: Arc<dyn SessionListener>,
    slot: Mutex<RefreshSlot>,
}

impl AuthInner {
    /// Join the refresh in flight, or start one. Resolves with the new token,
    /// or with the error that ended the session.
    async fn refreshed_token(self: &Arc<Self>) -> Result<Token, AppError> {
        let outcome = {
            let mut slot = self.slot.lock().await;
            self.join_or_start(&mut slot)
        };
        wait_for_outcome(outcome).await
    }

    /// Pick the token to replay a request that was rejected with `failure`
    /// while carrying `sent`. The store is read under the slot lock, so a
    /// refresh that has already finished is seen together with its outcome.
    async fn recover(
        self: &Arc<Self>,
        sent: Option<&str>,
        failure: AppError,
    ) -> Result<Token, AppError> {
        let outcome = {
            let mut slot = self.slot.lock().await;
            if slot.pending.is_none() {
                match (sent, self.store.get().await) {
                    (_, Some(current)) if sent != Some(current.access_token.as_str()) => {
                        debug!(path = %failure.path, "token changed while request was in flight");
                        return Ok(current);
                    }
                    (Some(sent), None) => {
                        return Err(match &slot.ended {
                            Some((token, error)) if token == sent => error.clone(),
                            // Signed out while this request was in flight
                            _ => failure,
                        });
                    }
                    _ => {}
                }
            }
            self.join_or_start(&mut slot)
        };
        wait_for_outcome(outcome).await
    }

    fn join_or_start(
        self: &Arc<Self>,
        slot: &mut RefreshSlot,
    ) -> watch::Receiver<RefreshOutcome> {
        if let Some(rx) = &slot.pending {
            debug!("joining in-flight token refresh");
            return rx.clone();
        }
        let (tx, rx) = watch::channel(None);
        slot.pending = Some(rx.clone());
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_refresh(tx).await });
        rx
    }

    async fn run_refresh(&self, tx: watch::Sender<RefreshOutcome>) {
        let outcome = self.refresh_once().await;

        let mut slot = self.slot.lock().await;
        match &outcome {
            Ok(token) => {
                info!(expires_at = token.expires_at, "access token refreshed");
                if let Err(e) = self.store.set(token.clone()).await {
                    warn!(error = %e, "refreshed token not persisted, keeping it in memory");
                }
                slot.ended = None;
            }
            Err(error) => {
                warn!(code = %error.code, error = %error, "token refresh failed, ending session");
                let ended = self.store.get().await.map(|t| t.access_token);
                if let Err(e) = self.store.clear().await {
                    warn!(error = %e, "failed to remove session file");
                }
                slot.ended = ended.map(|token| (token, error.clone()));
            }
        }
        slot.pending = None;
        drop(slot);

        if let Err(error) = &outcome {
            self.listener.session_expired(error);
        }
        let _ = tx.send(Some(outcome));
    }

    async fn refresh_once(&self) -> Result<Token, AppError> {
        let Some(current) = self.store.get().await else {
            metrics::record_refresh("no_refresh_token");
            return Err(refresh_error(
                ErrorCode::Unauthorized,
                "session expired and no refresh token is available",
            ));
        };

        debug!("refreshing access token");
        let result = self.refresher.refresh(&current.refresh_token).await;
        metrics::record_refresh(if result.is_ok() { "success" } else { "failure" });
        result
    }
}

async fn wait_for_outcome(
    mut outcome: watch::Receiver<RefreshOutcome>,
) -> Result<Token, AppError> {
    let published = match outcome.wait_for(Option::is_some).await {
        Ok(published) => published.clone(),
        Err(_) => None,
    };
    published.unwrap_or_else(|| {
        Err(refresh_error(
            ErrorCode::Unauthorized,
            "token refresh ended without an outcome",
        ))
    })
}

fn refresh_error(code: ErrorCode, message: &str) -> AppError {
    client_error(code, message, &ApiRequest::new(Method::POST, REFRESH_PATH))
}

pub struct AuthMiddleware {
    inner: Arc<AuthInner>,
    exempt_paths: Vec<String>,
}

impl AuthMiddleware {
    pub fn new(
        store: Arc<TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                store,
                refresher,
                listener,
                slot: Mutex::new(RefreshSlot::default()),
            }),
            exempt_paths: AUTH_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Have the store's proactive timer trigger the same single-flight
    /// refresh. Arms immediately when a session is already stored.
    pub async fn enable_proactive_refresh(&self) {
        let weak: Weak<AuthInner> = Arc::downgrade(&self.inner);
        self.inner
            .store
            .on_refresh_due(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move {
                        if let Err(e) = inner.refreshed_token().await {
                            debug!(code = %e.code, "proactive refresh did not renew the session");
                        }
                    });
                }
            }))
            .await;
    }

    /// Refresh now, joining any refresh already in flight.
    pub async fn refresh_now(&self) -> Result<Token, AppError> {
        self.inner.refreshed_token().await
    }

    pub async fn is_refreshing(&self) -> bool {
        self.inner.slot.lock().await.pending.is_some()
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.inner.store
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    fn handle<'a>(&'a self, mut request: ApiRequest, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if matches_any(&request.path, self.exempt_paths.as_slice()) {
                return next.run(request).await;
            }

            let sent = self.inner.store.get().await.map(|t| t.access_token);
            if let Some(access_token) = &sent {
                request.set_bearer(access_token)?;
            }

            let failure = match next.run(request.clone()).await {
                Ok(response) if response.status == 401 => {
                    classify(response.status, &response.body, &request)
                }
                Err(error) if error.is_unauthorized() => error,
                other => return other,
            };

            let token = self.inner.recover(sent.as_deref(), failure).await?;
            request.set_bearer(&token.access_token)?;
            debug!(method = %request.method, path = %request.path, "replaying with refreshed token");
            next.run(request).await
        })
    }
}

//! `ApiClient`: the entry point every API call goes through
//!
//! Chain order, outermost first:
//!
//! | stage   | role                                                  |
//! |---------|-------------------------------------------------------|
//! | loading | marks the request's key busy until it settles         |
//! | auth    | attaches the bearer, refreshes and replays on 401     |
//! | retry   | backoff on transient failures, final error + notify   |
//!
//! Loading wraps everything, so retries and the post-refresh replay all count
//! as one busy period. Retry sits innermost, so a replay gets its own budget.

use std::sync::Arc;
use std::time::Instant;

use insure_auth::{AuthSession, LOGIN_PATH, LoginRequest, TokenStore, parse_session};
use serde_json::Value;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::{
    AuthMiddleware, LogSessionListener, SessionListener, TokenRefresher, TransportRefresher,
};
use crate::classify::client_error;
use crate::config::PipelineConfig;
use crate::error::{AppError, ErrorCode};
use crate::loading::{LoadingMiddleware, LoadingTracker};
use crate::metrics;
use crate::middleware::{Outcome, Pipeline, Transport};
use crate::notify::{NotificationSink, TracingSink};
use crate::request::ApiRequest;
use crate::retry::{RetryMiddleware, RetryPolicy};

pub struct ApiClient {
    pipeline: Arc<Pipeline>,
    auth: Arc<AuthMiddleware>,
    loading: Arc<LoadingTracker>,
    store: Arc<TokenStore>,
    config: PipelineConfig,
}

impl ApiClient {
    pub fn builder(transport: Arc<dyn Transport>) -> ApiClientBuilder {
        ApiClientBuilder {
            transport,
            config: PipelineConfig::default(),
            store: None,
            notifier: Arc::new(TracingSink),
            listener: Arc::new(LogSessionListener),
            refresher: None,
            loading: None,
        }
    }

    /// Send `request` through the chain. The chain runs in its own task: a
    /// caller that stops waiting only drops the result, while the exchange,
    /// its retries and the final notification still run to completion.
    #[instrument(skip_all, fields(request_id = %Uuid::new_v4(), method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Outcome {
        let origin = ApiRequest::new(request.method.clone(), request.path.clone());
        let pipeline = Arc::clone(&self.pipeline);
        let task = tokio::spawn(
            async move {
                let started = Instant::now();
                let result = pipeline.send(request).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(response) => {
                        debug!(status = response.status, elapsed_ms, "request completed")
                    }
                    Err(error) => {
                        metrics::record_error(error.code);
                        debug!(code = %error.code, status = error.status_code, elapsed_ms, "request failed");
                    }
                }
                result
            }
            .in_current_span(),
        );

        task.await.unwrap_or_else(|e| {
            error!(error = %e, "request task did not finish");
            Err(client_error(
                ErrorCode::ServerError,
                &format!("request task failed: {e}"),
                &origin,
            ))
        })
    }

    pub async fn get(&self, path: &str) -> Outcome {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Outcome {
        self.send(ApiRequest::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Outcome {
        self.send(ApiRequest::put(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Outcome {
        self.send(ApiRequest::delete(path)).await
    }

    /// Sign in and store the new session.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AppError> {
        let mut request = ApiRequest::new(reqwest::Method::POST, LOGIN_PATH);
        let body = serde_json::to_value(LoginRequest { email, password }).map_err(|e| {
            let message = format!("encoding login: {e}");
            client_error(ErrorCode::ValidationError, &message, &request)
        })?;
        request.body = Some(body);

        let response = self.send(request.clone()).await?;
        let session = parse_session(&response.body).map_err(|e| {
            let mut error = client_error(
                ErrorCode::ServerError,
                &format!("unusable login response: {e}"),
                &request,
            );
            error.status_code = response.status;
            error
        })?;

        if let Err(e) = self.store.set(session.token.clone()).await {
            warn!(error = %e, "session not persisted, keeping it in memory");
        }
        info!(expires_at = session.token.expires_at, "signed in");
        Ok(session)
    }

    /// End the session locally. No server call is made.
    pub async fn logout(&self) -> insure_auth::Result<()> {
        self.store.clear().await?;
        info!("signed out");
        Ok(())
    }

    pub fn loading(&self) -> &Arc<LoadingTracker> {
        &self.loading
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn auth(&self) -> &AuthMiddleware {
        &self.auth
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.pipeline.middleware_names()
    }
}

pub struct ApiClientBuilder {
    transport: Arc<dyn Transport>,
    config: PipelineConfig,
    store: Option<Arc<TokenStore>>,
    notifier: Arc<dyn NotificationSink>,
    listener: Arc<dyn SessionListener>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    loading: Option<Arc<LoadingTracker>>,
}

impl ApiClientBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an in-memory store.
    pub fn token_store(mut self, store: Arc<TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn session_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Defaults to posting to the refresh endpoint over the client's transport.
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn loading_tracker(mut self, tracker: Arc<LoadingTracker>) -> Self {
        self.loading = Some(tracker);
        self
    }

    /// Assemble the chain and hook the proactive refresh timer up to it.
    pub async fn build(self) -> ApiClient {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(TokenStore::in_memory()));
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(TransportRefresher::new(
                self.transport.clone(),
                self.config.timeout(),
            )),
        };
        let loading = self.loading.unwrap_or_default();

        let auth = Arc::new(AuthMiddleware::new(store.clone(), refresher, self.listener));
        auth.enable_proactive_refresh().await;

        let retry = RetryMiddleware::new(RetryPolicy::from_config(&self.config), self.notifier);
        let pipeline = Pipeline::new(self.transport, self.config.timeout())
            .with(Arc::new(LoadingMiddleware::new(loading.clone())))
            .with(auth.clone())
            .with(Arc::new(retry));

        debug!(
            middleware = ?pipeline.middleware_names(),
            timeout_ms = self.config.timeout_ms,
            retry_attempts = self.config.retry_attempts,
            "api client ready"
        );

        ApiClient {
            pipeline: Arc::new(pipeline),
            auth,
            loading,
            store,
            config: self.config,
        }
    }
}

//! Middleware chain and transport abstraction
//!
//! A `Pipeline` is an ordered list of `Middleware` in front of one
//! `Transport`. Each middleware receives the request plus a `Next` handle for
//! the rest of the chain and may call it zero, one, or many times (retries,
//! post-refresh replays). The end of the chain applies the per-call timeout,
//! sends through the transport, and classifies transport failures so that
//! every stage deals only in `ApiResponse` / `AppError`.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn Middleware>`, `Arc<dyn Transport>`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::classify::classify_transport;
use crate::error::{AppError, TransportError};
use crate::metrics;
use crate::request::{ApiRequest, ApiResponse};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What every stage of the chain produces.
pub type Outcome = Result<ApiResponse, AppError>;

/// Sends one HTTP exchange. Any received response is `Ok`, whatever its
/// status; `Err` means there was no response.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>>;
}

/// One stage of the request pipeline.
pub trait Middleware: Send + Sync {
    /// Identifier for logging (e.g. "auth", "retry")
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, request: ApiRequest, next: Next<'a>) -> BoxFuture<'a, Outcome>;
}

/// The remainder of the chain after the current middleware. `Copy`, so a
/// middleware can run it as often as it needs.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
    default_timeout: Duration,
}

impl<'a> Next<'a> {
    pub fn run(self, request: ApiRequest) -> BoxFuture<'a, Outcome> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(request, Next { chain: rest, ..self }),
            None => Box::pin(self.send(request)),
        }
    }

    async fn send(self, request: ApiRequest) -> Outcome {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let sent = tokio::time::timeout(timeout, self.transport.send(&request)).await;

        let failure = match sent {
            Ok(Ok(response)) => {
                metrics::record_response(request.method.as_str(), response.status);
                return Ok(response);
            }
            Ok(Err(TransportError::Timeout(_))) | Err(_) => TransportError::Timeout(timeout),
            Ok(Err(other)) => other,
        };

        metrics::record_response(request.method.as_str(), 0);
        warn!(method = %request.method, path = %request.path, error = %failure, "no response from server");
        Err(classify_transport(&failure, &request))
    }
}

/// Ordered middleware in front of a transport.
pub struct Pipeline {
    chain: Vec<Arc<dyn Middleware>>,
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            chain: Vec::new(),
            transport,
            default_timeout,
        }
    }

    /// Append a middleware. Earlier middleware wrap later ones; the last one
    /// added sits closest to the transport.
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.chain.push(middleware);
        self
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.chain.iter().map(|m| m.name()).collect()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn send(&self, request: ApiRequest) -> Outcome {
        Next {
            chain: &self.chain,
            transport: self.transport.as_ref(),
            default_timeout: self.default_timeout,
        }
        .run(request)
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport shared by the middleware unit tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    pub type Reply = Result<ApiResponse, TransportError>;

    #[derive(Debug, Clone)]
    pub struct Seen {
        pub method: String,
        pub path: String,
        pub bearer: Option<String>,
        pub headers: reqwest::header::HeaderMap,
        pub at: tokio::time::Instant,
    }

    /// Replies from a script in order; once the script runs dry every call
    /// gets `fallback`.
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Reply>>,
        fallback: Reply,
        pub seen: Mutex<Vec<Seen>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn always(reply: Reply) -> Arc<Self> {
            Self::new(Vec::new(), reply)
        }

        pub fn calls(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send<'a>(
            &'a self,
            request: &'a ApiRequest,
        ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
            self.seen.lock().unwrap().push(Seen {
                method: request.method.to_string(),
                path: request.path.clone(),
                bearer: request.bearer().map(str::to_owned),
                headers: request.headers.clone(),
                at: tokio::time::Instant::now(),
            });
            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            Box::pin(async move { reply })
        }
    }

    pub fn status(code: u16) -> Reply {
        Ok(ApiResponse::new(code, serde_json::Value::Null))
    }

    pub fn ok(body: serde_json::Value) -> Reply {
        Ok(ApiResponse::new(200, body))
    }
}

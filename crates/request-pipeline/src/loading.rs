//! Keyed loading-state tracking
//!
//! Every tracked request marks a key `"{METHOD}:{path}"` busy for its whole
//! lifetime, retries and post-refresh replays included. Numeric path segments
//! collapse to `:id` so `/policies/123` and `/policies/456` share one key
//! instead of minting an entry per resource. Keys are reference counted: two
//! concurrent `GET /policies` keep the key busy until both finish.
//!
//! Release is tied to a drop guard, so a caller that abandons its request
//! (drops the future) still frees the key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::metrics;
use crate::middleware::{BoxFuture, Middleware, Next, Outcome};
use crate::request::{ApiRequest, SKIP_LOADING_HEADER, matches_any};

/// Background endpoints that must not flicker the busy indicator.
pub const LOADING_SKIP_PATHS: &[&str] = &[
    insure_auth::REFRESH_PATH,
    "/notifications/count",
    "/heartbeat",
    "/health",
];

const EVENT_CAPACITY: usize = 256;

/// A key going busy (`loading: true`) or idle (`loading: false`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingEvent {
    pub key: String,
    pub loading: bool,
}

pub struct LoadingTracker {
    keys: Mutex<HashMap<String, usize>>,
    busy_keys: AtomicUsize,
    busy: watch::Sender<bool>,
    events: broadcast::Sender<LoadingEvent>,
}

impl LoadingTracker {
    pub fn new() -> Self {
        let (busy, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            keys: Mutex::new(HashMap::new()),
            busy_keys: AtomicUsize::new(0),
            busy,
            events,
        }
    }

    /// `"{METHOD}:{path}"` with the query dropped and every all-digit segment
    /// replaced by `:id`.
    pub fn generate_key(method: &str, path: &str) -> String {
        let route = path.split(['?', '#']).next().unwrap_or(path);
        let normalized: Vec<&str> = route
            .split('/')
            .map(|segment| {
                if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                    ":id"
                } else {
                    segment
                }
            })
            .collect();
        format!("{}:{}", method.to_ascii_uppercase(), normalized.join("/"))
    }

    /// Mark one request on `key` as started (`true`) or finished (`false`).
    pub fn set_loading(&self, key: &str, loading: bool) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);

        let transitioned = if loading {
            let count = keys.entry(key.to_owned()).or_insert(0);
            *count += 1;
            *count == 1
        } else {
            let remaining = keys.get_mut(key).map(|count| {
                *count -= 1;
                *count
            });
            match remaining {
                Some(0) => {
                    keys.remove(key);
                    true
                }
                Some(_) => false,
                None => {
                    debug!(key, "release for a key that is not loading");
                    false
                }
            }
        };

        if !transitioned {
            return;
        }

        let busy_keys = if loading {
            self.busy_keys.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.busy_keys.fetch_sub(1, Ordering::SeqCst) - 1
        };
        debug!(key, loading, busy_keys, "loading state changed");
        metrics::set_loading_keys(busy_keys);

        let _ = self.events.send(LoadingEvent {
            key: key.to_owned(),
            loading,
        });
        self.busy.send_if_modified(|busy| {
            let now_busy = busy_keys > 0;
            let changed = *busy != now_busy;
            *busy = now_busy;
            changed
        });
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// True iff any key is busy. Reads the maintained count, no map scan.
    pub fn is_loading_any(&self) -> bool {
        self.busy_keys.load(Ordering::SeqCst) > 0
    }

    /// Aggregate busy signal.
    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    /// Per-key busy/idle transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<LoadingEvent> {
        self.events.subscribe()
    }

    /// Mark `key` busy until the returned guard drops.
    pub fn track(self: &Arc<Self>, key: String) -> LoadingGuard {
        self.set_loading(&key, true);
        LoadingGuard {
            tracker: Arc::clone(self),
            key,
        }
    }
}

impl Default for LoadingTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its key on drop.
pub struct LoadingGuard {
    tracker: Arc<LoadingTracker>,
    key: String,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.tracker.set_loading(&self.key, false);
    }
}

/// Drives a `LoadingTracker` for every request that is not opted out.
///
/// Opt-outs: `ApiRequest::skip_loading`, the `x-skip-loading` header (removed
/// before sending), and the skip-path list.
pub struct LoadingMiddleware {
    tracker: Arc<LoadingTracker>,
    skip_paths: Vec<String>,
}

impl LoadingMiddleware {
    pub fn new(tracker: Arc<LoadingTracker>) -> Self {
        Self {
            tracker,
            skip_paths: LOADING_SKIP_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Middleware for LoadingMiddleware {
    fn name(&self) -> &str {
        "loading"
    }

    fn handle<'a>(&'a self, mut request: ApiRequest, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let marked = request.headers.remove(SKIP_LOADING_HEADER).is_some();
            if marked || request.skip_loading || matches_any(&request.path, self.skip_paths.as_slice()) {
                return next.run(request).await;
            }

            let key = LoadingTracker::generate_key(request.method.as_str(), &request.path);
            let _guard = self.tracker.track(key);
            next.run(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::TransportError;
    use crate::middleware::testing::*;
    use crate::middleware::{Pipeline, Transport};
    use crate::request::ApiResponse;

    #[test]
    fn numeric_segments_collapse() {
        assert_eq!(
            LoadingTracker::generate_key("GET", "/policies/123"),
            LoadingTracker::generate_key("GET", "/policies/456")
        );
        assert_eq!(
            LoadingTracker::generate_key("get", "/policies/123/claims/9"),
            "GET:/policies/:id/claims/:id"
        );
    }

    #[test]
    fn method_distinguishes_keys() {
        assert_ne!(
            LoadingTracker::generate_key("GET", "/policies"),
            LoadingTracker::generate_key("POST", "/policies")
        );
    }

    #[test]
    fn mixed_segments_and_query_are_normalized() {
        assert_eq!(
            LoadingTracker::generate_key("GET", "/policies/POL-2024-001?page=3"),
            "GET:/policies/POL-2024-001"
        );
        assert_eq!(
            LoadingTracker::generate_key("GET", "/vehicles/12a"),
            "GET:/vehicles/12a"
        );
    }

    #[test]
    fn keys_are_reference_counted() {
        let tracker = LoadingTracker::new();
        tracker.set_loading("GET:/policies", true);
        tracker.set_loading("GET:/policies", true);
        tracker.set_loading("GET:/policies", false);
        assert!(tracker.is_loading("GET:/policies"));
        assert!(tracker.is_loading_any());

        tracker.set_loading("GET:/policies", false);
        assert!(!tracker.is_loading("GET:/policies"));
        assert!(!tracker.is_loading_any());
    }

    #[test]
    fn unknown_release_is_ignored() {
        let tracker = LoadingTracker::new();
        tracker.set_loading("GET:/claims", false);
        assert!(!tracker.is_loading_any());
        tracker.set_loading("GET:/claims", true);
        assert!(tracker.is_loading_any());
    }

    #[test]
    fn events_fire_only_on_transitions() {
        let tracker = LoadingTracker::new();
        let mut events = tracker.subscribe();

        tracker.set_loading("GET:/policies", true);
        tracker.set_loading("GET:/policies", true);
        tracker.set_loading("GET:/policies", false);
        tracker.set_loading("GET:/policies", false);

        let first = events.try_recv().unwrap();
        let second = events.try_recv().unwrap();
        assert!(first.loading && !second.loading);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn busy_signal_tracks_any_key() {
        let tracker = LoadingTracker::new();
        let busy = tracker.subscribe_busy();
        assert!(!*busy.borrow());

        tracker.set_loading("GET:/policies", true);
        tracker.set_loading("GET:/claims", true);
        assert!(*busy.borrow());
        tracker.set_loading("GET:/policies", false);
        assert!(*busy.borrow());
        tracker.set_loading("GET:/claims", false);
        assert!(!*busy.borrow());
    }

    /// Reports whether the tracker saw the request as loading while in flight.
    struct Observe(Arc<LoadingTracker>, Mutex<Vec<bool>>);

    impl Transport for Observe {
        fn send<'a>(
            &'a self,
            _request: &'a ApiRequest,
        ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
            self.1.lock().unwrap().push(self.0.is_loading_any());
            Box::pin(async { Ok(ApiResponse::new(200, serde_json::Value::Null)) })
        }
    }

    #[tokio::test]
    async fn request_is_busy_while_in_flight() {
        let tracker = Arc::new(LoadingTracker::new());
        let observe = Arc::new(Observe(tracker.clone(), Mutex::new(Vec::new())));
        let pipeline = Pipeline::new(observe.clone(), Duration::from_secs(5))
            .with(Arc::new(LoadingMiddleware::new(tracker.clone())));

        pipeline.send(ApiRequest::get("/policies/7")).await.unwrap();
        pipeline.send(ApiRequest::get("/api/health")).await.unwrap();
        pipeline
            .send(ApiRequest::get("/policies").without_loading())
            .await
            .unwrap();

        assert_eq!(*observe.1.lock().unwrap(), vec![true, false, false]);
        assert!(!tracker.is_loading_any());
    }

    #[tokio::test]
    async fn skip_header_is_honored_and_stripped() {
        let tracker = Arc::new(LoadingTracker::new());
        let mut events = tracker.subscribe();
        let transport = ScriptedTransport::always(status(200));
        let pipeline = Pipeline::new(transport.clone(), Duration::from_secs(5))
            .with(Arc::new(LoadingMiddleware::new(tracker.clone())));

        let mut request = ApiRequest::get("/notifications");
        request
            .headers
            .insert(SKIP_LOADING_HEADER, "1".parse().unwrap());
        pipeline.send(request).await.unwrap();

        assert!(events.try_recv().is_err(), "opted-out request must not emit");
        assert!(transport.calls()[0].headers.get(SKIP_LOADING_HEADER).is_none());
    }

    /// Never answers.
    struct Hang;

    impl Transport for Hang {
        fn send<'a>(
            &'a self,
            _request: &'a ApiRequest,
        ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn cancelled_request_releases_key() {
        let tracker = Arc::new(LoadingTracker::new());
        let pipeline = Arc::new(
            Pipeline::new(Arc::new(Hang), Duration::from_secs(3600))
                .with(Arc::new(LoadingMiddleware::new(tracker.clone()))),
        );

        let task = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.send(ApiRequest::get("/claims/5")).await })
        };
        while !tracker.is_loading("GET:/claims/:id") {
            tokio::task::yield_now().await;
        }

        task.abort();
        let _ = task.await;
        assert!(!tracker.is_loading_any());
    }
}

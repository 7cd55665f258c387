//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use dashmap::DashMap;
use marquee::backend::InMemoryBackend;
use marquee::error::{Error, Result};
use marquee::http::AppState;
use marquee::identity::IdentityResolver;
use marquee::observability::PrometheusMetrics;
use marquee::session::{SessionMarker, SessionRegistry};
use marquee::token::{TokenCodec, DEFAULT_TOKEN_LIFETIME};
use marquee::upstream::{ContentProvider, QueryParams};
use marquee::watchlist::InMemoryWatchlist;
use marquee::{CacheAside, CacheClient, ContentService, FailurePolicy, SubjectId, TtlPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const SECRET: &[u8] = b"integration-secret";

/// Provider double: canned bodies per path, a call log, and an outage switch.
#[derive(Clone, Default)]
pub struct FakeProvider {
    bodies: Arc<DashMap<String, Value>>,
    calls: Arc<DashMap<String, usize>>,
    queries: Arc<DashMap<String, Vec<(String, String)>>>,
    down: Arc<AtomicBool>,
}

impl FakeProvider {
    pub fn new() -> Self {
        let provider = FakeProvider::default();
        provider.respond(
            "/movie/42",
            json!({"id": 42, "title": "Alien", "popularity": 71.5}),
        );
        provider.respond("/movie/42/videos", json!({"id": 42, "results": [{"key": "abc"}]}));
        provider.respond(
            "/movie/42/recommendations",
            json!({"page": 1, "results": [{"id": 348}]}),
        );
        provider.respond(
            "/genre/movie/list",
            json!({"genres": [{"id": 27, "name": "Horror"}]}),
        );
        provider.respond(
            "/movie/now_playing",
            json!({"results": [
                {"id": 1, "popularity": 10.0},
                {"id": 2, "popularity": 90.0},
                {"id": 3, "popularity": 40.0},
                {"id": 4, "popularity": 90.0},
                {"id": 5, "popularity": 5.0},
                {"id": 6, "popularity": 60.0}
            ]}),
        );
        provider.respond("/movie/popular", json!({"results": [{"id": 10}]}));
        provider.respond("/movie/top_rated", json!({"results": [{"id": 20}]}));
        provider.respond("/movie/upcoming", json!({"results": [{"id": 30}]}));
        provider.respond("/search/movie", json!({"page": 1, "results": [{"id": 42}]}));
        provider.respond("/discover/movie", json!({"page": 1, "results": [{"id": 7}]}));
        provider
    }

    pub fn respond(&self, path: &str, body: Value) {
        self.bodies.insert(path.to_string(), body);
    }

    pub fn forget(&self, path: &str) {
        self.bodies.remove(path);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.get(path).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c).sum()
    }

    /// Query parameters of the most recent call to `path`.
    pub fn last_query(&self, path: &str) -> Vec<(String, String)> {
        self.queries
            .get(path)
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

impl ContentProvider for FakeProvider {
    async fn fetch(&self, path: &str, query: &QueryParams) -> Result<Value> {
        *self.calls.entry(path.to_string()).or_insert(0) += 1;
        self.queries.insert(
            path.to_string(),
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );

        if self.down.load(Ordering::SeqCst) {
            return Err(Error::UpstreamUnavailable("provider down".to_string()));
        }
        self.bodies
            .get(path)
            .map(|body| body.clone())
            .ok_or(Error::UpstreamError(404))
    }
}

/// A fully wired in-memory stack.
pub struct Harness {
    pub backend: InMemoryBackend,
    pub provider: FakeProvider,
    pub watchlist: InMemoryWatchlist,
    pub codec: TokenCodec,
    pub sessions: SessionRegistry<InMemoryBackend>,
    pub metrics: PrometheusMetrics,
    pub state: AppState<InMemoryBackend, FakeProvider, InMemoryWatchlist>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeProvider::new(), FailurePolicy::FailClosed, TtlPolicy::default())
    }

    pub fn build(provider: FakeProvider, failure_policy: FailurePolicy, ttl: TtlPolicy) -> Self {
        let backend = InMemoryBackend::new();
        let client = CacheClient::new(backend.clone()).with_ttl_policy(ttl);
        let metrics = PrometheusMetrics::new().unwrap();
        let resolver = CacheAside::new(client.clone())
            .with_failure_policy(failure_policy)
            .with_metrics(Box::new(metrics.clone()));
        let watchlist = InMemoryWatchlist::new();
        let codec = TokenCodec::new(SECRET, DEFAULT_TOKEN_LIFETIME);
        let sessions = SessionRegistry::new(client);

        let content = ContentService::new(resolver, provider.clone(), watchlist.clone());
        let identity = IdentityResolver::new(codec.clone(), sessions.clone());

        Harness {
            backend,
            provider,
            watchlist,
            codec,
            sessions,
            metrics: metrics.clone(),
            state: AppState::new(content, identity).with_metrics(metrics),
        }
    }

    pub fn content(&self) -> &ContentService<InMemoryBackend, FakeProvider, InMemoryWatchlist> {
        &self.state.content
    }

    /// Open a session for `id` and return a valid `Authorization` value.
    pub async fn login(&self, id: &str) -> (SubjectId, String) {
        let subject = SubjectId::parse(id).unwrap();
        self.sessions
            .open(&SessionMarker::new(&subject))
            .await
            .unwrap();
        let token = self.codec.issue(&subject).unwrap();
        (subject, format!("Bearer {}", token))
    }
}

//! Cache-aside resolver - the get-or-populate primitive behind every content route.

use crate::backend::CacheBackend;
use crate::client::CacheClient;
use crate::coalesce::{CoalescingSlot, RequestCoalescer};
use crate::error::{Error, Result};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::serialization;
use crate::strategy::FailurePolicy;
use crate::ttl::Ttl;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

/// Read-through on miss, write-through on populate.
///
/// ```text
/// GET key ──hit──────────────────────────────▶ return cached
///    │
///   miss ─▶ populate() ──err──────────────────▶ return err (nothing written)
///               │
///               ok ─▶ SET key value [EX ttl] ─▶ return value (write errors logged)
/// ```
///
/// Without coalescing, concurrent misses on one key each call populate and
/// the last write wins. Cached values are idempotent so this is only
/// wasteful, never wrong.
///
/// # Example
///
/// ```ignore
/// use marquee::{CacheAside, CacheClient, backend::InMemoryBackend, ttl::Ttl};
///
/// let resolver = CacheAside::new(CacheClient::new(InMemoryBackend::new()));
/// let detail: serde_json::Value = resolver
///     .resolve_or_populate("42-detail", || gateway.fetch("/movie/42", &[]), Ttl::Default)
///     .await?;
/// ```
pub struct CacheAside<B: CacheBackend> {
    client: CacheClient<B>,
    metrics: Box<dyn CacheMetrics>,
    failure_policy: FailurePolicy,
    coalescer: Option<RequestCoalescer>,
}

impl<B: CacheBackend> CacheAside<B> {
    pub fn new(client: CacheClient<B>) -> Self {
        CacheAside {
            client,
            metrics: Box::new(NoOpMetrics),
            failure_policy: FailurePolicy::default(),
            coalescer: None,
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Outage behavior used by [`CacheAside::resolve_or_populate`].
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Collapse concurrent misses on one key into a single populate.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalescer = enabled.then(RequestCoalescer::new);
        self
    }

    pub fn client(&self) -> &CacheClient<B> {
        &self.client
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Return the value at `key`, or run `populate`, store its result with
    /// `ttl` and return it.
    ///
    /// Blank or undecodable stored values count as a miss and are
    /// overwritten. A failed write-back is logged and the populated value is
    /// still returned.
    ///
    /// # Errors
    /// - whatever `populate` returns; nothing is written in that case
    /// - `Error::CacheUnavailable` when the store is down and the policy is
    ///   `FailClosed`
    /// - `Error::ValidationError` for `Ttl::After(Duration::ZERO)`
    pub async fn resolve_or_populate<T, F, Fut>(&self, key: &str, populate: F, ttl: Ttl) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.resolve_with_policy(key, populate, ttl, self.failure_policy)
            .await
    }

    /// [`CacheAside::resolve_or_populate`] with an explicit outage policy.
    pub async fn resolve_with_policy<T, F, Fut>(
        &self,
        key: &str,
        populate: F,
        ttl: Ttl,
        policy: FailurePolicy,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let timer = Instant::now();
        let expiry = self.client.ttl_policy().resolve(ttl)?;

        debug!("» Resolve {} (ttl: {}, policy: {})", key, ttl, policy);

        match self.lookup::<T>(key).await {
            Ok(Some(value)) => {
                self.metrics.record_hit(key, timer.elapsed());
                return Ok(value);
            }
            Ok(None) => {}
            Err(e @ Error::CacheUnavailable(_)) => {
                self.metrics.record_error(key, &e.to_string());
                if !policy.degrades() {
                    return Err(e);
                }
                warn!("⚠ Store unavailable, serving {} uncached: {}", key, e);
                return populate().await;
            }
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                return Err(e);
            }
        }

        self.metrics.record_miss(key, timer.elapsed());

        // Held until the write-back below has finished.
        let _leader = match &self.coalescer {
            Some(coalescer) => match coalescer.acquire(key).await {
                CoalescingSlot::Leader(guard) => Some(guard),
                CoalescingSlot::Follower => {
                    if let Ok(Some(value)) = self.lookup::<T>(key).await {
                        self.metrics.record_hit(key, timer.elapsed());
                        return Ok(value);
                    }
                    debug!("Leader left no value for {}, populating", key);
                    None
                }
            },
            None => None,
        };

        let value = match populate().await {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_error(key, &e.to_string());
                return Err(e);
            }
        };

        self.write_back(key, &value, expiry).await;
        self.metrics.record_populate(key, timer.elapsed());
        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.client.get_json::<T>(key).await {
            Err(Error::DeserializationError(msg)) => {
                warn!("⚠ Discarding undecodable value at {}: {}", key, msg);
                Ok(None)
            }
            other => other,
        }
    }

    /// The write runs on its own task so it completes even if the caller
    /// is dropped mid-request.
    async fn write_back<T: Serialize>(&self, key: &str, value: &T, expiry: Option<Duration>) {
        let bytes = match serialization::encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.write_failed(key, &e.to_string());
                return;
            }
        };

        let backend = self.client.backend().clone();
        let owned_key = key.to_string();
        let write = tokio::spawn(async move { backend.set(&owned_key, bytes, expiry).await });

        match write.await {
            Ok(Ok(())) => debug!("✓ Stored {} (expiry: {:?})", key, expiry),
            Ok(Err(e)) => self.write_failed(key, &e.to_string()),
            Err(e) => self.write_failed(key, &e.to_string()),
        }
    }

    fn write_failed(&self, key: &str, error: &str) {
        warn!("⚠ Write-back of {} failed, value served uncached: {}", key, error);
        self.metrics.record_write_failure(key, error);
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::ttl::TtlPolicy;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory store whose writes can be made to fail on their own.
    #[derive(Clone, Default)]
    struct WriteFailingBackend {
        inner: InMemoryBackend,
        fail_writes: Arc<AtomicBool>,
    }

    impl CacheBackend for WriteFailingBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::CacheUnavailable("write refused".to_string()));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    static WARNINGS: std::sync::Mutex<Vec<String>> = std::sync::Mutex::new(Vec::new());

    /// Keeps every warn-or-worse record for later inspection.
    struct WarnCapture;

    impl log::Log for WarnCapture {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                WARNINGS.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: WarnCapture = WarnCapture;

    fn capture_warnings() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Warn);
    }

    fn resolver(backend: InMemoryBackend) -> CacheAside<InMemoryBackend> {
        CacheAside::new(CacheClient::new(backend))
    }

    async fn counted(calls: &AtomicUsize, value: Value) -> Result<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn test_miss_populates_then_hits() {
        let backend = InMemoryBackend::new();
        let resolver = resolver(backend.clone());
        let calls = AtomicUsize::new(0);

        let first: Value = resolver
            .resolve_or_populate("42-detail", || counted(&calls, json!({"id": 42})), Ttl::Default)
            .await
            .unwrap();
        let second: Value = resolver
            .resolve_or_populate("42-detail", || counted(&calls, json!({"id": 0})), Ttl::Default)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(
            backend.get("42-detail").await.unwrap(),
            Some(br#"{"id":42}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_populate_failure_writes_nothing() {
        let backend = InMemoryBackend::new();
        let resolver = resolver(backend.clone());

        let err = resolver
            .resolve_or_populate::<Value, _, _>(
                "42-detail",
                || async { Err(Error::UpstreamError(503)) },
                Ttl::Default,
            )
            .await
            .unwrap_err();
        assert_eq!(err, Error::UpstreamError(503));
        assert!(backend.is_empty());

        // next request retries upstream
        let calls = AtomicUsize::new(0);
        resolver
            .resolve_or_populate("42-detail", || counted(&calls, json!({"id": 42})), Ttl::Default)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_cached_value_is_a_miss() {
        let backend = InMemoryBackend::new();
        backend.set("42-video", b"{}".to_vec(), None).await.unwrap();
        let resolver = resolver(backend.clone());
        let calls = AtomicUsize::new(0);

        let value: Value = resolver
            .resolve_or_populate("42-video", || counted(&calls, json!({"results": [1]})), Ttl::Default)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(value, json!({"results": [1]}));
    }

    #[tokio::test]
    async fn test_undecodable_cached_value_is_overwritten() {
        let backend = InMemoryBackend::new();
        backend.set("42-detail", b"\x00garbage".to_vec(), None).await.unwrap();
        let resolver = resolver(backend.clone());
        let calls = AtomicUsize::new(0);

        let _: Value = resolver
            .resolve_or_populate("42-detail", || counted(&calls, json!({"id": 42})), Ttl::Default)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            backend.get("42-detail").await.unwrap(),
            Some(br#"{"id":42}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_write_failure_still_returns_value() {
        let backend = WriteFailingBackend::default();
        backend.fail_writes.store(true, Ordering::SeqCst);
        let resolver = CacheAside::new(CacheClient::new(backend.clone()));

        let value: Value = resolver
            .resolve_or_populate("42-detail", || async { Ok(json!({"id": 42})) }, Ttl::Default)
            .await
            .unwrap();

        assert_eq!(value, json!({"id": 42}));
        assert!(backend.inner.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_logged_with_default_metrics() {
        capture_warnings();
        let backend = WriteFailingBackend::default();
        backend.fail_writes.store(true, Ordering::SeqCst);
        let resolver = CacheAside::new(CacheClient::new(backend));

        let _: Value = resolver
            .resolve_or_populate("977-detail", || async { Ok(json!({"id": 977})) }, Ttl::Default)
            .await
            .unwrap();

        let warnings = WARNINGS.lock().unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.contains("977-detail") && w.contains("write refused")));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_closed() {
        let backend = InMemoryBackend::new();
        backend.set_available(false);
        let resolver = resolver(backend);
        let calls = AtomicUsize::new(0);

        let err = resolver
            .resolve_or_populate("42-detail", || counted(&calls, json!({})), Ttl::Default)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CacheUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_upstream() {
        let backend = InMemoryBackend::new();
        backend.set_available(false);
        let resolver = resolver(backend.clone()).with_failure_policy(FailurePolicy::DegradeToUpstream);

        let value: Value = resolver
            .resolve_or_populate("42-detail", || async { Ok(json!({"id": 42})) }, Ttl::Default)
            .await
            .unwrap();
        assert_eq!(value, json!({"id": 42}));

        backend.set_available(true);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_policy_overrides_default() {
        let backend = InMemoryBackend::new();
        backend.set_available(false);
        let resolver = resolver(backend).with_failure_policy(FailurePolicy::DegradeToUpstream);

        let err = resolver
            .resolve_with_policy::<Value, _, _>(
                "featured-movies",
                || async { Ok(json!({})) },
                Ttl::Default,
                FailurePolicy::FailClosed,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CacheUnavailable(_)));
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected_before_any_io() {
        let resolver = resolver(InMemoryBackend::new());
        let calls = AtomicUsize::new(0);

        let err = resolver
            .resolve_or_populate("k", || counted(&calls, json!(1)), Ttl::After(Duration::ZERO))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ValidationError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_default_ttl_expires_and_repopulates() {
        let backend = InMemoryBackend::new();
        let resolver = CacheAside::new(
            CacheClient::new(backend).with_ttl_policy(TtlPolicy::Fixed(Duration::from_millis(50))),
        );
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Value = resolver
                .resolve_or_populate("k", || counted(&calls, json!(1)), Ttl::Default)
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _: Value = resolver
            .resolve_or_populate("k", || counted(&calls, json!(1)), Ttl::Default)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_metrics_see_hit_and_miss() {
        #[derive(Default)]
        struct Counting {
            hits: Arc<AtomicUsize>,
            misses: Arc<AtomicUsize>,
        }

        impl CacheMetrics for Counting {
            fn record_hit(&self, _key: &str, _duration: Duration) {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
            fn record_miss(&self, _key: &str, _duration: Duration) {
                self.misses.fetch_add(1, Ordering::SeqCst);
            }
        }

        let metrics = Counting::default();
        let (hits, misses) = (metrics.hits.clone(), metrics.misses.clone());
        let resolver = resolver(InMemoryBackend::new()).with_metrics(Box::new(metrics));

        for _ in 0..3 {
            let _: Value = resolver
                .resolve_or_populate("k", || async { Ok(json!(1)) }, Ttl::Default)
                .await
                .unwrap();
        }

        assert_eq!(misses.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    async fn concurrent_misses(resolver: Arc<CacheAside<InMemoryBackend>>) -> usize {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..10 {
            let resolver = Arc::clone(&resolver);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve_or_populate::<Value, _, _>(
                        "hot-key",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(json!({"hot": true}))
                        },
                        Ttl::Default,
                    )
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.expect("task panicked").unwrap();
            assert_eq!(value, json!({"hot": true}));
        }
        calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_concurrent_misses_without_coalescing_each_populate() {
        let resolver = Arc::new(resolver(InMemoryBackend::new()));
        assert!(concurrent_misses(resolver).await > 1);
    }

    #[tokio::test]
    async fn test_coalescing_collapses_concurrent_misses() {
        let resolver = Arc::new(resolver(InMemoryBackend::new()).with_coalescing(true));
        assert_eq!(concurrent_misses(resolver).await, 1);
    }
}

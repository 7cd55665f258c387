//! Metrics hooks for the cache-aside engine.
//!
//! Implement [`CacheMetrics`] to forward hit/miss/populate events to a
//! monitoring system. The default [`NoOpMetrics`] records nothing; the
//! trait's own default methods log through the `log` crate.
//! [`PrometheusMetrics`] counts cache outcomes and HTTP requests in its own
//! registry, which the `/metrics` route renders.
//!
//! ```ignore
//! let metrics = PrometheusMetrics::new()?;
//! let resolver = CacheAside::new(client).with_metrics(Box::new(metrics.clone()));
//! let state = AppState::new(content, identity).with_metrics(metrics);
//! ```

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Request latency buckets, 5ms to 10s.
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Cache-aside latency buckets, 0.5ms to 2.5s.
const CACHE_LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 2.5];

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Value served from the store.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Key absent; populate is about to run.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Populate finished and the value was written back.
    fn record_populate(&self, key: &str, duration: Duration) {
        debug!("Cache POPULATE: {} took {:?}", key, duration);
    }

    /// Populate succeeded but the write-back failed; the value was still
    /// served. The resolver already logs this at `warn`.
    fn record_write_failure(&self, key: &str, error: &str) {
        debug!("Cache WRITE FAILED for {}: {}", key, error);
    }

    /// Operation failed.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_populate(&self, _key: &str, _duration: Duration) {}
    fn record_write_failure(&self, _key: &str, _error: &str) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}


/// Prometheus counters and histograms in a private [`Registry`].
///
/// Clones share the same series.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    cache_operations: IntCounterVec,
    cache_duration: HistogramVec,
    http_requests: IntCounterVec,
    http_duration: HistogramVec,
}

impl PrometheusMetrics {
    /// # Errors
    /// `Error::ConfigError` if a series cannot be registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_operations = IntCounterVec::new(
            Opts::new("cache_operations_total", "Cache-aside lookups by outcome"),
            &["outcome"],
        )
        .map_err(registration)?;
        let cache_duration = HistogramVec::new(
            HistogramOpts::new(
                "cache_operation_duration_seconds",
                "Time from lookup to answer, by outcome",
            )
            .buckets(CACHE_LATENCY_BUCKETS.to_vec()),
            &["outcome"],
        )
        .map_err(registration)?;
        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "route", "status"],
        )
        .map_err(registration)?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "route"],
        )
        .map_err(registration)?;

        registry
            .register(Box::new(cache_operations.clone()))
            .map_err(registration)?;
        registry
            .register(Box::new(cache_duration.clone()))
            .map_err(registration)?;
        registry
            .register(Box::new(http_requests.clone()))
            .map_err(registration)?;
        registry
            .register(Box::new(http_duration.clone()))
            .map_err(registration)?;

        Ok(PrometheusMetrics {
            registry,
            cache_operations,
            cache_duration,
            http_requests,
            http_duration,
        })
    }

    /// Count one answered request. `route` is the matched route template,
    /// never the raw path.
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, route, status.as_str()])
            .inc();
        self.http_duration
            .with_label_values(&[method, route])
            .observe(duration.as_secs_f64());
    }

    /// Number of cache lookups that ended with `outcome`.
    pub fn cache_count(&self, outcome: &str) -> u64 {
        self.cache_operations.with_label_values(&[outcome]).get()
    }

    /// Text exposition format of every series.
    ///
    /// # Errors
    /// `Error::Other` if encoding fails.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Other(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Other(format!("metrics are not UTF-8: {}", e)))
    }

    fn count(&self, outcome: &str, duration: Option<Duration>) {
        self.cache_operations.with_label_values(&[outcome]).inc();
        if let Some(duration) = duration {
            self.cache_duration
                .with_label_values(&[outcome])
                .observe(duration.as_secs_f64());
        }
    }
}

fn registration(e: prometheus::Error) -> Error {
    Error::ConfigError(format!("metrics registration failed: {}", e))
}

impl CacheMetrics for PrometheusMetrics {
    fn record_hit(&self, _key: &str, duration: Duration) {
        self.count("hit", Some(duration));
    }

    fn record_miss(&self, _key: &str, _duration: Duration) {
        self.count("miss", None);
    }

    fn record_populate(&self, _key: &str, duration: Duration) {
        self.count("populate", Some(duration));
    }

    fn record_write_failure(&self, _key: &str, _error: &str) {
        self.count("write_failure", None);
    }

    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
        self.count("error", None);
    }
}

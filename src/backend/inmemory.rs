//! In-memory store (tests, local development).
//!
//! Uses DashMap for per-key sharded access and expires entries lazily on read,
//! mirroring how the shared store honours `EX`.

use super::CacheBackend;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        StoredValue { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// Thread-safe in-memory store.
///
/// Clones share the same map. [`InMemoryBackend::set_available`] simulates an
/// unreachable store so failure paths can be tested without a network.
///
/// # Example
///
/// ```no_run
/// use marquee::backend::{CacheBackend, InMemoryBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///     backend.set("550-detail", b"{}".to_vec(), Some(Duration::from_secs(300))).await?;
///     assert!(backend.get("550-detail").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, StoredValue>>,
    available: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Current number of entries, expired ones included until next access.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Toggle reachability. While unavailable every call fails with
    /// `Error::CacheUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            warn!("⚠ InMemory store marked unavailable");
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::CacheUnavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;

        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                debug!("✓ InMemory GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
        }

        self.store.remove_if(key, |_, entry| entry.is_expired());
        debug!("✓ InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.check_available()?;
        self.store
            .insert(key.to_string(), StoredValue::new(value, ttl));

        match ttl {
            Some(d) => debug!("✓ InMemory SET {} (TTL: {:?})", key, d),
            None => debug!("✓ InMemory SET {}", key),
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .store
            .get(key)
            .is_some_and(|entry| !entry.is_expired()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

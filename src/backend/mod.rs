//! KV store backends.
//!
//! The shared store speaks three verbs: `GET key`, `SET key value [EX seconds]`
//! and `DEL key`. Values are raw bytes here; the typed JSON layer lives in
//! [`crate::client`].

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "inmemory")]
pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisConfig};

/// Trait for KV store implementations.
///
/// **IMPORTANT:** All methods use `&self`; implementations hold their state
/// behind `Arc` or an external connection pool so one backend can be cloned
/// into every request task.
///
/// **ASYNC:** Methods return `Send` futures so route handlers stay spawnable.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Retrieve value by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value present and not expired
    /// - `Ok(None)` - Key absent
    ///
    /// # Errors
    /// Returns `Err(Error::CacheUnavailable)` if the store cannot be reached.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store value with optional expiry.
    ///
    /// `ttl = None` writes the key without expiry.
    ///
    /// # Errors
    /// Returns `Err(Error::CacheUnavailable)` if the store cannot be reached.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove value. Deleting an absent key is not an error.
    ///
    /// # Errors
    /// Returns `Err(Error::CacheUnavailable)` if the store cannot be reached.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if key exists.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backend_exists_default() {
        let backend = InMemoryBackend::new();
        backend
            .set("key", vec![1, 2, 3], None)
            .await
            .expect("Failed to set key");
        assert!(backend.exists("key").await.expect("Failed to check exists"));
        assert!(!backend
            .exists("nonexistent")
            .await
            .expect("Failed to check exists"));
    }
}

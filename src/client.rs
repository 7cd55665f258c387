//! Typed JSON access to the shared store.

use crate::backend::CacheBackend;
use crate::error::Result;
use crate::serialization;
use crate::ttl::{Ttl, TtlPolicy};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON get/set/delete over a [`CacheBackend`], resolving [`Ttl`] against
/// the process-wide [`TtlPolicy`].
///
/// Clones share the backend.
#[derive(Clone)]
pub struct CacheClient<B: CacheBackend> {
    backend: B,
    ttl_policy: TtlPolicy,
}

impl<B: CacheBackend> CacheClient<B> {
    pub fn new(backend: B) -> Self {
        CacheClient {
            backend,
            ttl_policy: TtlPolicy::default(),
        }
    }

    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        self.ttl_policy
    }

    /// Read and decode `key`. Absent and blank values are `Ok(None)`.
    ///
    /// # Errors
    /// - `Error::CacheUnavailable` if the store cannot be reached
    /// - `Error::DeserializationError` if the value is not a `T`
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key).await? {
            Some(bytes) => serialization::decode(&bytes),
            None => Ok(None),
        }
    }

    /// Encode and write `value` under `key`.
    ///
    /// # Errors
    /// - `Error::ValidationError` for `Ttl::After(Duration::ZERO)`
    /// - `Error::CacheUnavailable` if the store cannot be reached
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Ttl) -> Result<()> {
        let expiry = self.ttl_policy.resolve(ttl)?;
        let bytes = serialization::encode(value)?;
        self.backend.set(key, bytes, expiry).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    /// True when `key` holds a non-blank value.
    pub async fn is_set(&self, key: &str) -> Result<bool> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(serialization::decode::<serde_json::Value>(&bytes)
                .map(|v| v.is_some())
                .unwrap_or(true)),
            None => Ok(false),
        }
    }
}

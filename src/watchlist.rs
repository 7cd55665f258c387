//! Watchlist records in the relational store.
//!
//! Content routes only ask "is this movie on the caller's watchlist?"; the
//! `/watchlist` routes do full CRUD with an ownership check.
//!
//! [`InMemoryWatchlist`] backs tests and local runs. `PgWatchlist`
//! (feature `postgres`) is the production store.

use crate::error::{Error, Result};
use crate::identity::SubjectId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Default and upper bound for `limit` on list requests.
pub const DEFAULT_PAGE_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub id: Uuid,
    pub subject_id: String,
    pub movie_id: u64,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// One page of a subject's watchlist, newest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub items: Vec<WatchlistItem>,
}

/// Trait for watchlist storage.
///
/// Methods return `Send` futures so one store can sit behind the router.
pub trait WatchlistStore: Send + Sync + 'static {
    /// Does `subject` have `movie_id` on their list?
    fn exists_for(&self, subject: &SubjectId, movie_id: u64)
        -> impl Future<Output = Result<bool>> + Send;

    fn list(
        &self,
        subject: &SubjectId,
        limit: u64,
        offset: u64,
    ) -> impl Future<Output = Result<Page>> + Send;

    /// # Errors
    /// `Error::ValidationError` if the movie is already on the list.
    fn add(&self, subject: &SubjectId, movie_id: u64)
        -> impl Future<Output = Result<WatchlistItem>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = Result<Option<WatchlistItem>>> + Send;

    /// # Errors
    /// `Error::NotFound` if no such item.
    fn update(&self, id: Uuid, is_complete: bool)
        -> impl Future<Output = Result<WatchlistItem>> + Send;

    /// Deleting an absent item is not an error.
    fn delete(&self, id: Uuid) -> impl Future<Output = Result<()>> + Send;
}

/// Fetch item `id` and check it belongs to `subject`.
///
/// # Errors
/// - `Error::ValidationError` if the item does not exist
/// - `Error::Forbidden` if it belongs to someone else
pub async fn owned_item<W: WatchlistStore>(
    store: &W,
    subject: &SubjectId,
    id: Uuid,
) -> Result<WatchlistItem> {
    let item = store
        .get(id)
        .await?
        .ok_or_else(|| Error::ValidationError("watchlist item does not exist".to_string()))?;

    if item.subject_id != subject.as_str() {
        return Err(Error::Forbidden(
            "watchlist item belongs to another user".to_string(),
        ));
    }
    Ok(item)
}

/// Clamp a requested page size into `1..=MAX_PAGE_LIMIT`.
pub fn clamp_limit(limit: Option<u64>) -> u64 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

struct StoredItem {
    seq: u64,
    item: WatchlistItem,
}

/// DashMap-backed watchlist. Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryWatchlist {
    items: Arc<DashMap<Uuid, StoredItem>>,
    next_seq: Arc<AtomicU64>,
}

impl InMemoryWatchlist {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchlistStore for InMemoryWatchlist {
    async fn exists_for(&self, subject: &SubjectId, movie_id: u64) -> Result<bool> {
        Ok(self.items.iter().any(|entry| {
            entry.item.subject_id == subject.as_str() && entry.item.movie_id == movie_id
        }))
    }

    async fn list(&self, subject: &SubjectId, limit: u64, offset: u64) -> Result<Page> {
        let mut owned: Vec<(u64, WatchlistItem)> = self
            .items
            .iter()
            .filter(|entry| entry.item.subject_id == subject.as_str())
            .map(|entry| (entry.seq, entry.item.clone()))
            .collect();
        owned.sort_by(|a, b| b.0.cmp(&a.0));

        let total = owned.len() as u64;
        let items = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, item)| item)
            .collect();

        Ok(Page {
            total,
            offset,
            limit,
            items,
        })
    }

    async fn add(&self, subject: &SubjectId, movie_id: u64) -> Result<WatchlistItem> {
        if self.exists_for(subject, movie_id).await? {
            return Err(Error::ValidationError(format!(
                "movie {} is already on the watchlist",
                movie_id
            )));
        }

        let now = Utc::now();
        let item = WatchlistItem {
            id: Uuid::new_v4(),
            subject_id: subject.as_str().to_string(),
            movie_id,
            is_complete: false,
            created_at: now,
            modified_at: now,
        };
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.items.insert(
            item.id,
            StoredItem {
                seq,
                item: item.clone(),
            },
        );
        debug!("Watchlist ADD {} for {}", movie_id, subject);
        Ok(item)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WatchlistItem>> {
        Ok(self.items.get(&id).map(|entry| entry.item.clone()))
    }

    async fn update(&self, id: Uuid, is_complete: bool) -> Result<WatchlistItem> {
        let mut entry = self
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("watchlist item {}", id)))?;
        entry.item.is_complete = is_complete;
        entry.item.modified_at = Utc::now();
        Ok(entry.item.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.items.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(id: &str) -> SubjectId {
        SubjectId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_exists() {
        let store = InMemoryWatchlist::new();
        store.add(&u("U1"), 42).await.unwrap();

        assert!(store.exists_for(&u("U1"), 42).await.unwrap());
        assert!(!store.exists_for(&u("U2"), 42).await.unwrap());
        assert!(!store.exists_for(&u("U1"), 43).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let store = InMemoryWatchlist::new();
        store.add(&u("U1"), 42).await.unwrap();

        assert!(matches!(
            store.add(&u("U1"), 42).await,
            Err(Error::ValidationError(_))
        ));
        // another subject may add the same movie
        assert!(store.add(&u("U2"), 42).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paged() {
        let store = InMemoryWatchlist::new();
        for movie in [1, 2, 3, 4] {
            store.add(&u("U1"), movie).await.unwrap();
        }
        store.add(&u("U2"), 99).await.unwrap();

        let page = store.list(&u("U1"), 2, 1).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(
            page.items.iter().map(|i| i.movie_id).collect::<Vec<_>>(),
            vec![3, 2]
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryWatchlist::new();
        let item = store.add(&u("U1"), 42).await.unwrap();

        let updated = store.update(item.id, true).await.unwrap();
        assert!(updated.is_complete);
        assert!(updated.modified_at >= item.modified_at);

        store.delete(item.id).await.unwrap();
        assert_eq!(store.get(item.id).await.unwrap(), None);
        assert!(matches!(
            store.update(item.id, false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_owned_item_checks_owner() {
        let store = InMemoryWatchlist::new();
        let item = store.add(&u("U1"), 42).await.unwrap();

        assert_eq!(owned_item(&store, &u("U1"), item.id).await.unwrap(), item);
        assert!(matches!(
            owned_item(&store, &u("U2"), item.id).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            owned_item(&store, &u("U1"), Uuid::new_v4()).await,
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(1000)), MAX_PAGE_LIMIT);
    }
}

//! Content aggregation: route-level logic on top of the cache-aside resolver.
//!
//! Every read builds its key from route parameters (plus the subject where
//! the provider answer is personalized), resolves it against the upstream
//! gateway, and only then splices in per-subject facts. Per-subject facts
//! are never part of a cached document, so one cached document serves
//! every caller.

use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use crate::identity::SubjectId;
use crate::key::{self, CacheKeyBuilder, FeaturedList, Resource};
use crate::resolver::CacheAside;
use crate::session::SessionRegistry;
use crate::strategy::FailurePolicy;
use crate::ttl::Ttl;
use crate::upstream::{paths, ContentProvider};
use crate::watchlist::WatchlistStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Entries kept from the ranked now-playing list.
pub const NOW_PLAYING_LIMIT: usize = 5;

/// Highest page the provider serves.
pub const MAX_PAGE: u32 = 500;

/// Movie detail as served: provider fields plus the caller's flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovieDetail {
    #[serde(flatten)]
    pub provider: Map<String, Value>,
    pub is_favorite: bool,
    pub is_added_in_watchlist: bool,
}

/// The merged featured document.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Featured {
    pub now_playing: Vec<Value>,
    pub popular: Vec<Value>,
    pub top_rated: Vec<Value>,
    pub upcoming: Vec<Value>,
}

/// Sort by `popularity` descending and keep the first [`NOW_PLAYING_LIMIT`].
///
/// The sort is stable: equal popularity keeps provider order. Entries
/// without a numeric popularity rank as `0.0`.
pub fn rank_now_playing(mut results: Vec<Value>) -> Vec<Value> {
    results.sort_by(|a, b| popularity(b).total_cmp(&popularity(a)));
    results.truncate(NOW_PLAYING_LIMIT);
    results
}

fn popularity(movie: &Value) -> f64 {
    movie
        .get("popularity")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn results_of(page: Value) -> Vec<Value> {
    match page {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(results)) => results,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn validate_page(page: u32) -> Result<u32> {
    if page == 0 || page > MAX_PAGE {
        return Err(Error::ValidationError(format!(
            "page must be between 1 and {}",
            MAX_PAGE
        )));
    }
    Ok(page)
}

/// Route logic for `/content`.
pub struct ContentService<B: CacheBackend, P: ContentProvider, W: WatchlistStore> {
    resolver: CacheAside<B>,
    provider: P,
    watchlist: W,
    sessions: SessionRegistry<B>,
}

impl<B, P, W> ContentService<B, P, W>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    pub fn new(resolver: CacheAside<B>, provider: P, watchlist: W) -> Self {
        let sessions = SessionRegistry::new(resolver.client().clone());
        ContentService {
            resolver,
            provider,
            watchlist,
            sessions,
        }
    }

    pub fn resolver(&self) -> &CacheAside<B> {
        &self.resolver
    }

    pub fn watchlist(&self) -> &W {
        &self.watchlist
    }

    pub fn sessions(&self) -> &SessionRegistry<B> {
        &self.sessions
    }

    async fn cached(&self, key: &str, path: &str, query: Vec<(&'static str, String)>) -> Result<Value> {
        self.resolver
            .resolve_or_populate(key, || self.provider.fetch(path, &query), Ttl::Default)
            .await
    }

    /// Discovery feed shaped by the caller's stored profile.
    pub async fn recommended_for(&self, subject: &SubjectId) -> Result<Value> {
        let mut query = Vec::new();
        match self.sessions.profile(subject).await {
            Ok(Some(profile)) => {
                if !profile.genres.is_empty() {
                    let genres = profile
                        .genres
                        .iter()
                        .map(u64::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    query.push(("with_genres", genres));
                }
                query.push(("include_adult", profile.includes_adult().to_string()));
            }
            Ok(None) => {}
            Err(Error::DeserializationError(msg)) => {
                warn!("⚠ Unreadable profile, recommending unfiltered: {}", msg);
            }
            Err(e) => return Err(e),
        }

        self.cached(&CacheKeyBuilder::recommended_for(subject), paths::DISCOVER, query)
            .await
    }

    pub async fn recommendations(&self, movie_id: u64) -> Result<Value> {
        let key = CacheKeyBuilder::resource(movie_id, Resource::Recommendation);
        self.cached(&key, &paths::recommendations(movie_id), Vec::new())
            .await
    }

    pub async fn videos(&self, movie_id: u64) -> Result<Value> {
        let key = CacheKeyBuilder::resource(movie_id, Resource::Video);
        self.cached(&key, &paths::videos(movie_id), Vec::new()).await
    }

    /// Provider detail plus `is_favorite` and `is_added_in_watchlist` for
    /// the caller (both `false` when anonymous).
    pub async fn detail(&self, movie_id: u64, subject: Option<&SubjectId>) -> Result<MovieDetail> {
        let key = CacheKeyBuilder::resource(movie_id, Resource::Detail);
        let path = paths::detail(movie_id);
        let mut provider: Map<String, Value> = self
            .resolver
            .resolve_or_populate(
                &key,
                || async {
                    match self.provider.fetch(&path, &[]).await? {
                        Value::Object(map) => Ok(map),
                        other => Err(Error::DeserializationError(format!(
                            "detail for {} is not an object: {}",
                            movie_id, other
                        ))),
                    }
                },
                Ttl::Default,
            )
            .await?;

        provider.remove("is_favorite");
        provider.remove("is_added_in_watchlist");

        let (is_favorite, is_added_in_watchlist) = match subject {
            Some(subject) => (
                self.is_favorite(subject, movie_id).await?,
                self.watchlist.exists_for(subject, movie_id).await?,
            ),
            None => (false, false),
        };

        Ok(MovieDetail {
            provider,
            is_favorite,
            is_added_in_watchlist,
        })
    }

    /// Search by free text. The query is canonicalized before both the key
    /// and the upstream call.
    pub async fn search(&self, raw_query: &str, page: u32, subject: Option<&SubjectId>) -> Result<Value> {
        let query = key::canonical_query(raw_query)?;
        let page = validate_page(page)?;
        let cache_key = CacheKeyBuilder::search(subject, &query, page);

        self.cached(
            &cache_key,
            paths::SEARCH,
            vec![("query", query.clone()), ("page", page.to_string())],
        )
        .await
    }

    pub async fn genres(&self) -> Result<Value> {
        self.cached(key::GENRE_LIST_KEY, paths::GENRE_LIST, Vec::new())
            .await
    }

    pub async fn genre_page(&self, genre_id: u64, page: u32) -> Result<Value> {
        let page = validate_page(page)?;
        self.cached(
            &CacheKeyBuilder::genre_page(genre_id, page),
            paths::DISCOVER,
            vec![("with_genres", genre_id.to_string()), ("page", page.to_string())],
        )
        .await
    }

    /// Four lists, each cached under its own key, merged into one cached
    /// document. Any store outage fails the whole request.
    pub async fn featured(&self) -> Result<Featured> {
        self.resolver
            .resolve_with_policy(
                key::FEATURED_KEY,
                || async {
                    let (now_playing, popular, top_rated, upcoming) = futures::try_join!(
                        self.featured_list(FeaturedList::NowPlaying),
                        self.featured_list(FeaturedList::Popular),
                        self.featured_list(FeaturedList::TopRated),
                        self.featured_list(FeaturedList::Upcoming),
                    )?;

                    Ok(Featured {
                        now_playing: rank_now_playing(results_of(now_playing)),
                        popular: results_of(popular),
                        top_rated: results_of(top_rated),
                        upcoming: results_of(upcoming),
                    })
                },
                Ttl::Default,
                FailurePolicy::FailClosed,
            )
            .await
    }

    async fn featured_list(&self, list: FeaturedList) -> Result<Value> {
        let path = match list {
            FeaturedList::NowPlaying => paths::NOW_PLAYING,
            FeaturedList::Popular => paths::POPULAR,
            FeaturedList::TopRated => paths::TOP_RATED,
            FeaturedList::Upcoming => paths::UPCOMING,
        };
        self.resolver
            .resolve_with_policy(
                &CacheKeyBuilder::featured_list(list),
                || self.provider.fetch(path, &[]),
                Ttl::Default,
                FailurePolicy::FailClosed,
            )
            .await
    }

    /// Store a favorite flag. Flags never expire.
    pub async fn mark_favorite(&self, subject: &SubjectId, movie_id: u64) -> Result<()> {
        self.resolver
            .client()
            .set_json(&CacheKeyBuilder::favorite(subject, movie_id), &true, Ttl::Never)
            .await
    }

    pub async fn unmark_favorite(&self, subject: &SubjectId, movie_id: u64) -> Result<()> {
        self.resolver
            .client()
            .delete(&CacheKeyBuilder::favorite(subject, movie_id))
            .await
    }

    /// Reads the stored flag. Only a stored `true` counts; an absent,
    /// `false` or malformed marker reads as not favorited.
    pub async fn is_favorite(&self, subject: &SubjectId, movie_id: u64) -> Result<bool> {
        let key = CacheKeyBuilder::favorite(subject, movie_id);
        match self.resolver.client().get_json::<Value>(&key).await {
            Ok(flag) => Ok(matches!(flag, Some(Value::Bool(true)))),
            Err(Error::DeserializationError(msg)) => {
                warn!("⚠ Favorite flag {} is not JSON, reporting false: {}", key, msg);
                Ok(false)
            }
            Err(Error::CacheUnavailable(msg)) if self.resolver.failure_policy().degrades() => {
                warn!("⚠ Favorite flag {} unreadable, reporting false: {}", key, msg);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn movie(id: u64, popularity: f64) -> Value {
        json!({"id": id, "popularity": popularity})
    }

    fn ids(list: &[Value]) -> Vec<u64> {
        list.iter().filter_map(|m| m["id"].as_u64()).collect()
    }

    #[test]
    fn test_rank_now_playing_sorts_and_truncates() {
        let ranked = rank_now_playing(vec![
            movie(1, 10.0),
            movie(2, 50.0),
            movie(3, 30.0),
            movie(4, 80.0),
            movie(5, 20.0),
            movie(6, 60.0),
        ]);
        assert_eq!(ids(&ranked), vec![4, 6, 2, 3, 5]);
    }

    #[test]
    fn test_rank_now_playing_keeps_provider_order_on_ties() {
        let ranked = rank_now_playing(vec![
            movie(1, 5.0),
            movie(2, 9.0),
            movie(3, 5.0),
            movie(4, 5.0),
        ]);
        assert_eq!(ids(&ranked), vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_rank_now_playing_missing_popularity_sorts_last() {
        let ranked = rank_now_playing(vec![json!({"id": 1}), movie(2, 0.5)]);
        assert_eq!(ids(&ranked), vec![2, 1]);
    }

    #[test]
    fn test_results_of_tolerates_odd_pages() {
        assert_eq!(results_of(json!({"results": [1, 2]})).len(), 2);
        assert!(results_of(json!({"page": 1})).is_empty());
        assert!(results_of(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_detail_envelope_flattens_provider_fields() {
        let mut provider = Map::new();
        provider.insert("id".to_string(), json!(42));
        provider.insert("title".to_string(), json!("Alien"));

        let detail = MovieDetail {
            provider,
            is_favorite: true,
            is_added_in_watchlist: false,
        };
        assert_eq!(
            serde_json::to_value(&detail).unwrap(),
            json!({"id": 42, "title": "Alien", "is_favorite": true, "is_added_in_watchlist": false})
        );
    }

    #[test]
    fn test_validate_page() {
        assert!(validate_page(0).is_err());
        assert_eq!(validate_page(1).unwrap(), 1);
        assert!(validate_page(MAX_PAGE + 1).is_err());
    }
}

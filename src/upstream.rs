//! Upstream movie-database gateway.
//!
//! One base URL, one bearer credential, JSON in and out. The gateway is only
//! ever used as the populate step of a cache-aside lookup and never retries.

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Default bound on one upstream request.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters in the order they are sent.
pub type QueryParams = [(&'static str, String)];

/// Source of provider documents.
pub trait ContentProvider: Send + Sync + 'static {
    /// GET `path` with `query` and return the decoded body.
    ///
    /// # Errors
    /// - `Error::UpstreamUnavailable` on connect/timeout/read failures
    /// - `Error::UpstreamError(status)` on a non-2xx answer
    /// - `Error::DeserializationError` when the body is not JSON
    fn fetch(&self, path: &str, query: &QueryParams) -> impl Future<Output = Result<Value>> + Send;
}

/// Provider paths.
pub mod paths {
    pub const DISCOVER: &str = "/discover/movie";
    pub const SEARCH: &str = "/search/movie";
    pub const GENRE_LIST: &str = "/genre/movie/list";
    pub const NOW_PLAYING: &str = "/movie/now_playing";
    pub const POPULAR: &str = "/movie/popular";
    pub const TOP_RATED: &str = "/movie/top_rated";
    pub const UPCOMING: &str = "/movie/upcoming";

    pub fn detail(movie_id: u64) -> String {
        format!("/movie/{}", movie_id)
    }

    pub fn videos(movie_id: u64) -> String {
        format!("/movie/{}/videos", movie_id)
    }

    pub fn recommendations(movie_id: u64) -> String {
        format!("/movie/{}/recommendations", movie_id)
    }
}

/// reqwest-backed gateway to the movie database.
#[derive(Clone)]
pub struct MovieDbGateway {
    client: reqwest::Client,
    base_url: String,
}

impl MovieDbGateway {
    /// # Errors
    /// `Error::ConfigError` if the token is not a valid header value or the
    /// client cannot be built.
    pub fn new(base_url: &str, access_token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| Error::ConfigError(format!("invalid upstream access token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build upstream client: {}", e)))?;

        Ok(MovieDbGateway {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ContentProvider for MovieDbGateway {
    async fn fetch(&self, path: &str, query: &QueryParams) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("→ Upstream GET {}", path);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Upstream GET {} answered {}", path, status);
            return Err(Error::UpstreamError(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::DeserializationError(format!("upstream body for {}: {}", path, e))
        })
    }
}

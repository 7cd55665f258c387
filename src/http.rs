//! HTTP surface (axum).
//!
//! Every core error is translated here into one envelope:
//! `{"title": ..., "detail": ..., "error_code": <status>}`. The three
//! authentication failures all answer 403, and a bad token reads exactly
//! like a revoked session.

use crate::backend::CacheBackend;
use crate::content::{ContentService, Featured, MovieDetail};
use crate::error::Error;
use crate::identity::{IdentityResolver, SubjectId};
use crate::observability::PrometheusMetrics;
use crate::upstream::ContentProvider;
use crate::watchlist::{self, Page, WatchlistStore};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Shown for both a bad token and a revoked session.
pub const INVALID_TOKEN_DETAIL: &str = "Token is invalid or expired";

/// API HTTP error.
#[derive(Debug)]
pub struct ApiError {
    pub http_code: StatusCode,
    pub body: ErrorBody,
}

/// Error body serialized in JSON responses.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.detail.is_empty() {
            write!(f, "{}", self.body.title)
        } else {
            write!(f, "{}: {}", self.body.title, self.body.detail)
        }
    }
}

impl ApiError {
    pub fn new(http_code: StatusCode) -> Self {
        ApiError {
            http_code,
            body: ErrorBody {
                title: http_code.canonical_reason().unwrap_or_default().to_string(),
                detail: String::new(),
                error_code: Some(http_code.as_u16()),
            },
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST).detail(detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN).detail(detail)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).detail("Internal server error")
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.body.detail = detail.into();
        self
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match &e {
            Error::Unauthenticated(_) => {
                debug!("403 ({})", e);
                ApiError::forbidden("Authentication required")
            }
            Error::InvalidToken(_) | Error::SessionRevoked(_) => {
                debug!("403 ({})", e);
                ApiError::forbidden(INVALID_TOKEN_DETAIL)
            }
            Error::ValidationError(msg) => ApiError::bad_request(msg.clone()),
            Error::Forbidden(msg) => ApiError::forbidden(msg.clone()),
            Error::NotFound(msg) => ApiError::new(StatusCode::NOT_FOUND).detail(msg.clone()),
            _ => {
                error!("500 [{}] {}", e.kind(), e);
                ApiError::internal()
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.http_code, Json(self.body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Shared handler state.
pub struct AppState<B: CacheBackend, P: ContentProvider, W: WatchlistStore> {
    pub content: Arc<ContentService<B, P, W>>,
    pub identity: Arc<IdentityResolver<B>>,
    pub metrics: Option<PrometheusMetrics>,
}

impl<B: CacheBackend, P: ContentProvider, W: WatchlistStore> Clone for AppState<B, P, W> {
    fn clone(&self) -> Self {
        AppState {
            content: Arc::clone(&self.content),
            identity: Arc::clone(&self.identity),
            metrics: self.metrics.clone(),
        }
    }
}

impl<B: CacheBackend, P: ContentProvider, W: WatchlistStore> AppState<B, P, W> {
    pub fn new(content: ContentService<B, P, W>, identity: IdentityResolver<B>) -> Self {
        AppState {
            content: Arc::new(content),
            identity: Arc::new(identity),
            metrics: None,
        }
    }

    /// Count requests and serve them at `/metrics`.
    pub fn with_metrics(mut self, metrics: PrometheusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn require(&self, headers: &HeaderMap) -> ApiResult<SubjectId> {
        Ok(self.identity.resolve(authorization(headers)).await?)
    }

    async fn optional(&self, headers: &HeaderMap) -> ApiResult<Option<SubjectId>> {
        Ok(self.identity.resolve_optional(authorization(headers)).await?)
    }
}

/// Build the router with every route mounted. `/metrics` and request
/// counting are added when the state carries metrics.
pub fn router<B, P, W>(state: AppState<B, P, W>) -> Router
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let routes = Router::new()
        .route("/health", get(health::<B, P, W>))
        .route("/auth/session", delete(logout::<B, P, W>))
        .route("/content/recommended/", get(recommended::<B, P, W>))
        .route("/content/recommended/{movie_id}/", get(recommendations::<B, P, W>))
        .route("/content/detail/{movie_id}/", get(detail::<B, P, W>))
        .route("/content/videos/{movie_id}/", get(videos::<B, P, W>))
        .route("/content/search/", get(search::<B, P, W>))
        .route("/content/genres/", get(genres::<B, P, W>))
        .route("/content/genre/{genre_id}/", get(genre_page::<B, P, W>))
        .route("/content/featured-movies/", get(featured::<B, P, W>))
        .route(
            "/content/favorite/{movie_id}/",
            post(mark_favorite::<B, P, W>).delete(unmark_favorite::<B, P, W>),
        )
        .route(
            "/watchlist/",
            get(list_watchlist::<B, P, W>).post(add_watchlist_item::<B, P, W>),
        )
        .route(
            "/watchlist/{item_id}/",
            put(update_watchlist_item::<B, P, W>).delete(remove_watchlist_item::<B, P, W>),
        );

    let routes = match state.metrics.clone() {
        Some(metrics) => routes
            .route("/metrics", get(render_metrics::<B, P, W>))
            .route_layer(middleware::from_fn_with_state(metrics, track_requests)),
        None => routes,
    };

    routes.with_state(state)
}

async fn track_requests(
    State(metrics): State<PrometheusMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics.record_http_request(&method, &route, response.status().as_u16(), started.elapsed());
    response
}

async fn render_metrics<B, P, W>(State(state): State<AppState<B, P, W>>) -> Response
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let Some(metrics) = state.metrics.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

fn parse_id(raw: &str, what: &str) -> ApiResult<u64> {
    match raw.parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::bad_request(format!("invalid {} '{}'", what, raw))),
    }
}

fn parse_item_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::bad_request(format!("invalid watchlist item id '{}'", raw)))
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub movie_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub is_complete: bool,
}

async fn health<B, P, W>(State(state): State<AppState<B, P, W>>) -> Response
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let up = state
        .content
        .resolver()
        .client()
        .backend()
        .health_check()
        .await
        .unwrap_or(false);

    if up {
        (StatusCode::OK, Json(json!({"status": "ok", "cache": "up"}))).into_response()
    } else {
        warn!("Health check: store unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded", "cache": "down"})),
        )
            .into_response()
    }
}

async fn logout<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.require(&headers).await?;
    state.identity.sessions().revoke(&subject).await?;
    Ok(message("Session revoked"))
}

async fn recommended<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.require(&headers).await?;
    Ok(Json(state.content.recommended_for(&subject).await?))
}

async fn recommendations<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(movie_id): Path<String>,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    state.optional(&headers).await?;
    let movie_id = parse_id(&movie_id, "movie id")?;
    Ok(Json(state.content.recommendations(movie_id).await?))
}

async fn detail<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(movie_id): Path<String>,
) -> ApiResult<Json<MovieDetail>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.optional(&headers).await?;
    let movie_id = parse_id(&movie_id, "movie id")?;
    Ok(Json(state.content.detail(movie_id, subject.as_ref()).await?))
}

async fn videos<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(movie_id): Path<String>,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    state.optional(&headers).await?;
    let movie_id = parse_id(&movie_id, "movie id")?;
    Ok(Json(state.content.videos(movie_id).await?))
}

async fn search<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let Query(params) = params?;
    let subject = state.optional(&headers).await?;
    let query = params
        .query
        .ok_or_else(|| ApiError::bad_request("query parameter is required"))?;

    Ok(Json(
        state
            .content
            .search(&query, params.page.unwrap_or(1), subject.as_ref())
            .await?,
    ))
}

async fn genres<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    state.optional(&headers).await?;
    Ok(Json(state.content.genres().await?))
}

async fn genre_page<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(genre_id): Path<String>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let Query(params) = params?;
    state.optional(&headers).await?;
    let genre_id = parse_id(&genre_id, "genre id")?;
    Ok(Json(
        state
            .content
            .genre_page(genre_id, params.page.unwrap_or(1))
            .await?,
    ))
}

async fn featured<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
) -> ApiResult<Json<Featured>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    state.optional(&headers).await?;
    Ok(Json(state.content.featured().await?))
}

async fn mark_favorite<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(movie_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.require(&headers).await?;
    let movie_id = parse_id(&movie_id, "movie id")?;
    state.content.mark_favorite(&subject, movie_id).await?;
    Ok((StatusCode::CREATED, message("Movie marked as favorite")))
}

async fn unmark_favorite<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(movie_id): Path<String>,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.require(&headers).await?;
    let movie_id = parse_id(&movie_id, "movie id")?;
    state.content.unmark_favorite(&subject, movie_id).await?;
    Ok(message("Movie removed as favorite"))
}

async fn list_watchlist<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Page>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let Query(params) = params?;
    let subject = state.require(&headers).await?;
    let page = state
        .content
        .watchlist()
        .list(
            &subject,
            watchlist::clamp_limit(params.limit),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(page))
}

async fn add_watchlist_item<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    body: Result<Json<AddItemRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.require(&headers).await?;
    let Json(request) = body?;
    if request.movie_id == 0 {
        return Err(ApiError::bad_request("invalid movie id '0'"));
    }

    let item = state
        .content
        .watchlist()
        .add(&subject, request.movie_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "Watchlist item added", "data": item})),
    ))
}

async fn update_watchlist_item<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    body: Result<Json<UpdateItemRequest>, JsonRejection>,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.require(&headers).await?;
    let item_id = parse_item_id(&item_id)?;
    let Json(request) = body?;

    let store = state.content.watchlist();
    watchlist::owned_item(store, &subject, item_id).await?;
    let item = store.update(item_id, request.is_complete).await?;
    Ok(Json(json!({"message": "Watchlist item updated", "data": item})))
}

async fn remove_watchlist_item<B, P, W>(
    State(state): State<AppState<B, P, W>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> ApiResult<Json<Value>>
where
    B: CacheBackend,
    P: ContentProvider,
    W: WatchlistStore,
{
    let subject = state.require(&headers).await?;
    let item_id = parse_item_id(&item_id)?;

    let store = state.content.watchlist();
    watchlist::owned_item(store, &subject, item_id).await?;
    store.delete(item_id).await?;
    Ok(message("Watchlist item deleted"))
}

//! PostgreSQL watchlist store.
//!
//! Every call is bounded: a pool checkout waits at most
//! [`DEFAULT_ACQUIRE_TIMEOUT`] and a query runs at most
//! [`DEFAULT_QUERY_TIMEOUT`], enforced both by the server's
//! `statement_timeout` and by a client-side timer.

use crate::error::{Error, Result};
use crate::identity::SubjectId;
use crate::watchlist::{Page, WatchlistItem, WatchlistStore};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Longest wait for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest a single query may run.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS watchlist (
    id UUID PRIMARY KEY,
    subject_id TEXT NOT NULL,
    movie_id BIGINT NOT NULL,
    is_complete BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    modified_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT unique_subject_movie UNIQUE (subject_id, movie_id)
)"#;

#[derive(FromRow)]
struct WatchlistRow {
    id: Uuid,
    subject_id: String,
    movie_id: i64,
    is_complete: bool,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl TryFrom<WatchlistRow> for WatchlistItem {
    type Error = Error;

    fn try_from(row: WatchlistRow) -> Result<Self> {
        let movie_id = u64::try_from(row.movie_id)
            .map_err(|_| Error::RepositoryError(format!("negative movie id {}", row.movie_id)))?;
        Ok(WatchlistItem {
            id: row.id,
            subject_id: row.subject_id,
            movie_id,
            is_complete: row.is_complete,
            created_at: row.created_at,
            modified_at: row.modified_at,
        })
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::ValidationError(format!("{} out of range", what)))
}

/// Connection options for `database_url` with the server-side statement
/// timeout set to `query_timeout`.
///
/// # Errors
/// `Error::ConfigError` if the URL does not parse.
pub fn connect_options(database_url: &str, query_timeout: Duration) -> Result<PgConnectOptions> {
    let options = PgConnectOptions::from_str(database_url)
        .map_err(|e| Error::ConfigError(format!("Invalid database URL: {}", e)))?;
    Ok(options.options([(
        "statement_timeout",
        query_timeout.as_millis().to_string(),
    )]))
}

/// Run `query`, giving up after `limit`.
async fn bounded<T, F>(limit: Duration, query: F) -> Result<std::result::Result<T, sqlx::Error>>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    tokio::time::timeout(limit, query)
        .await
        .map_err(|_| Error::RepositoryError(format!("query timed out after {:?}", limit)))
}

/// SQLx + PostgreSQL watchlist.
#[derive(Clone)]
pub struct PgWatchlist {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgWatchlist {
    pub fn new(pool: PgPool) -> Self {
        PgWatchlist {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Connect and make sure the table exists.
    ///
    /// # Errors
    /// `Error::ConfigError` if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
            .connect_with(connect_options(database_url, DEFAULT_QUERY_TIMEOUT)?)
            .await
            .map_err(|e| Error::ConfigError(format!("Failed to connect to database: {}", e)))?;

        let store = PgWatchlist::new(pool);
        store.ensure_schema().await?;
        info!("✓ Postgres watchlist store ready");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        bounded(self.query_timeout, sqlx::query(SCHEMA).execute(&self.pool)).await??;
        Ok(())
    }
}

impl WatchlistStore for PgWatchlist {
    async fn exists_for(&self, subject: &SubjectId, movie_id: u64) -> Result<bool> {
        let query = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM watchlist WHERE subject_id = $1 AND movie_id = $2)",
        )
        .bind(subject.as_str())
        .bind(to_i64(movie_id, "movie id")?)
        .fetch_one(&self.pool);
        let exists: bool = bounded(self.query_timeout, query).await??;
        Ok(exists)
    }

    async fn list(&self, subject: &SubjectId, limit: u64, offset: u64) -> Result<Page> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM watchlist WHERE subject_id = $1")
                .bind(subject.as_str())
                .fetch_one(&self.pool);
        let total: i64 = bounded(self.query_timeout, count).await??;

        let query = sqlx::query_as::<_, WatchlistRow>(
            "SELECT * FROM watchlist WHERE subject_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(subject.as_str())
        .bind(to_i64(limit, "limit")?)
        .bind(to_i64(offset, "offset")?)
        .fetch_all(&self.pool);
        let rows = bounded(self.query_timeout, query).await??;

        let items = rows
            .into_iter()
            .map(WatchlistItem::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            total: total.max(0) as u64,
            offset,
            limit,
            items,
        })
    }

    async fn add(&self, subject: &SubjectId, movie_id: u64) -> Result<WatchlistItem> {
        let query = sqlx::query_as::<_, WatchlistRow>(
            "INSERT INTO watchlist (id, subject_id, movie_id) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(subject.as_str())
        .bind(to_i64(movie_id, "movie id")?)
        .fetch_one(&self.pool);
        let row = bounded(self.query_timeout, query).await?.map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::ValidationError(
                format!("movie {} is already on the watchlist", movie_id),
            ),
            other => Error::from(other),
        })?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<WatchlistItem>> {
        let query = sqlx::query_as::<_, WatchlistRow>("SELECT * FROM watchlist WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool);
        bounded(self.query_timeout, query)
            .await??
            .map(WatchlistItem::try_from)
            .transpose()
    }

    async fn update(&self, id: Uuid, is_complete: bool) -> Result<WatchlistItem> {
        let query = sqlx::query_as::<_, WatchlistRow>(
            "UPDATE watchlist SET is_complete = $2, modified_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(is_complete)
        .fetch_optional(&self.pool);
        let row = bounded(self.query_timeout, query)
            .await??
            .ok_or_else(|| Error::NotFound(format!("watchlist item {}", id)))?;

        row.try_into()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let query = sqlx::query("DELETE FROM watchlist WHERE id = $1")
            .bind(id)
            .execute(&self.pool);
        bounded(self.query_timeout, query).await??;
        Ok(())
    }
}

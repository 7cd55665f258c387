//! marquee server.
//!
//! Reads settings from the environment (and `.env`), connects to Redis and,
//! with the `postgres` feature, to the watchlist database, then serves the
//! content and watchlist routes until Ctrl-C.

use log::{error, info, warn};
use marquee::backend::RedisBackend;
use marquee::config::Settings;
use marquee::http::{self, AppState};
use marquee::identity::IdentityResolver;
use marquee::observability::PrometheusMetrics;
use marquee::session::SessionRegistry;
use marquee::token::TokenCodec;
use marquee::upstream::MovieDbGateway;
use marquee::watchlist::WatchlistStore;
use marquee::{CacheAside, CacheClient, ContentService, Result};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .ok();

    if let Err(e) = run().await {
        error!("marquee stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let settings = Settings::from_env()?;
    info!("Starting marquee {} on {}", marquee::VERSION, settings.bind_address());
    info!(
        "Cache policy: default ttl {:?}, failure mode {}, coalescing {}",
        settings.cache.ttl_policy, settings.cache.failure_policy, settings.cache.coalesce
    );

    with_watchlist(settings).await
}

#[cfg(feature = "postgres")]
async fn with_watchlist(settings: Settings) -> Result<()> {
    match settings.database_url.clone() {
        Some(url) => {
            let store = marquee::postgres::PgWatchlist::connect(&url, 5).await?;
            serve(settings, store).await
        }
        None => {
            warn!("⚠ DATABASE_URL not set, watchlist kept in memory");
            serve(settings, marquee::watchlist::InMemoryWatchlist::new()).await
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn with_watchlist(settings: Settings) -> Result<()> {
    if settings.database_url.is_some() {
        warn!("⚠ DATABASE_URL ignored: built without the postgres feature");
    }
    warn!("⚠ Watchlist kept in memory");
    serve(settings, marquee::watchlist::InMemoryWatchlist::new()).await
}

async fn serve<W: WatchlistStore>(settings: Settings, watchlist: W) -> Result<()> {
    let backend = RedisBackend::new(settings.cache.redis_config()).await?;
    let client = CacheClient::new(backend).with_ttl_policy(settings.cache.ttl_policy);

    let metrics = PrometheusMetrics::new()?;
    let resolver = CacheAside::new(client.clone())
        .with_metrics(Box::new(metrics.clone()))
        .with_failure_policy(settings.cache.failure_policy)
        .with_coalescing(settings.cache.coalesce);

    let gateway = MovieDbGateway::new(
        &settings.upstream.base_url,
        &settings.upstream.access_token,
        settings.upstream.timeout,
    )?;

    let identity = IdentityResolver::new(
        TokenCodec::new(
            settings.auth.secret_key.as_bytes(),
            settings.auth.token_lifetime,
        ),
        SessionRegistry::new(client),
    );

    let state = AppState::new(ContentService::new(resolver, gateway, watchlist), identity)
        .with_metrics(metrics);
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind_address())
        .await
        .map_err(|e| marquee::Error::ConfigError(format!("Failed to bind: {}", e)))?;
    info!("✓ Listening on http://{}", settings.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| marquee::Error::Other(format!("Server error: {}", e)))?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠ Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

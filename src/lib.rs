//! # marquee
//!
//! Shared-cache identity resolution and cache-aside content aggregation for
//! a movie catalogue backed by an external movie database.
//!
//! ## Pieces
//!
//! - **Identity:** [`IdentityResolver`] verifies an HS256 bearer token and
//!   then checks for a session marker in the shared KV store. Deleting the
//!   marker revokes every token issued for that subject.
//! - **Cache-aside:** [`CacheAside`] is the get-or-populate primitive. A miss
//!   calls the populate future, writes the value back with the configured
//!   [`ttl::TtlPolicy`], and returns it. Store outages follow a
//!   [`strategy::FailurePolicy`].
//! - **Upstream:** [`upstream::MovieDbGateway`] is a bearer-authenticated
//!   JSON client with a bounded timeout.
//! - **Aggregation:** [`ContentService`] holds the route logic (detail,
//!   search, genres, featured composite, favorites) and [`http::router`]
//!   mounts it on axum together with the watchlist routes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use marquee::{
//!     backend::InMemoryBackend, http, identity::IdentityResolver,
//!     session::SessionRegistry, token::TokenCodec, upstream::MovieDbGateway,
//!     watchlist::InMemoryWatchlist, CacheAside, CacheClient, ContentService,
//! };
//!
//! let client = CacheClient::new(InMemoryBackend::new());
//! let resolver = CacheAside::new(client.clone());
//! let gateway = MovieDbGateway::new("https://api.themoviedb.org/3", "token", Duration::from_secs(10))?;
//!
//! let identity = IdentityResolver::new(
//!     TokenCodec::new(b"secret", token::DEFAULT_TOKEN_LIFETIME),
//!     SessionRegistry::new(client),
//! );
//! let content = ContentService::new(resolver, gateway, InMemoryWatchlist::new());
//! let app = http::router(http::AppState::new(content, identity));
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod client;
pub mod coalesce;
pub mod config;
pub mod content;
pub mod error;
pub mod http;
pub mod identity;
pub mod key;
pub mod observability;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod resolver;
pub mod serialization;
pub mod session;
pub mod strategy;
pub mod token;
pub mod ttl;
pub mod upstream;
pub mod watchlist;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use client::CacheClient;
pub use content::ContentService;
pub use error::{Error, Result};
pub use identity::{IdentityResolver, SubjectId};
pub use key::CacheKeyBuilder;
pub use resolver::CacheAside;
pub use strategy::FailurePolicy;
pub use ttl::{Ttl, TtlPolicy};
pub use upstream::ContentProvider;
pub use watchlist::WatchlistStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

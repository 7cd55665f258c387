//! Cache key grammar shared by every service that talks to the store.
//!
//! The store doubles as the bus between the auth, content and watchlist
//! services, so these strings are a wire contract. Bump
//! [`KEY_GRAMMAR_VERSION`] on any change and roll all services together.
//!
//! | Form | Used for |
//! |------|----------|
//! | `<subject_id>` | session marker |
//! | `<id>-<suffix>` | resource-scoped content (`detail`, `video`, `recommendation`, `list`, `recommended`) |
//! | `<subject_id>-<movie_id>` | favorite marker |
//! | `<param>-<param>-<suffix>` | paginated / query-scoped content, parameters in fixed order |
//!
//! Movie and genre ids are numeric and suffixes are fixed words. A bare
//! subject id is itself a key, so [`SubjectId`] refuses any id that could
//! spell another form: one of the fixed keys, anything ending in `-<digits>`
//! or `-<suffix>`, and the first four groups of a UUID. Canonical UUIDs are
//! always accepted.

use crate::error::{Error, Result};
use crate::identity::SubjectId;

/// Version of the key grammar below.
pub const KEY_GRAMMAR_VERSION: u32 = 1;

/// Separator between key segments.
pub const SEPARATOR: &str = "-";

/// Composite key of the merged featured document.
pub const FEATURED_KEY: &str = "featured-movies";

/// Key of the provider's genre list.
pub const GENRE_LIST_KEY: &str = "movie-genres";

/// Scope segment for searches made without an identity.
pub const PUBLIC_SCOPE: &str = "public";

/// Every fixed trailing segment used by a key form.
pub const RESERVED_SUFFIXES: [&str; 7] = [
    "detail",
    "video",
    "recommendation",
    "recommended",
    "list",
    "search",
    "genre",
];

/// True when `raw`, used as a session key, could equal a key of another form.
pub fn is_reserved(raw: &str) -> bool {
    if is_uuid(raw) {
        return false;
    }
    if [FEATURED_KEY, GENRE_LIST_KEY, PUBLIC_SCOPE].contains(&raw) {
        return true;
    }
    if let Some((_, last)) = raw.rsplit_once(SEPARATOR) {
        if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) {
            return true;
        }
        if RESERVED_SUFFIXES.contains(&last) {
            return true;
        }
    }
    // `<uuid head>-<digits>` is a UUID, so the head would share its
    // favorite keys with a real subject's session key.
    has_hex_groups(raw, &[8, 4, 4, 4])
}

fn is_uuid(raw: &str) -> bool {
    has_hex_groups(raw, &[8, 4, 4, 4, 12])
}

fn has_hex_groups(raw: &str, lengths: &[usize]) -> bool {
    let groups: Vec<&str> = raw.split(SEPARATOR).collect();
    groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths)
            .all(|(g, len)| g.len() == *len && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Per-movie resources cached under `<movie_id>-<suffix>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Detail,
    Video,
    Recommendation,
}

impl Resource {
    pub fn suffix(&self) -> &'static str {
        match self {
            Resource::Detail => "detail",
            Resource::Video => "video",
            Resource::Recommendation => "recommendation",
        }
    }
}

/// The four provider lists merged into the featured document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeaturedList {
    NowPlaying,
    Popular,
    TopRated,
    Upcoming,
}

impl FeaturedList {
    /// Field name in the merged document; also the key's id segment.
    pub fn name(&self) -> &'static str {
        match self {
            FeaturedList::NowPlaying => "now_playing",
            FeaturedList::Popular => "popular",
            FeaturedList::TopRated => "top_rated",
            FeaturedList::Upcoming => "upcoming",
        }
    }
}

/// Builder for cache keys.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Join segments in the order given.
    pub fn build_composite(parts: &[&str]) -> String {
        parts.join(SEPARATOR)
    }

    /// Session marker: `<subject_id>`.
    pub fn session(subject: &SubjectId) -> String {
        subject.as_str().to_string()
    }

    /// Personalized discovery feed: `<subject_id>-recommended`.
    pub fn recommended_for(subject: &SubjectId) -> String {
        Self::build_composite(&[subject.as_str(), "recommended"])
    }

    /// Per-movie resource: `<movie_id>-<suffix>`.
    pub fn resource(movie_id: u64, resource: Resource) -> String {
        Self::build_composite(&[&movie_id.to_string(), resource.suffix()])
    }

    /// Favorite marker: `<subject_id>-<movie_id>`.
    pub fn favorite(subject: &SubjectId, movie_id: u64) -> String {
        Self::build_composite(&[subject.as_str(), &movie_id.to_string()])
    }

    /// Search page: `<subject_id|public>-<query>-<page>-search`.
    ///
    /// `query` must already be canonical, see [`canonical_query`].
    pub fn search(scope: Option<&SubjectId>, query: &str, page: u32) -> String {
        let scope = scope.map(SubjectId::as_str).unwrap_or(PUBLIC_SCOPE);
        Self::build_composite(&[scope, query, &page.to_string(), "search"])
    }

    /// Genre page: `<genre_id>-<page>-genre`.
    pub fn genre_page(genre_id: u64, page: u32) -> String {
        Self::build_composite(&[&genre_id.to_string(), &page.to_string(), "genre"])
    }

    /// Featured sub-list: `<list_name>-list`.
    pub fn featured_list(list: FeaturedList) -> String {
        Self::build_composite(&[list.name(), "list"])
    }

    /// Split a key into segments. Free-text segments may themselves contain
    /// the separator, so this is for diagnostics only.
    pub fn parse(key: &str) -> Vec<&str> {
        key.split(SEPARATOR).collect()
    }
}

/// Canonical form of a free-text search query: trimmed, inner whitespace
/// collapsed to one space, lowercased. The same form is sent upstream so the
/// cached document matches its key.
///
/// # Errors
/// `Error::ValidationError` if nothing is left after trimming.
pub fn canonical_query(raw: &str) -> Result<String> {
    let canonical = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if canonical.is_empty() {
        return Err(Error::ValidationError("search query is empty".to_string()));
    }
    Ok(canonical)
}

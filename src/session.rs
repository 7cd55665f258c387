//! Session markers: the store-side half of authentication.
//!
//! A signed token alone is not enough. The auth service writes a marker
//! under the bare subject id at login and deletes it at logout or account
//! deletion, so deleting the marker revokes every outstanding token at once.

use crate::backend::CacheBackend;
use crate::client::CacheClient;
use crate::error::{Error, Result};
use crate::identity::SubjectId;
use crate::key::CacheKeyBuilder;
use crate::ttl::Ttl;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// Age from which adult titles are included when a marker has no explicit
/// `adult` flag.
pub const ADULT_AGE: u32 = 18;

/// Profile stored as the session marker.
///
/// Only the fields used here are typed; everything else the auth service
/// writes is kept in `extra` so a marker survives being rewritten. The auth
/// service writes genre ids as strings and carries `age` instead of an
/// adult flag, so both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub id: String,
    #[serde(default, deserialize_with = "genre_ids")]
    pub genres: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adult: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionMarker {
    pub fn new(subject: &SubjectId) -> Self {
        SessionMarker {
            id: subject.as_str().to_string(),
            genres: Vec::new(),
            adult: None,
            age: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_genres(mut self, genres: Vec<u64>) -> Self {
        self.genres = genres;
        self
    }

    pub fn with_adult(mut self, adult: bool) -> Self {
        self.adult = Some(adult);
        self
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    /// Explicit flag if present, otherwise `age >= ADULT_AGE`. No age means no.
    pub fn includes_adult(&self) -> bool {
        self.adult
            .unwrap_or_else(|| self.age.is_some_and(|age| age >= ADULT_AGE))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenreId {
    Number(u64),
    Text(String),
}

/// Genre ids as numbers or numeric strings. `null` is an empty list and
/// non-numeric entries are dropped.
fn genre_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<GenreId>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|id| match id {
            GenreId::Number(n) => Some(n),
            GenreId::Text(text) => match text.trim().parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!("⚠ Ignoring non-numeric genre id '{}' in session marker", text);
                    None
                }
            },
        })
        .collect())
}

/// Opens, checks and revokes session markers.
#[derive(Clone)]
pub struct SessionRegistry<B: CacheBackend> {
    client: CacheClient<B>,
}

impl<B: CacheBackend> SessionRegistry<B> {
    pub fn new(client: CacheClient<B>) -> Self {
        SessionRegistry { client }
    }

    /// Write the marker without expiry. Token expiry bounds the session.
    pub async fn open(&self, marker: &SessionMarker) -> Result<()> {
        let subject = SubjectId::parse(&marker.id)?;
        self.client
            .set_json(&CacheKeyBuilder::session(&subject), marker, Ttl::Never)
            .await?;
        info!("Session opened for {}", subject);
        Ok(())
    }

    /// Delete the marker. Revoking an absent session is not an error.
    pub async fn revoke(&self, subject: &SubjectId) -> Result<()> {
        self.client
            .delete(&CacheKeyBuilder::session(subject))
            .await?;
        info!("Session revoked for {}", subject);
        Ok(())
    }

    pub async fn is_active(&self, subject: &SubjectId) -> Result<bool> {
        self.client
            .is_set(&CacheKeyBuilder::session(subject))
            .await
    }

    /// Read the stored profile.
    ///
    /// # Errors
    /// - `Error::CacheUnavailable` if the store cannot be reached
    /// - `Error::DeserializationError` if the marker is not a profile object
    pub async fn profile(&self, subject: &SubjectId) -> Result<Option<SessionMarker>> {
        self.client
            .get_json::<SessionMarker>(&CacheKeyBuilder::session(subject))
            .await
            .map_err(|e| match e {
                Error::DeserializationError(msg) => Error::DeserializationError(format!(
                    "session marker for {}: {}",
                    subject, msg
                )),
                other => other,
            })
    }
}

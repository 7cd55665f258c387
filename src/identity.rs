//! Token-backed identity: signature and expiry from the token, liveness
//! from the session marker in the shared store.

use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use crate::key;
use crate::session::SessionRegistry;
use crate::token::TokenCodec;
use std::fmt;

/// Opaque subject identifier carried in tokens and used in cache keys.
///
/// Subject ids are embedded in keys, so they must be non-empty, free of
/// whitespace and control characters, and must not spell another key form
/// (see [`key::is_reserved`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    /// # Errors
    /// `Error::ValidationError` for empty ids, ids containing whitespace and
    /// ids that collide with a cache key form.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::ValidationError("subject id is empty".to_string()));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::ValidationError(
                "subject id contains whitespace".to_string(),
            ));
        }
        if key::is_reserved(raw) {
            return Err(Error::ValidationError(format!(
                "subject id '{}' collides with a cache key",
                raw
            )));
        }
        Ok(SubjectId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull the token out of an `Authorization` header value.
///
/// Accepts `Bearer <token>` with any casing of the scheme; anything else,
/// including extra segments, yields `None`.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

/// Maps an `Authorization` header to a live subject.
#[derive(Clone)]
pub struct IdentityResolver<B: CacheBackend> {
    codec: TokenCodec,
    sessions: SessionRegistry<B>,
}

impl<B: CacheBackend> IdentityResolver<B> {
    pub fn new(codec: TokenCodec, sessions: SessionRegistry<B>) -> Self {
        IdentityResolver { codec, sessions }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn sessions(&self) -> &SessionRegistry<B> {
        &self.sessions
    }

    /// Resolve the caller or fail.
    ///
    /// # Errors
    /// - `Error::Unauthenticated` - header missing or not `Bearer <token>`
    /// - `Error::InvalidToken` - bad signature, expired, or no usable subject
    /// - `Error::SessionRevoked` - token valid but no session marker
    /// - `Error::CacheUnavailable` - marker could not be checked
    pub async fn resolve(&self, header: Option<&str>) -> Result<SubjectId> {
        let header = header
            .ok_or_else(|| Error::Unauthenticated("missing Authorization header".to_string()))?;
        let token = extract_bearer_token(header).ok_or_else(|| {
            Error::Unauthenticated("Authorization header is not a bearer token".to_string())
        })?;

        let claims = self.codec.verify(token)?;
        let subject = SubjectId::parse(&claims.data)
            .map_err(|_| Error::InvalidToken("token carries no usable subject".to_string()))?;

        if !self.sessions.is_active(&subject).await? {
            return Err(Error::SessionRevoked(subject.to_string()));
        }

        Ok(subject)
    }

    /// Same checks as [`IdentityResolver::resolve`], but an auth failure
    /// means "anonymous" instead of an error. Store outages still propagate.
    pub async fn resolve_optional(&self, header: Option<&str>) -> Result<Option<SubjectId>> {
        match self.resolve(header).await {
            Ok(subject) => Ok(Some(subject)),
            Err(e) if e.is_auth_failure() => {
                if header.is_some() {
                    debug!("Treating caller as anonymous ({})", e.kind());
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

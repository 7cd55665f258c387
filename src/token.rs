//! HS256 bearer tokens.
//!
//! The subject id travels in the `data` claim, which is where the auth
//! service that shares the signing secret puts it. Expiry is the standard
//! `exp` claim and is always required.

use crate::error::{Error, Result};
use crate::identity::SubjectId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lifetime of issued tokens: seven days.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id.
    pub data: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// Signs and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        TokenCodec {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Sign a token for `subject` expiring after the configured lifetime.
    ///
    /// # Errors
    /// `Error::Other` if signing fails.
    pub fn issue(&self, subject: &SubjectId) -> Result<String> {
        let exp = now_secs().saturating_add(self.lifetime.as_secs());
        self.issue_until(subject, exp)
    }

    /// Sign a token for `subject` with an explicit `exp`.
    pub fn issue_until(&self, subject: &SubjectId, exp: u64) -> Result<String> {
        let claims = Claims {
            data: subject.as_str().to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Other(format!("failed to sign token: {}", e)))
    }

    /// Check signature and expiry and return the claims.
    ///
    /// # Errors
    /// `Error::InvalidToken` on a bad signature, malformed token, wrong
    /// algorithm or expired `exp`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

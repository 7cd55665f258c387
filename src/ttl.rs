//! Expiry policy for cache writes.
//!
//! Callers name *intent* with [`Ttl`]; the process-wide [`TtlPolicy`] decides
//! what `Ttl::Default` means. A zero `Duration` is never read as "no expiry":
//! only the seconds-based entry points ([`Ttl::from_secs`],
//! [`TtlPolicy::from_legacy_secs`]) map `0` to "never", because that is how
//! the services sharing the store write it.
//!
//! ```
//! use marquee::ttl::{Ttl, TtlPolicy};
//! use std::time::Duration;
//!
//! let policy = TtlPolicy::Fixed(Duration::from_secs(1800));
//! assert_eq!(policy.resolve(Ttl::Default).unwrap(), Some(Duration::from_secs(1800)));
//! assert_eq!(policy.resolve(Ttl::Never).unwrap(), None);
//! ```

use crate::error::{Error, Result};
use std::time::Duration;

/// Default content expiry used when nothing else is configured.
pub const DEFAULT_CONTENT_TTL: Duration = Duration::from_secs(1800);

/// Per-write expiry request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the process-wide default from [`TtlPolicy`].
    #[default]
    Default,

    /// Write without expiry (durable preference flags, session markers).
    Never,

    /// Expire after the given duration. Must be non-zero.
    After(Duration),
}

impl Ttl {
    /// Seconds as written by the services sharing the store, where `0`
    /// means "no expiry". Prefer the variants directly in new code.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Ttl::Never
        } else {
            Ttl::After(Duration::from_secs(secs))
        }
    }
}

impl std::fmt::Display for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ttl::Default => write!(f, "default"),
            Ttl::Never => write!(f, "never"),
            Ttl::After(d) => write!(f, "{:?}", d),
        }
    }
}

/// Process-wide default expiry, configured once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtlPolicy {
    /// `Ttl::Default` writes expire after this duration.
    Fixed(Duration),

    /// `Ttl::Default` writes never expire.
    Infinite,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy::Fixed(DEFAULT_CONTENT_TTL)
    }
}

impl TtlPolicy {
    /// Read the legacy `seconds` setting, where `0` means "no expiry".
    pub fn from_legacy_secs(secs: u64) -> Self {
        if secs == 0 {
            TtlPolicy::Infinite
        } else {
            TtlPolicy::Fixed(Duration::from_secs(secs))
        }
    }

    /// Resolve a write request to the `EX` argument (`None` = no expiry).
    ///
    /// # Errors
    /// `Error::ValidationError` for `Ttl::After(Duration::ZERO)`.
    pub fn resolve(&self, ttl: Ttl) -> Result<Option<Duration>> {
        match ttl {
            Ttl::Never => Ok(None),
            Ttl::After(d) if d.is_zero() => Err(Error::ValidationError(
                "zero-length TTL; use Ttl::Never for entries without expiry".to_string(),
            )),
            Ttl::After(d) => Ok(Some(d)),
            Ttl::Default => match self {
                TtlPolicy::Fixed(d) => Ok(Some(*d)),
                TtlPolicy::Infinite => Ok(None),
            },
        }
    }
}

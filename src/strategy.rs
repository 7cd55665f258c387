//! What a cache-aside lookup does when the store itself is down.
//!
//! A miss and an outage are different things. A miss always falls through
//! to populate. An outage is governed by [`FailurePolicy`]:
//!
//! | Policy | Store down on read | Store down on write-back |
//! |--------|--------------------|--------------------------|
//! | **FailClosed** | request fails | value served, failure logged |
//! | **DegradeToUpstream** | populate runs, value served uncached | value served, failure logged |
//!
//! The featured composite always runs `FailClosed`; see
//! [`crate::content::ContentService::featured`].

use crate::error::Error;
use std::str::FromStr;

/// Outage behavior for cache-aside lookups.
///
/// ```
/// use marquee::strategy::FailurePolicy;
///
/// assert_eq!("degrade".parse::<FailurePolicy>().unwrap(), FailurePolicy::DegradeToUpstream);
/// assert_eq!(FailurePolicy::default(), FailurePolicy::FailClosed);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// **FailClosed**: an unreachable store fails the request.
    ///
    /// Flow on `CacheUnavailable` from GET:
    /// 1. Record the error
    /// 2. Return `Error::CacheUnavailable` (surfaced as 500)
    #[default]
    FailClosed,

    /// **DegradeToUpstream**: an unreachable store is treated like a miss,
    /// minus the write-back.
    ///
    /// Flow on `CacheUnavailable` from GET:
    /// 1. Record the error
    /// 2. Run populate
    /// 3. Return the value without writing it back
    DegradeToUpstream,
}

impl FailurePolicy {
    pub fn degrades(&self) -> bool {
        matches!(self, FailurePolicy::DegradeToUpstream)
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailClosed => write!(f, "fail"),
            FailurePolicy::DegradeToUpstream => write!(f, "degrade"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "fail_closed" => Ok(FailurePolicy::FailClosed),
            "degrade" | "degrade_to_upstream" => Ok(FailurePolicy::DegradeToUpstream),
            other => Err(Error::ConfigError(format!(
                "unknown cache failure mode '{}', expected 'fail' or 'degrade'",
                other
            ))),
        }
    }
}

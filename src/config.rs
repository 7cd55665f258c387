//! Process settings read from the environment.
//!
//! `.env` files are honored by the binary through `dotenv`; parsing itself
//! goes through a lookup function so it can be tested without touching the
//! process environment.

use crate::error::{Error, Result};
use crate::strategy::FailurePolicy;
use crate::ttl::TtlPolicy;
use crate::upstream::DEFAULT_UPSTREAM_TIMEOUT;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "redis")]
use crate::backend::RedisConfig;

#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: u32,
    pub pool_size: u32,
    pub command_timeout: Duration,
    pub ttl_policy: TtlPolicy,
    pub failure_policy: FailurePolicy,
    pub coalesce: bool,
}

impl CacheSettings {
    #[cfg(feature = "redis")]
    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database,
            pool_size: self.pool_size,
            command_timeout: self.command_timeout,
            url: self.url.clone(),
            ..RedisConfig::default()
        }
    }
}

#[derive(Clone)]
pub struct AuthSettings {
    pub secret_key: String,
    pub token_lifetime: Duration,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("secret_key", &"<redacted>")
            .field("token_lifetime", &self.token_lifetime)
            .finish()
    }
}

#[derive(Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub access_token: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub upstream: UpstreamSettings,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`; empty values count as unset.
    ///
    /// # Errors
    /// `Error::ConfigError` for a missing required variable or a value that
    /// does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            var(name).ok_or_else(|| Error::ConfigError(format!("{} must be set", name)))
        };
        let or_default = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let cache = CacheSettings {
            url: var("REDIS_URL"),
            host: or_default("REDIS_HOST", "localhost"),
            port: parse_num("REDIS_PORT", &or_default("REDIS_PORT", "6379"))?,
            database: parse_num("REDIS_DB", &or_default("REDIS_DB", "0"))?,
            pool_size: parse_num("REDIS_POOL_SIZE", &or_default("REDIS_POOL_SIZE", "16"))?,
            command_timeout: Duration::from_millis(parse_num(
                "CACHE_TIMEOUT_MS",
                &or_default("CACHE_TIMEOUT_MS", "2000"),
            )?),
            ttl_policy: TtlPolicy::from_legacy_secs(parse_num(
                "CACHE_DEFAULT_TTL_SECS",
                &or_default("CACHE_DEFAULT_TTL_SECS", "1800"),
            )?),
            failure_policy: or_default("CACHE_FAILURE_MODE", "fail").parse()?,
            coalesce: parse_bool("CACHE_COALESCE", &or_default("CACHE_COALESCE", "false"))?,
        };

        let auth = AuthSettings {
            secret_key: required("SECRET_KEY")?,
            token_lifetime: Duration::from_secs(
                60 * parse_num::<u64>(
                    "AUTH_TOKEN_EXP_MINUTES",
                    &or_default("AUTH_TOKEN_EXP_MINUTES", "10080"),
                )?,
            ),
        };

        let upstream = UpstreamSettings {
            base_url: required("MOVIE_DB_BASE_URL")?,
            access_token: required("MOVIE_DB_ACCESS_TOKEN")?,
            timeout: match var("UPSTREAM_TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(parse_num("UPSTREAM_TIMEOUT_SECS", &raw)?),
                None => DEFAULT_UPSTREAM_TIMEOUT,
            },
        };

        Ok(Settings {
            cache,
            auth,
            upstream,
            host: or_default("SERVER_HOST", "127.0.0.1"),
            port: parse_num("SERVER_PORT", &or_default("SERVER_PORT", "8080"))?,
            database_url: var("DATABASE_URL"),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_num<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::ConfigError(format!("{} is not a valid number: '{}'", name, raw)))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::ConfigError(format!(
            "{} is not a valid boolean: '{}'",
            name, raw
        ))),
    }
}

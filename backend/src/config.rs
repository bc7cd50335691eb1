use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_RATE_LIMIT_MS: u64 = 200;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 20;
pub const DEFAULT_STRIPE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_IDENTITY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} has an invalid value")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Upper bound on a single Stripe API call.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Base URL of the identity service; `/verify` is appended.
    pub base_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub per_millisecond: u64,
    pub burst: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub bind_addr: SocketAddr,
    pub stripe: StripeSettings,
    pub identity: IdentitySettings,
    pub rate_limit: RateLimitSettings,
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid("BIND_ADDR"))?;

        let per_millisecond = match lookup("RATE_LIMITER_MILLISECONDS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::Invalid("RATE_LIMITER_MILLISECONDS"))?,
            None => DEFAULT_RATE_LIMIT_MS,
        };
        let millis = |key: &'static str, default: u64| match lookup(key) {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|v| *v > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::Invalid(key)),
            None => Ok(Duration::from_millis(default)),
        };

        let burst = match lookup("RATE_LIMITER_BURST") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::Invalid("RATE_LIMITER_BURST"))?,
            None => DEFAULT_RATE_LIMIT_BURST,
        };

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            frontend_origin: required("FRONTEND_ORIGIN")?,
            bind_addr,
            stripe: StripeSettings {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                request_timeout: millis("STRIPE_TIMEOUT_MS", DEFAULT_STRIPE_TIMEOUT_MS)?,
            },
            identity: IdentitySettings {
                base_url: required("IDENTITY_SERVICE_URL")?,
                request_timeout: millis("IDENTITY_TIMEOUT_MS", DEFAULT_IDENTITY_TIMEOUT_MS)?,
            },
            rate_limit: RateLimitSettings {
                per_millisecond,
                burst,
            },
            sentry_dsn: lookup("SENTRY_DSN").filter(|v| !v.trim().is_empty()),
        })
    }
}

//! Client configuration.
//!
//! A `Config` is an immutable value validated when it is built. Every
//! `with_*` setter consumes the value and returns a new validated one, so a
//! `Config` that exists is always usable. Components receive it behind an
//! `Arc` and never mutate it.

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v6";
pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 1;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Value of the `User-Agent` header on every REST request.
pub const USER_AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing token: set {var} or pass a non-empty token")]
    MissingToken { var: &'static str },
    #[error("base URL must start with http:// or https://: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid shard [{current}, {total}]: need total >= 1 and current < total")]
    InvalidShard { current: u32, total: u32 },
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    token: String,
    base_url: String,
    current_shard: u32,
    shard_count: u32,
    rate_limit_retries: u32,
    reconnect_delay: Duration,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("current_shard", &self.current_shard)
            .field("shard_count", &self.shard_count)
            .field("rate_limit_retries", &self.rate_limit_retries)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Config {
    /// Build a config with defaults for everything but the token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if `token` is blank.
    pub fn new(token: impl Into<String>) -> Result<Self, ConfigError> {
        let token = token.into().trim().to_owned();
        if token.is_empty() {
            return Err(ConfigError::MissingToken { var: "WIREBOT_TOKEN" });
        }
        Ok(Self {
            token,
            base_url: DEFAULT_BASE_URL.to_owned(),
            current_shard: 0,
            shard_count: 1,
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        })
    }

    /// Build config from environment variables.
    ///
    /// Required:
    /// - `WIREBOT_TOKEN`
    ///
    /// Optional:
    /// - `WIREBOT_BASE_URL`: default `https://discord.com/api/v6`
    /// - `WIREBOT_SHARD`, `WIREBOT_SHARD_COUNT`: default 0 and 1
    /// - `WIREBOT_RATE_LIMIT_RETRIES`: default 1
    /// - `WIREBOT_RECONNECT_DELAY_MS`: default 1000
    /// - `WIREBOT_REQUEST_TIMEOUT_SECS`: default 30
    /// - `WIREBOT_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error when the token is missing or a value fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// As [`Config::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let token = lookup("WIREBOT_TOKEN").unwrap_or_default();
        let mut config = Self::new(token)?;

        if let Some(base_url) = lookup("WIREBOT_BASE_URL").filter(|s| !s.trim().is_empty()) {
            config = config.with_base_url(base_url)?;
        }
        let current = parse_or(&lookup, "WIREBOT_SHARD", 0);
        let total = parse_or(&lookup, "WIREBOT_SHARD_COUNT", 1);
        config = config.with_shard(current, total)?;

        let retries = parse_or(&lookup, "WIREBOT_RATE_LIMIT_RETRIES", DEFAULT_RATE_LIMIT_RETRIES);
        let reconnect_ms = parse_or(&lookup, "WIREBOT_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS);
        let request_secs =
            parse_or(&lookup, "WIREBOT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS);
        let connect_secs =
            parse_or(&lookup, "WIREBOT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);

        Ok(config
            .with_rate_limit_retries(retries)
            .with_reconnect_delay(Duration::from_millis(reconnect_ms))
            .with_timeouts(Duration::from_secs(request_secs), Duration::from_secs(connect_secs)))
    }

    /// Replace the REST base URL. A trailing `/` is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for non-HTTP URLs.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(base_url));
        }
        self.base_url = trimmed.to_owned();
        Ok(self)
    }

    /// Set the shard pair sent in IDENTIFY.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidShard`] unless `total >= 1 && current < total`.
    pub fn with_shard(mut self, current: u32, total: u32) -> Result<Self, ConfigError> {
        if total == 0 || current >= total {
            return Err(ConfigError::InvalidShard { current, total });
        }
        self.current_shard = current;
        self.shard_count = total;
        Ok(self)
    }

    /// How many times a request is retried after a 429.
    #[must_use]
    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.rate_limit_retries = retries;
        self
    }

    /// Pause between failed gateway reconnect attempts.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, request: Duration, connect: Duration) -> Self {
        self.request_timeout = request;
        self.connect_timeout = connect;
        self
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn current_shard(&self) -> u32 {
        self.current_shard
    }

    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    #[must_use]
    pub fn rate_limit_retries(&self) -> u32 {
        self.rate_limit_retries
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

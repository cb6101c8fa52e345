//! Streaming Configuration Settings
//!
//! Configuration types for streaming sessions, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::streaming::StreamFlavor;
use crate::infrastructure::alpaca::auth::{AUTH_TIMEOUT_SAFE, AuthError, Credentials};
use crate::infrastructure::alpaca::heartbeat::HeartbeatConfig;
use crate::infrastructure::alpaca::reconnect::ReconnectConfig;

/// Market data feed type for the stock stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// IEX (Investors Exchange) - Free tier with limited data.
    #[default]
    Iex,
    /// SIP (Securities Information Processor) - Full market data.
    Sip,
}

impl DataFeed {
    /// Parse feed type from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sip" => Self::Sip,
            _ => Self::Iex,
        }
    }

    /// Get the feed name for WebSocket URLs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
        }
    }
}

/// Trading environment (paper vs live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Paper trading environment (simulated).
    #[default]
    Paper,
    /// Live trading environment (real money).
    Live,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LIVE" => Self::Live,
            _ => Self::Paper,
        }
    }

    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Live => "live",
        }
    }

    /// Trading API host for this environment.
    #[must_use]
    pub const fn trading_host(&self) -> &'static str {
        match self {
            Self::Paper => "paper-api.alpaca.markets",
            Self::Live => "api.alpaca.markets",
        }
    }
}

/// WebSocket endpoints for the three stream flavors.
///
/// Market data endpoints are the same for paper and live trading; only the
/// account stream follows the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoints {
    /// Account activity stream.
    pub account: String,
    /// Stock market data stream.
    pub stock: String,
    /// Crypto market data stream.
    pub crypto: String,
}

impl StreamEndpoints {
    /// Alpaca's production endpoints.
    #[must_use]
    pub fn alpaca(environment: Environment, feed: DataFeed) -> Self {
        Self {
            account: format!("wss://{}/stream", environment.trading_host()),
            stock: format!("wss://stream.data.alpaca.markets/v2/{}", feed.as_str()),
            crypto: "wss://stream.data.alpaca.markets/v1beta3/crypto/us".to_string(),
        }
    }

    /// Endpoint for `flavor`.
    #[must_use]
    pub fn for_flavor(&self, flavor: StreamFlavor) -> &str {
        match flavor {
            StreamFlavor::AccountActivity => &self.account,
            StreamFlavor::StockMarketData => &self.stock,
            StreamFlavor::CryptoMarketData => &self.crypto,
        }
    }
}

impl Default for StreamEndpoints {
    fn default() -> Self {
        Self::alpaca(Environment::default(), DataFeed::default())
    }
}

/// Per-session connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Time allowed for the authentication handshake.
    pub auth_timeout: Duration,
    /// Heartbeat ping interval (zero disables pings).
    pub heartbeat_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Upward jitter fraction applied to reconnection delays.
    pub reconnect_jitter: f64,
    /// Streaming time after which the backoff resets.
    pub stability_period: Duration,
    /// Events buffered between the read loop and listeners.
    pub dispatch_capacity: usize,
    /// How long the read loop waits for buffer space before dropping.
    pub dispatch_grace: Duration,
    /// Open the connection on the first subscribe.
    pub auto_connect: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auth_timeout: AUTH_TIMEOUT_SAFE,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            stability_period: Duration::from_secs(30),
            dispatch_capacity: 4_096,
            dispatch_grace: Duration::from_secs(1),
            auto_connect: false,
        }
    }
}

impl SessionSettings {
    /// Heartbeat configuration for one connection.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig::new(self.heartbeat_interval, self.heartbeat_timeout)
    }

    /// Backoff configuration for one session.
    #[must_use]
    pub const fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            jitter_factor: self.reconnect_jitter,
            stability_period: self.stability_period,
        }
    }
}

/// Complete streaming configuration.
#[derive(Debug, Clone)]
pub struct StreamsConfig {
    /// Trading environment.
    pub environment: Environment,
    /// Stock market data feed.
    pub feed: DataFeed,
    /// API credentials.
    pub credentials: Credentials,
    /// Session settings shared by every flavor.
    pub session: SessionSettings,
}

impl StreamsConfig {
    /// Create configuration from environment variables.
    ///
    /// Credentials come from `ALPACA_KEY` and `ALPACA_SECRET`, or from
    /// `ALPACA_OAUTH_TOKEN`; setting both is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing, empty or ambiguous.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`StreamsConfig::from_env`].
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = credentials_from(&var)?;

        let environment = var("ALPACA_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let feed = var("ALPACA_FEED")
            .map(|s| DataFeed::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let defaults = SessionSettings::default();
        let session = SessionSettings {
            auth_timeout: parse_duration_secs(
                &var,
                "ALPACA_STREAM_AUTH_TIMEOUT_SECS",
                defaults.auth_timeout,
            ),
            heartbeat_interval: parse_duration_secs(
                &var,
                "ALPACA_STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_duration_secs(
                &var,
                "ALPACA_STREAM_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &var,
                "ALPACA_STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &var,
                "ALPACA_STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &var,
                "ALPACA_STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_or(
                &var,
                "ALPACA_STREAM_RECONNECT_JITTER",
                defaults.reconnect_jitter,
            ),
            stability_period: parse_duration_secs(
                &var,
                "ALPACA_STREAM_STABILITY_PERIOD_SECS",
                defaults.stability_period,
            ),
            dispatch_capacity: parse_or(
                &var,
                "ALPACA_STREAM_DISPATCH_CAPACITY",
                defaults.dispatch_capacity,
            ),
            dispatch_grace: parse_duration_millis(
                &var,
                "ALPACA_STREAM_DISPATCH_GRACE_MS",
                defaults.dispatch_grace,
            ),
            auto_connect: var("ALPACA_STREAM_AUTO_CONNECT")
                .map_or(defaults.auto_connect, |v| {
                    v.eq_ignore_ascii_case("true") || v == "1"
                }),
        };

        Ok(Self {
            environment,
            feed,
            credentials,
            session,
        })
    }

    /// Production endpoints for this configuration.
    #[must_use]
    pub fn endpoints(&self) -> StreamEndpoints {
        StreamEndpoints::alpaca(self.environment, self.feed)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Both a key pair and an OAuth token were configured.
    #[error("set either ALPACA_KEY/ALPACA_SECRET or ALPACA_OAUTH_TOKEN, not both")]
    ConflictingCredentials,
    /// Credentials failed validation.
    #[error(transparent)]
    Credentials(#[from] AuthError),
}

fn credentials_from<F>(var: &F) -> Result<Credentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |key: &str| -> Result<String, ConfigError> {
        let value = var(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    };

    let token = var("ALPACA_OAUTH_TOKEN").filter(|t| !t.trim().is_empty());
    let has_key = var("ALPACA_KEY").is_some();

    match token {
        Some(_) if has_key => Err(ConfigError::ConflictingCredentials),
        Some(token) => Ok(Credentials::oauth(token)?),
        None => {
            let key = required("ALPACA_KEY")?;
            let secret = required("ALPACA_SECRET")?;
            Ok(Credentials::key_pair(key, secret)?)
        }
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_duration_secs<F>(var: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(var: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

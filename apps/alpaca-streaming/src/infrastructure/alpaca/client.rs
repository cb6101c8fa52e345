//! Stream Client
//!
//! Entry point that turns one set of credentials into streaming sessions.
//! Credentials are validated once and shared by every session created
//! here; nothing about them is mutated after construction, so sessions can
//! run on any thread while the rest of the application uses the same
//! credentials for REST calls.

use std::sync::Arc;

use super::auth::Credentials;
use super::protocol;
use super::session::{SessionError, StreamSession};
use super::transport::TungsteniteConnector;
use crate::application::ports::StreamConnector;
use crate::domain::streaming::StreamFlavor;
use crate::infrastructure::config::{
    DataFeed, Environment, SessionSettings, StreamEndpoints, StreamsConfig,
};

/// Factory for Alpaca streaming sessions.
#[derive(Clone)]
pub struct AlpacaStreams {
    credentials: Arc<Credentials>,
    environment: Environment,
    feed: DataFeed,
    endpoints: Option<StreamEndpoints>,
    settings: SessionSettings,
    connector: Arc<dyn StreamConnector>,
}

impl std::fmt::Debug for AlpacaStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaStreams")
            .field("credentials", &self.credentials)
            .field("environment", &self.environment)
            .field("feed", &self.feed)
            .field("endpoints", &self.endpoints())
            .finish_non_exhaustive()
    }
}

impl AlpacaStreams {
    /// Paper environment, IEX feed, default settings.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
            environment: Environment::default(),
            feed: DataFeed::default(),
            endpoints: None,
            settings: SessionSettings::default(),
            connector: Arc::new(TungsteniteConnector::new()),
        }
    }

    /// Build from a loaded configuration.
    #[must_use]
    pub fn from_config(config: StreamsConfig) -> Self {
        Self::new(config.credentials)
            .with_environment(config.environment)
            .with_feed(config.feed)
            .with_settings(config.session)
    }

    /// Select paper or live trading.
    #[must_use]
    pub const fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Select the stock market data feed.
    #[must_use]
    pub const fn with_feed(mut self, feed: DataFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Override session settings.
    #[must_use]
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the WebSocket endpoints (for proxies or test servers).
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: StreamEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Replace the transport.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Shared credentials.
    #[must_use]
    pub fn credentials(&self) -> Arc<Credentials> {
        Arc::clone(&self.credentials)
    }

    /// Endpoints sessions will connect to.
    #[must_use]
    pub fn endpoints(&self) -> StreamEndpoints {
        self.endpoints
            .clone()
            .unwrap_or_else(|| StreamEndpoints::alpaca(self.environment, self.feed))
    }

    /// Account activity session (order/trade updates).
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot open the account stream.
    pub fn account(&self) -> Result<StreamSession, SessionError> {
        self.session(StreamFlavor::AccountActivity)
    }

    /// Stock market data session.
    ///
    /// # Errors
    ///
    /// Returns an error for OAuth credentials.
    pub fn stock(&self) -> Result<StreamSession, SessionError> {
        self.session(StreamFlavor::StockMarketData)
    }

    /// Crypto market data session.
    ///
    /// # Errors
    ///
    /// Returns an error for OAuth credentials.
    pub fn crypto(&self) -> Result<StreamSession, SessionError> {
        self.session(StreamFlavor::CryptoMarketData)
    }

    /// Session for any flavor.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot open `flavor`.
    pub fn session(&self, flavor: StreamFlavor) -> Result<StreamSession, SessionError> {
        self.credentials.ensure_supports(flavor)?;
        let endpoint = self.endpoints().for_flavor(flavor).to_string();
        let protocol = protocol::for_flavor(flavor, endpoint, Arc::clone(&self.credentials));
        Ok(StreamSession::new(
            protocol,
            Arc::clone(&self.connector),
            self.settings.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::ConnectionState;

    #[test]
    fn sessions_start_disconnected() {
        let streams = AlpacaStreams::new(Credentials::key_pair("key", "secret").unwrap());
        for session in [
            streams.account().unwrap(),
            streams.stock().unwrap(),
            streams.crypto().unwrap(),
        ] {
            assert_eq!(session.state(), ConnectionState::Disconnected);
            assert!(session.subscriptions().is_empty());
        }
    }

    #[test]
    fn oauth_only_opens_account() {
        let streams = AlpacaStreams::new(Credentials::oauth("tok").unwrap());
        assert!(streams.account().is_ok());
        assert!(matches!(streams.stock(), Err(SessionError::Auth(_))));
        assert!(matches!(streams.crypto(), Err(SessionError::Auth(_))));
    }

    #[test]
    fn endpoints_follow_configuration() {
        let streams = AlpacaStreams::new(Credentials::key_pair("key", "secret").unwrap())
            .with_environment(Environment::Live)
            .with_feed(DataFeed::Sip);
        let endpoints = streams.endpoints();
        assert_eq!(endpoints.account, "wss://api.alpaca.markets/stream");
        assert_eq!(endpoints.stock, "wss://stream.data.alpaca.markets/v2/sip");
    }

    #[test]
    fn credentials_are_shared() {
        let streams = AlpacaStreams::new(Credentials::key_pair("key", "secret").unwrap());
        let first = streams.credentials();
        let second = streams.clone().credentials();
        assert!(Arc::ptr_eq(&first, &second));
    }
}

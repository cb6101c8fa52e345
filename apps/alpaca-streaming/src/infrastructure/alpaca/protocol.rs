//! Stream Protocols
//!
//! What each stream flavor sends on the wire: the authentication frame, the
//! frame that replays the desired subscriptions after a handshake, and the
//! frames for incremental changes.
//!
//! - Market data streams (stock, crypto) use `subscribe`/`unsubscribe` with
//!   per-channel symbol lists. A fresh connection starts with no
//!   subscriptions, so replay is one `subscribe` of the whole snapshot,
//!   sent even when the snapshot is empty.
//! - The account stream uses `listen` with the full list of streams. Each
//!   frame replaces the previous selection, and the server confirms it with
//!   a `listening` message.

use std::fmt;
use std::sync::Arc;

use super::auth::{AuthFrameError, Credentials};
use super::codec::{CodecError, encode};
use super::messages::{ListenRequest, SubscriptionRequest};
use crate::domain::streaming::{Channel, StreamFlavor};
use crate::domain::subscription::{SubscriptionAction, SubscriptionChange, SubscriptionSnapshot};

/// Wire vocabulary of one stream flavor.
pub trait StreamProtocol: Send + Sync + fmt::Debug {
    /// Flavor this protocol speaks.
    fn flavor(&self) -> StreamFlavor;

    /// WebSocket URL.
    fn endpoint(&self) -> &str;

    /// Authentication frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot open this stream.
    fn auth_request(&self) -> Result<String, AuthFrameError>;

    /// Frame that applies `snapshot` on a freshly authenticated connection.
    /// Always produced, so an empty registry still sets a clean baseline.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame fails to serialize.
    fn reconcile_request(&self, snapshot: &SubscriptionSnapshot) -> Result<String, CodecError>;

    /// Frame that applies `change` on a streaming connection, given the
    /// registry state after the change.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame fails to serialize.
    fn change_request(
        &self,
        change: &SubscriptionChange,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<Option<String>, CodecError>;

    /// Whether the server acknowledges the reconciliation frame before data
    /// flows.
    fn awaits_reconcile_ack(&self) -> bool;
}

/// Build the protocol for `flavor`.
#[must_use]
pub fn for_flavor(
    flavor: StreamFlavor,
    endpoint: String,
    credentials: Arc<Credentials>,
) -> Arc<dyn StreamProtocol> {
    match flavor {
        StreamFlavor::AccountActivity => Arc::new(AccountProtocol {
            endpoint,
            credentials,
        }),
        StreamFlavor::StockMarketData | StreamFlavor::CryptoMarketData => {
            Arc::new(MarketDataProtocol {
                flavor,
                endpoint,
                credentials,
            })
        }
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// Stock and crypto market data.
#[derive(Debug)]
pub struct MarketDataProtocol {
    flavor: StreamFlavor,
    endpoint: String,
    credentials: Arc<Credentials>,
}

impl StreamProtocol for MarketDataProtocol {
    fn flavor(&self) -> StreamFlavor {
        self.flavor
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn auth_request(&self) -> Result<String, AuthFrameError> {
        self.credentials.auth_frame(self.flavor)
    }

    fn reconcile_request(&self, snapshot: &SubscriptionSnapshot) -> Result<String, CodecError> {
        let request = snapshot
            .iter()
            .filter(|(channel, _)| self.flavor.supports(*channel))
            .fold(SubscriptionRequest::subscribe(), |request, (channel, symbols)| {
                request.with_channel(channel, symbols.iter().cloned().collect())
            });
        encode(&request)
    }

    fn change_request(
        &self,
        change: &SubscriptionChange,
        _snapshot: &SubscriptionSnapshot,
    ) -> Result<Option<String>, CodecError> {
        if !self.flavor.supports(change.channel) {
            return Ok(None);
        }

        let request = match change.action {
            SubscriptionAction::Subscribe => SubscriptionRequest::subscribe(),
            SubscriptionAction::Unsubscribe => SubscriptionRequest::unsubscribe(),
        }
        .with_channel(change.channel, change.symbols.clone());

        if request.is_empty() {
            return Ok(None);
        }
        encode(&request).map(Some)
    }

    fn awaits_reconcile_ack(&self) -> bool {
        false
    }
}

// =============================================================================
// Account Activity
// =============================================================================

/// Account activity (`trade_updates`).
#[derive(Debug)]
pub struct AccountProtocol {
    endpoint: String,
    credentials: Arc<Credentials>,
}

impl AccountProtocol {
    fn listen_request(snapshot: &SubscriptionSnapshot) -> ListenRequest {
        let streams = snapshot
            .channels()
            .filter(|channel| *channel == Channel::TradeUpdates)
            .map(|channel| channel.wire_name().to_string())
            .collect();
        ListenRequest::new(streams)
    }
}

impl StreamProtocol for AccountProtocol {
    fn flavor(&self) -> StreamFlavor {
        StreamFlavor::AccountActivity
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn auth_request(&self) -> Result<String, AuthFrameError> {
        self.credentials.auth_frame(StreamFlavor::AccountActivity)
    }

    fn reconcile_request(&self, snapshot: &SubscriptionSnapshot) -> Result<String, CodecError> {
        encode(&Self::listen_request(snapshot))
    }

    fn change_request(
        &self,
        change: &SubscriptionChange,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<Option<String>, CodecError> {
        if change.channel != Channel::TradeUpdates {
            return Ok(None);
        }
        encode(&Self::listen_request(snapshot)).map(Some)
    }

    fn awaits_reconcile_ack(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriptionRegistry;

    fn key_pair() -> Arc<Credentials> {
        Arc::new(Credentials::key_pair("key", "secret").unwrap())
    }

    fn stock() -> Arc<dyn StreamProtocol> {
        for_flavor(StreamFlavor::StockMarketData, "wss://example".to_string(), key_pair())
    }

    fn account() -> Arc<dyn StreamProtocol> {
        for_flavor(StreamFlavor::AccountActivity, "wss://example".to_string(), key_pair())
    }

    #[test]
    fn empty_registry_reconciles_to_empty_baseline() {
        let snapshot = SubscriptionRegistry::new().snapshot();
        assert_eq!(
            stock().reconcile_request(&snapshot).unwrap(),
            r#"{"action":"subscribe"}"#
        );
        assert_eq!(
            account().reconcile_request(&snapshot).unwrap(),
            r#"{"action":"listen","data":{"streams":[]}}"#
        );
    }

    #[test]
    fn market_reconcile_subscribes_every_channel() {
        let registry = SubscriptionRegistry::new();
        registry.desire(Channel::Trades, ["MSFT", "AAPL"]);
        registry.desire(Channel::Bars, ["*"]);

        let frame = stock().reconcile_request(&registry.snapshot()).unwrap();
        assert_eq!(
            frame,
            r#"{"action":"subscribe","trades":["AAPL","MSFT"],"bars":["*"]}"#
        );
    }

    #[test]
    fn market_change_carries_only_changed_symbols() {
        let registry = SubscriptionRegistry::new();
        registry.desire(Channel::Quotes, ["AAPL"]);
        let change = registry
            .apply(SubscriptionAction::Unsubscribe, Channel::Quotes, ["AAPL"])
            .unwrap();

        let frame = stock()
            .change_request(&change, &registry.snapshot())
            .unwrap()
            .unwrap();
        assert_eq!(frame, r#"{"action":"unsubscribe","quotes":["AAPL"]}"#);
    }

    #[test]
    fn account_listens_with_full_stream_list() {
        let registry = SubscriptionRegistry::new();
        let change = registry
            .apply(SubscriptionAction::Subscribe, Channel::TradeUpdates, Vec::<String>::new())
            .unwrap();
        let protocol = account();

        let frame = protocol
            .change_request(&change, &registry.snapshot())
            .unwrap()
            .unwrap();
        assert_eq!(frame, r#"{"action":"listen","data":{"streams":["trade_updates"]}}"#);
        assert!(protocol.awaits_reconcile_ack());

        let change = registry
            .apply(SubscriptionAction::Unsubscribe, Channel::TradeUpdates, Vec::<String>::new())
            .unwrap();
        let frame = protocol
            .change_request(&change, &registry.snapshot())
            .unwrap()
            .unwrap();
        assert_eq!(frame, r#"{"action":"listen","data":{"streams":[]}}"#);
    }

    #[test]
    fn oauth_account_auth_frame() {
        let protocol = for_flavor(
            StreamFlavor::AccountActivity,
            "wss://example".to_string(),
            Arc::new(Credentials::oauth("tok").unwrap()),
        );
        assert!(protocol.auth_request().unwrap().contains("oauth_token"));
    }
}

//! Alpaca WebSocket Message Types
//!
//! Wire types for control traffic. Data payloads (trades, quotes, bars,
//! order books, trade updates) deserialize directly into the domain types in
//! [`crate::domain::streaming`].
//!
//! # Message Types
//!
//! ## Inbound, market data streams (`T` discriminator)
//! - `success`: connection greeting or authentication success
//! - `error`: error response with code and message
//! - `subscription`: echo of the active subscriptions
//!
//! ## Inbound, account stream (`stream` discriminator)
//! - `authorization`: authentication verdict
//! - `listening`: acknowledgement of a listen request
//! - `trade_updates`: order lifecycle events
//!
//! ## Outbound
//! - `auth` / `authenticate`: credentials
//! - `subscribe` / `unsubscribe`: market data channel changes
//! - `listen`: account stream selection
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)
//! - [Crypto Streaming](https://docs.alpaca.markets/docs/real-time-crypto-pricing-data)
//! - [Trade Updates](https://docs.alpaca.markets/docs/websocket-streaming)

use serde::{Deserialize, Serialize};

use crate::domain::streaming::{Channel, SubscriptionAck, TradeUpdate};

// =============================================================================
// Inbound Control Messages (market data)
// =============================================================================

/// Success message indicating connection or authentication succeeded.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Message type (always "success")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Success message
    pub msg: SuccessKind,
}

/// Kind of success message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Initial connection established
    Connected,
    /// Authentication successful
    Authenticated,
    /// Anything newer than this client
    #[serde(other)]
    Other,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 401, "msg": "not authenticated"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 409: Insufficient subscription (feed not entitled)
/// - 410: Invalid subscribe action for this feed
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Message type (always "error")
    #[serde(rename = "T", default = "error_tag")]
    pub msg_type: String,

    /// Error code
    pub code: i32,

    /// Error message
    #[serde(default)]
    pub msg: String,
}

fn error_tag() -> String {
    "error".to_string()
}

impl ErrorMessage {
    /// Check if this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self.code, 401..=404)
    }

    /// Check if this is a rate limit error.
    #[must_use]
    pub const fn is_rate_limit_error(&self) -> bool {
        matches!(self.code, 405..=407)
    }

    /// Check if this is a subscription error.
    #[must_use]
    pub const fn is_subscription_error(&self) -> bool {
        matches!(self.code, 408..=410)
    }
}

/// Subscription confirmation message.
///
/// Sent after a subscribe/unsubscribe action with the full set of active
/// subscriptions.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "subscription", "trades": ["AAPL"], "quotes": ["AMD", "CLDR"], "bars": ["*"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMessage {
    /// Subscribed trade symbols
    #[serde(default)]
    pub trades: Vec<String>,

    /// Subscribed quote symbols
    #[serde(default)]
    pub quotes: Vec<String>,

    /// Subscribed minute bar symbols
    #[serde(default)]
    pub bars: Vec<String>,

    /// Subscribed updated bar symbols
    #[serde(default)]
    pub updated_bars: Vec<String>,

    /// Subscribed daily bar symbols
    #[serde(default)]
    pub daily_bars: Vec<String>,

    /// Subscribed order book symbols (crypto)
    #[serde(default)]
    pub orderbooks: Vec<String>,
}

impl From<SubscriptionMessage> for SubscriptionAck {
    fn from(msg: SubscriptionMessage) -> Self {
        let channels = [
            (Channel::Trades, msg.trades),
            (Channel::Quotes, msg.quotes),
            (Channel::Bars, msg.bars),
            (Channel::UpdatedBars, msg.updated_bars),
            (Channel::DailyBars, msg.daily_bars),
            (Channel::Orderbooks, msg.orderbooks),
        ]
        .into_iter()
        .filter(|(_, symbols)| !symbols.is_empty())
        .collect();

        Self { channels }
    }
}

// =============================================================================
// Inbound Control Messages (account)
// =============================================================================

/// Authorization result on the account stream.
///
/// ```json
/// {"stream":"authorization","data":{"status":"authorized","action":"authenticate"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizationMessage {
    /// Payload
    pub data: AuthorizationData,
}

/// Authorization payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizationData {
    /// "authorized" or "unauthorized"
    pub status: String,
    /// Action that was authorized
    #[serde(default)]
    pub action: Option<String>,
}

impl AuthorizationMessage {
    /// Check if authorization succeeded.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.data.status == "authorized"
    }
}

/// Listen acknowledgement on the account stream.
///
/// ```json
/// {"stream":"listening","data":{"streams":["trade_updates"]}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListeningMessage {
    /// Payload
    pub data: ListeningData,
}

/// Streams the server is now sending.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListeningData {
    /// Stream names
    #[serde(default)]
    pub streams: Vec<String>,
}

impl From<ListeningMessage> for SubscriptionAck {
    fn from(msg: ListeningMessage) -> Self {
        let channels = msg
            .data
            .streams
            .iter()
            .filter_map(|name| Channel::from_wire(name))
            .map(|channel| (channel, Vec::new()))
            .collect();
        Self { channels }
    }
}

/// Order/trade update envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeUpdateMessage {
    /// Update payload
    pub data: TradeUpdate,
}

// =============================================================================
// Outbound Requests
// =============================================================================

/// Key pair authentication request (all streams).
///
/// ```json
/// {"action": "auth", "key": "...", "secret": "..."}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    /// Action (always "auth")
    pub action: &'static str,
    /// API key ID
    pub key: &'a str,
    /// API secret key
    pub secret: &'a str,
}

impl<'a> AuthRequest<'a> {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: &'a str, secret: &'a str) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// OAuth authentication request (account stream).
///
/// ```json
/// {"action": "authenticate", "data": {"oauth_token": "..."}}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AccountAuthRequest<'a> {
    /// Action (always "authenticate")
    pub action: &'static str,
    /// Token payload
    pub data: OAuthData<'a>,
}

/// OAuth token payload.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthData<'a> {
    /// Access token
    pub oauth_token: &'a str,
}

impl<'a> AccountAuthRequest<'a> {
    /// Create an OAuth authentication request.
    #[must_use]
    pub const fn oauth(token: &'a str) -> Self {
        Self {
            action: "authenticate",
            data: OAuthData { oauth_token: token },
        }
    }
}

/// Subscribe/unsubscribe request for market data streams.
///
/// ```json
/// {"action": "subscribe", "trades": ["AAPL"], "quotes": ["AMD"], "bars": ["*"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    /// Action ("subscribe" or "unsubscribe")
    pub action: String,

    /// Trade symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<String>,

    /// Quote symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<String>,

    /// Minute bar symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bars: Vec<String>,

    /// Updated bar symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updated_bars: Vec<String>,

    /// Daily bar symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub daily_bars: Vec<String>,

    /// Order book symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orderbooks: Vec<String>,
}

impl SubscriptionRequest {
    /// Create a subscribe request.
    #[must_use]
    pub fn subscribe() -> Self {
        Self {
            action: "subscribe".to_string(),
            ..Default::default()
        }
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub fn unsubscribe() -> Self {
        Self {
            action: "unsubscribe".to_string(),
            ..Default::default()
        }
    }

    /// Set the symbols for one channel. `TradeUpdates` is ignored.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel, symbols: Vec<String>) -> Self {
        match channel {
            Channel::Trades => self.trades = symbols,
            Channel::Quotes => self.quotes = symbols,
            Channel::Bars => self.bars = symbols,
            Channel::UpdatedBars => self.updated_bars = symbols,
            Channel::DailyBars => self.daily_bars = symbols,
            Channel::Orderbooks => self.orderbooks = symbols,
            Channel::TradeUpdates => {}
        }
        self
    }

    /// Whether the request names no symbols at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
            && self.quotes.is_empty()
            && self.bars.is_empty()
            && self.updated_bars.is_empty()
            && self.daily_bars.is_empty()
            && self.orderbooks.is_empty()
    }
}

/// Listen request for the account stream.
///
/// ```json
/// {"action": "listen", "data": {"streams": ["trade_updates"]}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenRequest {
    /// Action (always "listen")
    pub action: &'static str,
    /// Streams to receive
    pub data: ListenData,
}

/// Listen payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenData {
    /// Stream names; an empty list stops all streams
    pub streams: Vec<String>,
}

impl ListenRequest {
    /// Create a listen request for the given streams.
    #[must_use]
    pub const fn new(streams: Vec<String>) -> Self {
        Self {
            action: "listen",
            data: ListenData { streams },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

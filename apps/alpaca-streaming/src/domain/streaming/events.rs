//! Decoded stream events.
//!
//! Market data payloads deserialize straight from Alpaca's single-letter
//! wire keys; account payloads from the `trade_updates` object shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Channel, ConnectionState, EventCategory};

// =============================================================================
// Market Data
// =============================================================================

/// Aggressor side of a crypto trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TakerSide {
    /// Buyer initiated.
    #[serde(rename = "B")]
    Buy,
    /// Seller initiated.
    #[serde(rename = "S")]
    Sell,
    /// Not reported.
    #[serde(other)]
    Unknown,
}

/// A single trade print (stock or crypto).
///
/// ```json
/// {"T":"t","S":"AAPL","i":96921,"x":"D","p":126.55,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@","I"],"z":"C"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Ticker or crypto pair.
    #[serde(rename = "S")]
    pub symbol: String,
    /// Trade ID.
    #[serde(rename = "i", default)]
    pub trade_id: Option<u64>,
    /// Exchange code (stocks only).
    #[serde(rename = "x", default)]
    pub exchange: Option<String>,
    /// Trade price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Trade size (fractional for crypto).
    #[serde(rename = "s")]
    pub size: Decimal,
    /// Trade timestamp.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    /// Trade conditions.
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,
    /// SIP tape (stocks only).
    #[serde(rename = "z", default)]
    pub tape: Option<String>,
    /// Taker side (crypto only).
    #[serde(rename = "tks", default)]
    pub taker_side: Option<TakerSide>,
}

/// Top-of-book quote (stock or crypto).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker or crypto pair.
    #[serde(rename = "S")]
    pub symbol: String,
    /// Bid exchange (stocks only).
    #[serde(rename = "bx", default)]
    pub bid_exchange: Option<String>,
    /// Bid price.
    #[serde(rename = "bp")]
    pub bid_price: Decimal,
    /// Bid size.
    #[serde(rename = "bs")]
    pub bid_size: Decimal,
    /// Ask exchange (stocks only).
    #[serde(rename = "ax", default)]
    pub ask_exchange: Option<String>,
    /// Ask price.
    #[serde(rename = "ap")]
    pub ask_price: Decimal,
    /// Ask size.
    #[serde(rename = "as")]
    pub ask_size: Decimal,
    /// Quote timestamp.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    /// Quote conditions.
    #[serde(rename = "c", default)]
    pub conditions: Vec<String>,
    /// SIP tape (stocks only).
    #[serde(rename = "z", default)]
    pub tape: Option<String>,
}

/// Which bar channel produced a [`Bar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BarKind {
    /// Regular minute bar (`b`).
    #[default]
    Minute,
    /// Correction to an already published minute bar (`u`).
    Updated,
    /// Daily bar (`d`).
    Daily,
}

impl BarKind {
    /// Map a `T` discriminator to a bar kind.
    #[must_use]
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            "b" => Some(Self::Minute),
            "u" => Some(Self::Updated),
            "d" => Some(Self::Daily),
            _ => None,
        }
    }

    /// Channel this bar kind is subscribed through.
    #[must_use]
    pub const fn channel(self) -> Channel {
        match self {
            Self::Minute => Channel::Bars,
            Self::Updated => Channel::UpdatedBars,
            Self::Daily => Channel::DailyBars,
        }
    }
}

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar kind; set by the codec from the message tag.
    #[serde(skip)]
    pub kind: BarKind,
    /// Ticker or crypto pair.
    #[serde(rename = "S")]
    pub symbol: String,
    /// Open price.
    #[serde(rename = "o")]
    pub open: Decimal,
    /// High price.
    #[serde(rename = "h")]
    pub high: Decimal,
    /// Low price.
    #[serde(rename = "l")]
    pub low: Decimal,
    /// Close price.
    #[serde(rename = "c")]
    pub close: Decimal,
    /// Volume.
    #[serde(rename = "v")]
    pub volume: Decimal,
    /// Number of trades in the bar.
    #[serde(rename = "n", default)]
    pub trade_count: Option<u64>,
    /// Volume-weighted average price.
    #[serde(rename = "vw", default)]
    pub vwap: Option<Decimal>,
    /// Bar start timestamp.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Size; zero removes the level.
    #[serde(rename = "s")]
    pub size: Decimal,
}

/// Crypto order book update.
///
/// With `reset` set the levels are a full snapshot, otherwise a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderbook {
    /// Crypto pair.
    #[serde(rename = "S")]
    pub symbol: String,
    /// Update timestamp.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    /// Bid levels.
    #[serde(rename = "b", default)]
    pub bids: Vec<OrderbookLevel>,
    /// Ask levels.
    #[serde(rename = "a", default)]
    pub asks: Vec<OrderbookLevel>,
    /// Full snapshot marker.
    #[serde(rename = "r", default)]
    pub reset: bool,
}

// =============================================================================
// Account Activity
// =============================================================================

/// Order lifecycle event reported on the `trade_updates` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    /// Routed to the exchange.
    New,
    /// Completely filled.
    Fill,
    /// Partially filled.
    PartialFill,
    /// Canceled.
    Canceled,
    /// Expired.
    Expired,
    /// Done for the day.
    DoneForDay,
    /// Replaced by another order.
    Replaced,
    /// Rejected.
    Rejected,
    /// Received, not yet routed.
    PendingNew,
    /// Stopped.
    Stopped,
    /// Cancel requested.
    PendingCancel,
    /// Replace requested.
    PendingReplace,
    /// Calculated.
    Calculated,
    /// Suspended.
    Suspended,
    /// Replace rejected.
    OrderReplaceRejected,
    /// Cancel rejected.
    OrderCancelRejected,
    /// An event this client does not know about yet.
    #[serde(other)]
    Unknown,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
    /// Unrecognized side.
    #[serde(other)]
    Unknown,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Market.
    Market,
    /// Limit.
    Limit,
    /// Stop.
    Stop,
    /// Stop limit.
    StopLimit,
    /// Trailing stop.
    TrailingStop,
    /// Unrecognized type.
    #[serde(other)]
    Unknown,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Day.
    Day,
    /// Good til canceled.
    Gtc,
    /// At the open.
    Opg,
    /// At the close.
    Cls,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
    /// Unrecognized value.
    #[serde(other)]
    Unknown,
}

/// Order class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderClass {
    /// Single leg.
    Simple,
    /// Entry with take-profit and stop-loss.
    Bracket,
    /// One cancels other.
    Oco,
    /// One triggers other.
    Oto,
    /// Multi-leg options.
    Mleg,
    /// Unrecognized class.
    #[serde(other)]
    Unknown,
}

/// Order snapshot attached to a trade update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID.
    pub id: String,
    /// Client order ID.
    pub client_order_id: String,
    /// Symbol.
    pub symbol: String,
    /// Asset class (`us_equity`, `crypto`, ...).
    #[serde(default)]
    pub asset_class: Option<String>,
    /// Side.
    pub side: OrderSide,
    /// Order type.
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Order class.
    #[serde(default)]
    pub order_class: Option<OrderClass>,
    /// Current status.
    pub status: String,
    /// Ordered quantity (absent for notional orders).
    #[serde(default)]
    pub qty: Option<Decimal>,
    /// Notional amount.
    #[serde(default)]
    pub notional: Option<Decimal>,
    /// Filled quantity.
    #[serde(default)]
    pub filled_qty: Option<Decimal>,
    /// Average fill price.
    #[serde(default)]
    pub filled_avg_price: Option<Decimal>,
    /// Limit price.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Stop price.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Extended hours eligibility.
    #[serde(default)]
    pub extended_hours: bool,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fill time.
    #[serde(default)]
    pub filled_at: Option<DateTime<Utc>>,
    /// Cancel time.
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
}

/// An order/trade update from the account activity stream.
///
/// ```json
/// {"stream":"trade_updates","data":{"event":"fill","price":"179.08","qty":"1","order":{...}}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeUpdate {
    /// Event kind.
    pub event: OrderEvent,
    /// Execution ID for fills.
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Order snapshot after the event.
    pub order: Order,
    /// Event time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Position quantity after a fill.
    #[serde(default)]
    pub position_qty: Option<Decimal>,
    /// Fill price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Fill quantity.
    #[serde(default)]
    pub qty: Option<Decimal>,
}

// =============================================================================
// Control Events
// =============================================================================

/// Server confirmation of the currently active subscriptions.
///
/// Informational only: the registry stays the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionAck {
    /// Active symbols per channel. Account listen acks map
    /// [`Channel::TradeUpdates`] to an empty list.
    pub channels: BTreeMap<Channel, Vec<String>>,
}

impl SubscriptionAck {
    /// Symbols the server reports for `channel`.
    #[must_use]
    pub fn symbols(&self, channel: Channel) -> &[String] {
        self.channels.get(&channel).map_or(&[], Vec::as_slice)
    }
}

/// Classification of an error surfaced to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamErrorKind {
    /// Credentials rejected; the session is closed.
    Auth,
    /// A channel or symbol subscription was refused.
    Subscription,
    /// Symbol, connection or throughput limits.
    RateLimit,
    /// Any other server-reported error.
    Server,
}

impl StreamErrorKind {
    /// Classify an Alpaca error code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            401 | 402 | 403 | 404 => Self::Auth,
            405..=407 => Self::RateLimit,
            408..=410 => Self::Subscription,
            _ => Self::Server,
        }
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Subscription => "subscription",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
        }
    }
}

/// An error delivered through the [`EventCategory::Error`] category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamErrorEvent {
    /// Classification.
    pub kind: StreamErrorKind,
    /// Server error code, when the server sent one.
    pub code: Option<i32>,
    /// Human readable message.
    pub message: String,
}

impl StreamErrorEvent {
    /// Build from a server error frame.
    #[must_use]
    pub fn from_server(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: StreamErrorKind::from_code(code),
            code: Some(code),
            message: message.into(),
        }
    }
}

// =============================================================================
// Stream Event
// =============================================================================

/// A decoded event ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Market trade.
    Trade(Trade),
    /// Market quote.
    Quote(Quote),
    /// Bar of any kind.
    Bar(Bar),
    /// Crypto order book update.
    Orderbook(Orderbook),
    /// Account order/trade update.
    TradeUpdate(Box<TradeUpdate>),
    /// Subscription echo or listen acknowledgement.
    Subscription(SubscriptionAck),
    /// Credentials accepted.
    Authorized,
    /// Server or session error.
    Error(StreamErrorEvent),
    /// Connection state transition.
    Connection(ConnectionState),
}

impl StreamEvent {
    /// Listener category this event is routed to.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::Trade(_) => EventCategory::Trade,
            Self::Quote(_) => EventCategory::Quote,
            Self::Bar(_) => EventCategory::Bar,
            Self::Orderbook(_) => EventCategory::Orderbook,
            Self::TradeUpdate(_) => EventCategory::TradeUpdate,
            Self::Subscription(_) => EventCategory::Subscription,
            Self::Authorized => EventCategory::Authorization,
            Self::Error(_) => EventCategory::Error,
            Self::Connection(_) => EventCategory::Connection,
        }
    }

    /// Symbol carried by the event, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(t) => Some(&t.symbol),
            Self::Quote(q) => Some(&q.symbol),
            Self::Bar(b) => Some(&b.symbol),
            Self::Orderbook(o) => Some(&o.symbol),
            Self::TradeUpdate(u) => Some(&u.order.symbol),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stock_trade_from_wire() {
        let json = r#"{"T":"t","S":"AAPL","i":96921,"x":"D","p":126.55,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@","I"],"z":"C"}"#;
        let trade: Trade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.symbol, "AAPL");
        assert_eq!(trade.trade_id, Some(96921));
        assert_eq!(trade.price, Decimal::from_str("126.55").unwrap());
        assert_eq!(trade.size, Decimal::ONE);
        assert_eq!(trade.tape.as_deref(), Some("C"));
        assert_eq!(trade.taker_side, None);
    }

    #[test]
    fn crypto_trade_from_wire() {
        let json = r#"{"T":"t","S":"BTC/USD","p":64250.5,"s":0.0123,"t":"2024-03-12T10:27:48.858Z","i":4125,"tks":"S"}"#;
        let trade: Trade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.size, Decimal::from_str("0.0123").unwrap());
        assert_eq!(trade.taker_side, Some(TakerSide::Sell));
        assert!(trade.exchange.is_none());
    }

    #[test]
    fn orderbook_from_wire() {
        let json = r#"{"T":"o","S":"BTC/USD","t":"2024-03-12T10:38:50.796Z","b":[{"p":27915.8,"s":0}],"a":[{"p":27920.1,"s":0.5}],"r":true}"#;
        let book: Orderbook = serde_json::from_str(json).unwrap();
        assert!(book.reset);
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].size, Decimal::ZERO);
        assert_eq!(book.asks[0].size, Decimal::from_str("0.5").unwrap());
    }

    #[test]
    fn unknown_order_event_is_tolerated() {
        let event: OrderEvent = serde_json::from_str(r#""held""#).unwrap();
        assert_eq!(event, OrderEvent::Unknown);
    }

    #[test]
    fn error_kind_classification() {
        assert_eq!(StreamErrorKind::from_code(402), StreamErrorKind::Auth);
        assert_eq!(StreamErrorKind::from_code(405), StreamErrorKind::RateLimit);
        assert_eq!(StreamErrorKind::from_code(409), StreamErrorKind::Subscription);
        assert_eq!(StreamErrorKind::from_code(500), StreamErrorKind::Server);
    }

    #[test]
    fn event_categories() {
        assert_eq!(StreamEvent::Authorized.category(), EventCategory::Authorization);
        assert_eq!(
            StreamEvent::Connection(ConnectionState::Streaming).category(),
            EventCategory::Connection
        );
        assert!(EventCategory::Trade.is_data());
        assert!(!EventCategory::Error.is_data());
    }
}

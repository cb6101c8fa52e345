//! Streaming Vocabulary
//!
//! Types shared by every layer of a streaming session:
//!
//! - [`StreamFlavor`]: which Alpaca stream a session talks to
//! - [`Channel`]: the subscribable data channels and their wire names
//! - [`ConnectionState`]: the lifecycle of one logical connection
//! - [`EventCategory`] / [`StreamEvent`]: decoded events handed to listeners

mod events;

pub use events::{
    Bar, BarKind, Order, OrderClass, OrderEvent, OrderSide, OrderType, Orderbook, OrderbookLevel,
    Quote, StreamErrorEvent, StreamErrorKind, StreamEvent, SubscriptionAck, TakerSide, TimeInForce,
    Trade, TradeUpdate,
};

use std::fmt;

// =============================================================================
// Stream Flavor
// =============================================================================

/// The Alpaca stream a session is bound to.
///
/// Fixed at session construction; determines the endpoint, the
/// authentication frame and the message vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFlavor {
    /// Account activity (order/trade updates) on the trading API host.
    AccountActivity,
    /// Stock market data (IEX or SIP feed).
    StockMarketData,
    /// Crypto market data.
    CryptoMarketData,
}

impl StreamFlavor {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountActivity => "account",
            Self::StockMarketData => "stock",
            Self::CryptoMarketData => "crypto",
        }
    }

    /// Channels this flavor accepts subscriptions for.
    #[must_use]
    pub const fn supported_channels(self) -> &'static [Channel] {
        match self {
            Self::AccountActivity => &[Channel::TradeUpdates],
            Self::StockMarketData => &[
                Channel::Trades,
                Channel::Quotes,
                Channel::Bars,
                Channel::UpdatedBars,
                Channel::DailyBars,
            ],
            Self::CryptoMarketData => &[
                Channel::Trades,
                Channel::Quotes,
                Channel::Bars,
                Channel::UpdatedBars,
                Channel::DailyBars,
                Channel::Orderbooks,
            ],
        }
    }

    /// Whether `channel` can be subscribed on this flavor.
    #[must_use]
    pub fn supports(self, channel: Channel) -> bool {
        self.supported_channels().contains(&channel)
    }

    /// Whether this flavor carries market data (symbol-keyed channels).
    #[must_use]
    pub const fn is_market_data(self) -> bool {
        !matches!(self, Self::AccountActivity)
    }
}

impl fmt::Display for StreamFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Channel
// =============================================================================

/// A subscribable data channel.
///
/// Ordering follows declaration order so that snapshots and outbound
/// frames list channels deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Individual trades.
    Trades,
    /// Top-of-book quotes.
    Quotes,
    /// Minute bars.
    Bars,
    /// Late-trade corrections to minute bars.
    UpdatedBars,
    /// Daily bars.
    DailyBars,
    /// Crypto order book snapshots and deltas.
    Orderbooks,
    /// Account order/trade updates.
    TradeUpdates,
}

impl Channel {
    /// Every channel, in declaration order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Trades,
            Self::Quotes,
            Self::Bars,
            Self::UpdatedBars,
            Self::DailyBars,
            Self::Orderbooks,
            Self::TradeUpdates,
        ]
    }

    /// Name used on the wire (subscription frame keys, listen streams).
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Quotes => "quotes",
            Self::Bars => "bars",
            Self::UpdatedBars => "updatedBars",
            Self::DailyBars => "dailyBars",
            Self::Orderbooks => "orderbooks",
            Self::TradeUpdates => "trade_updates",
        }
    }

    /// Parse a wire name back into a channel.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.wire_name() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a session's logical connection.
///
/// Only the connection task moves a running session between states; callers
/// observe it through the session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, authentication frame sent.
    AwaitingAuth,
    /// Credentials accepted, reconciliation in progress.
    Authenticated,
    /// Subscriptions applied, data flowing.
    Streaming,
    /// Connection lost, waiting out the backoff delay.
    Reconnecting,
    /// Stopped by the caller or by a rejected handshake.
    Closed,
}

impl ConnectionState {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Every non-terminal state may move to `Closed` (caller disconnect).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{
            AwaitingAuth, Authenticated, Closed, Connecting, Disconnected, Reconnecting, Streaming,
        };

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, AwaitingAuth | Reconnecting)
                | (AwaitingAuth, Authenticated | Reconnecting)
                | (Authenticated, Streaming | Reconnecting)
                | (Streaming, Reconnecting)
                | (Reconnecting, Connecting)
                | (
                    Disconnected
                        | Connecting
                        | AwaitingAuth
                        | Authenticated
                        | Streaming
                        | Reconnecting,
                    Closed
                )
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event Category
// =============================================================================

/// Category used to route events to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Market trades.
    Trade,
    /// Market quotes.
    Quote,
    /// Minute, updated and daily bars.
    Bar,
    /// Crypto order books.
    Orderbook,
    /// Account order/trade updates.
    TradeUpdate,
    /// Server subscription echoes and listen acknowledgements.
    Subscription,
    /// Successful authentication.
    Authorization,
    /// Server errors and terminal session failures.
    Error,
    /// Connection state transitions.
    Connection,
}

impl EventCategory {
    /// Every category.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Trade,
            Self::Quote,
            Self::Bar,
            Self::Orderbook,
            Self::TradeUpdate,
            Self::Subscription,
            Self::Authorization,
            Self::Error,
            Self::Connection,
        ]
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::Bar => "bar",
            Self::Orderbook => "orderbook",
            Self::TradeUpdate => "trade_update",
            Self::Subscription => "subscription",
            Self::Authorization => "authorization",
            Self::Error => "error",
            Self::Connection => "connection",
        }
    }

    /// Whether events of this category carry market or account data, as
    /// opposed to control traffic.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(
            self,
            Self::Trade | Self::Quote | Self::Bar | Self::Orderbook | Self::TradeUpdate
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Channel::Trades, "trades")]
    #[test_case(Channel::UpdatedBars, "updatedBars")]
    #[test_case(Channel::DailyBars, "dailyBars")]
    #[test_case(Channel::Orderbooks, "orderbooks")]
    #[test_case(Channel::TradeUpdates, "trade_updates")]
    fn channel_wire_names(channel: Channel, wire: &str) {
        assert_eq!(channel.wire_name(), wire);
        assert_eq!(Channel::from_wire(wire), Some(channel));
    }

    #[test]
    fn unknown_wire_name() {
        assert_eq!(Channel::from_wire("lulds"), None);
    }

    #[test]
    fn flavor_channel_support() {
        assert!(StreamFlavor::StockMarketData.supports(Channel::Trades));
        assert!(!StreamFlavor::StockMarketData.supports(Channel::Orderbooks));
        assert!(StreamFlavor::CryptoMarketData.supports(Channel::Orderbooks));
        assert!(!StreamFlavor::CryptoMarketData.supports(Channel::TradeUpdates));
        assert!(StreamFlavor::AccountActivity.supports(Channel::TradeUpdates));
        assert!(!StreamFlavor::AccountActivity.supports(Channel::Quotes));
    }

    #[test]
    fn happy_path_transitions() {
        use ConnectionState::*;
        let path = [
            Disconnected,
            Connecting,
            AwaitingAuth,
            Authenticated,
            Streaming,
            Reconnecting,
            Connecting,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn closed_is_terminal() {
        use ConnectionState::*;
        for state in [
            Disconnected,
            Connecting,
            AwaitingAuth,
            Authenticated,
            Streaming,
            Reconnecting,
            Closed,
        ] {
            assert!(!Closed.can_transition_to(state));
        }
        assert!(Closed.is_terminal());
        assert!(Streaming.can_transition_to(Closed));
    }

    #[test]
    fn skipping_auth_is_rejected() {
        assert!(!ConnectionState::Connecting.can_transition_to(ConnectionState::Streaming));
        assert!(!ConnectionState::AwaitingAuth.can_transition_to(ConnectionState::Streaming));
    }
}

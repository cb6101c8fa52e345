//! Stream Session
//!
//! The caller-facing handle for one stream flavor. A session owns its
//! subscription registry and listener dispatcher, and runs a
//! [`ConnectionManager`] task while connected.
//!
//! Subscriptions may change in any state. The registry is updated at once;
//! a live connection receives the incremental change, and any later
//! connection replays the whole registry after authenticating.
//!
//! # Example
//!
//! ```rust,no_run
//! use alpaca_streaming::{AlpacaStreams, Channel, Credentials};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let streams = AlpacaStreams::new(Credentials::key_pair("key", "secret")?);
//! let stocks = streams.stock()?;
//! stocks.on_trade(|trade| println!("{} {}", trade.symbol, trade.price))?;
//! stocks.subscribe(Channel::Trades, ["AAPL"])?;
//! stocks.connect()?;
//! // ...
//! stocks.disconnect().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::auth::AuthError;
use super::connection::ConnectionManager;
use super::protocol::StreamProtocol;
use crate::application::ports::StreamConnector;
use crate::application::services::{DispatchQueue, DispatchWorker, ListenerDispatcher};
use crate::domain::streaming::{
    Bar, Channel, ConnectionState, EventCategory, Orderbook, Quote, StreamErrorEvent, StreamEvent,
    StreamFlavor, SubscriptionAck, Trade, TradeUpdate,
};
use crate::domain::subscription::{
    SubscriptionAction, SubscriptionChange, SubscriptionRegistry, SubscriptionSnapshot, Symbol,
};
use crate::infrastructure::config::SessionSettings;

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session reached `Closed` and cannot be reused.
    #[error("session is closed")]
    Closed,

    /// The channel does not exist on this stream.
    #[error("channel {channel} is not available on the {flavor} stream")]
    UnsupportedChannel {
        /// Requested channel.
        channel: Channel,
        /// Session flavor.
        flavor: StreamFlavor,
    },

    /// `connect` was called outside a Tokio runtime.
    #[error("no Tokio runtime available to run the connection")]
    NoRuntime,

    /// Credentials cannot open this stream.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The listener dispatch thread could not be started.
    #[error("failed to start dispatch worker: {0}")]
    DispatchWorker(String),
}

/// Tasks of a running connection.
struct RunningConnection {
    commands: mpsc::UnboundedSender<SubscriptionChange>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    dispatch_worker: DispatchWorker,
}

/// A streaming session bound to one flavor.
pub struct StreamSession {
    protocol: Arc<dyn StreamProtocol>,
    connector: Arc<dyn StreamConnector>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<ListenerDispatcher>,
    state: Arc<watch::Sender<ConnectionState>>,
    settings: SessionSettings,
    running: Mutex<Option<RunningConnection>>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("flavor", &self.flavor())
            .field("endpoint", &self.protocol.endpoint())
            .field("state", &self.state())
            .field("subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(
        protocol: Arc<dyn StreamProtocol>,
        connector: Arc<dyn StreamConnector>,
        settings: SessionSettings,
    ) -> Self {
        let flavor = protocol.flavor();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            protocol,
            connector,
            registry: Arc::new(SubscriptionRegistry::new()),
            dispatcher: Arc::new(ListenerDispatcher::new(flavor)),
            state: Arc::new(state),
            settings,
            running: Mutex::new(None),
        }
    }

    /// Stream flavor.
    #[must_use]
    pub fn flavor(&self) -> StreamFlavor {
        self.protocol.flavor()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Copy of the desired subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionSnapshot {
        self.registry.snapshot()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.state().is_terminal() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the connection task. Idempotent while running.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after the session closed and
    /// [`SessionError::NoRuntime`] outside a Tokio runtime.
    pub fn connect(&self) -> Result<(), SessionError> {
        let mut running = self.running.lock();
        self.ensure_open()?;
        if running.is_some() {
            return Ok(());
        }

        let handle = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let _enter = handle.enter();

        let (events, dispatch_worker) = DispatchQueue::spawn(
            Arc::clone(&self.dispatcher),
            self.settings.dispatch_capacity,
            self.settings.dispatch_grace,
        )
        .map_err(|e| SessionError::DispatchWorker(e.to_string()))?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let manager = ConnectionManager::new(
            Arc::clone(&self.protocol),
            Arc::clone(&self.connector),
            Arc::clone(&self.registry),
            events,
            Arc::clone(&self.state),
            self.settings.clone(),
            cancel.clone(),
        );
        let task = handle.spawn(manager.run(command_rx));

        tracing::info!(flavor = %self.flavor(), "Session connecting");
        *running = Some(RunningConnection {
            commands,
            cancel,
            task,
            dispatch_worker,
        });
        Ok(())
    }

    /// Close the session. Idempotent.
    ///
    /// Returns once the connection task has stopped and every queued event,
    /// including the final `Closed` transition, has been delivered. A
    /// listener still running after the dispatch grace period is left
    /// behind on its worker thread.
    pub async fn disconnect(&self) {
        let running = self.running.lock().take();

        match running {
            Some(running) => {
                running.cancel.cancel();
                if let Err(e) = running.task.await {
                    tracing::warn!(flavor = %self.flavor(), error = %e, "Connection task failed");
                }
                running
                    .dispatch_worker
                    .join(self.settings.dispatch_grace)
                    .await;
            }
            None => {
                let previous = self.state.send_replace(ConnectionState::Closed);
                if previous != ConnectionState::Closed {
                    self.dispatcher
                        .dispatch(&StreamEvent::Connection(ConnectionState::Closed));
                }
            }
        }
        tracing::info!(flavor = %self.flavor(), "Session closed");
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add symbols to a channel.
    ///
    /// On market data streams an empty list does nothing. On the account
    /// stream the symbols are ignored and the channel itself is desired.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the channel does not
    /// belong to this flavor.
    pub fn subscribe<I, S>(&self, channel: Channel, symbols: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.change(SubscriptionAction::Subscribe, channel, symbols)?;
        if self.settings.auto_connect {
            self.connect()?;
        }
        Ok(())
    }

    /// Remove symbols from a channel. Symbols never subscribed are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the channel does not
    /// belong to this flavor.
    pub fn unsubscribe<I, S>(&self, channel: Channel, symbols: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.change(SubscriptionAction::Unsubscribe, channel, symbols)
    }

    /// Listen for order/trade updates on the account stream.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::subscribe`].
    pub fn subscribe_trade_updates(&self) -> Result<(), SessionError> {
        self.subscribe(Channel::TradeUpdates, Vec::<Symbol>::new())
    }

    /// Stop order/trade updates on the account stream.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::unsubscribe`].
    pub fn unsubscribe_trade_updates(&self) -> Result<(), SessionError> {
        self.unsubscribe(Channel::TradeUpdates, Vec::<Symbol>::new())
    }

    fn change<I, S>(
        &self,
        action: SubscriptionAction,
        channel: Channel,
        symbols: I,
    ) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let flavor = self.flavor();
        self.ensure_open()?;
        if !flavor.supports(channel) {
            return Err(SessionError::UnsupportedChannel { channel, flavor });
        }

        let symbols: Vec<Symbol> = if flavor.is_market_data() {
            let symbols: Vec<Symbol> = symbols.into_iter().map(Into::into).collect();
            if symbols.iter().all(|s| s.trim().is_empty()) {
                return Ok(());
            }
            symbols
        } else {
            Vec::new()
        };

        // Holding the lock orders registry updates with their commands.
        let running = self.running.lock();
        let Some(change) = self.registry.apply(action, channel, symbols) else {
            return Ok(());
        };
        tracing::debug!(
            flavor = %flavor,
            action = action.as_str(),
            channel = %channel,
            symbols = ?change.symbols,
            "Subscription changed"
        );
        if let Some(running) = running.as_ref() {
            let _ = running.commands.send(change);
        }
        Ok(())
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a callback for every event of `category`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has closed, since
    /// the callback could never run.
    pub fn on_event<F>(&self, category: EventCategory, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.dispatcher.register(category, callback);
        Ok(())
    }

    /// Register a trade callback.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_trade<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::Trade, move |event| {
            if let StreamEvent::Trade(trade) = event {
                callback(trade);
            }
        })
    }

    /// Register a quote callback.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_quote<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&Quote) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::Quote, move |event| {
            if let StreamEvent::Quote(quote) = event {
                callback(quote);
            }
        })
    }

    /// Register a bar callback (minute, updated and daily bars).
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_bar<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&Bar) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::Bar, move |event| {
            if let StreamEvent::Bar(bar) = event {
                callback(bar);
            }
        })
    }

    /// Register an order book callback.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_orderbook<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&Orderbook) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::Orderbook, move |event| {
            if let StreamEvent::Orderbook(book) = event {
                callback(book);
            }
        })
    }

    /// Register an order/trade update callback.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_trade_update<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&TradeUpdate) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::TradeUpdate, move |event| {
            if let StreamEvent::TradeUpdate(update) = event {
                callback(update);
            }
        })
    }

    /// Register a subscription acknowledgement callback.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_subscription<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&SubscriptionAck) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::Subscription, move |event| {
            if let StreamEvent::Subscription(ack) = event {
                callback(ack);
            }
        })
    }

    /// Register an error callback.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_error<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&StreamErrorEvent) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::Error, move |event| {
            if let StreamEvent::Error(error) = event {
                callback(error);
            }
        })
    }

    /// Register a connection state callback.
    ///
    /// # Errors
    ///
    /// See [`StreamSession::on_event`].
    pub fn on_state_change<F>(&self, callback: F) -> Result<(), SessionError>
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.on_event(EventCategory::Connection, move |event| {
            if let StreamEvent::Connection(state) = event {
                callback(*state);
            }
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::alpaca::auth::Credentials;
    use crate::infrastructure::alpaca::protocol;
    use crate::infrastructure::alpaca::transport::TungsteniteConnector;
    use tokio_test::assert_ok;

    fn session(flavor: StreamFlavor) -> StreamSession {
        let credentials = Arc::new(Credentials::key_pair("key", "secret").unwrap());
        StreamSession::new(
            protocol::for_flavor(flavor, "ws://127.0.0.1:1".to_string(), credentials),
            Arc::new(TungsteniteConnector::new()),
            SessionSettings::default(),
        )
    }

    #[test]
    fn connect_needs_a_runtime() {
        let session = session(StreamFlavor::StockMarketData);
        assert_eq!(session.connect(), Err(SessionError::NoRuntime));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn subscriptions_accumulate_while_disconnected() {
        let session = session(StreamFlavor::StockMarketData);
        assert_ok!(session.subscribe(Channel::Trades, ["AAPL", " ", "AAPL"]));
        assert_ok!(session.subscribe(Channel::Quotes, [""]));
        assert_ok!(session.unsubscribe(Channel::Bars, ["MSFT"]));

        let snapshot = session.subscriptions();
        assert_eq!(snapshot.symbols(Channel::Trades), vec!["AAPL".to_string()]);
        assert!(!snapshot.contains_channel(Channel::Quotes));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn account_ignores_symbols() {
        let session = session(StreamFlavor::AccountActivity);
        session.subscribe(Channel::TradeUpdates, ["AAPL"]).unwrap();
        let snapshot = session.subscriptions();
        assert!(snapshot.contains_channel(Channel::TradeUpdates));
        assert!(!snapshot.contains(Channel::TradeUpdates, "AAPL"));

        session.unsubscribe_trade_updates().unwrap();
        assert!(session.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn closed_session_rejects_everything() {
        let session = session(StreamFlavor::CryptoMarketData);
        assert_ok!(session.on_trade(|_| {}));
        session.disconnect().await;

        assert_eq!(session.state(), ConnectionState::Closed);
        assert_eq!(session.connect(), Err(SessionError::Closed));
        assert_eq!(
            session.subscribe(Channel::Trades, ["BTC/USD"]),
            Err(SessionError::Closed)
        );
        assert_eq!(
            session.unsubscribe(Channel::Trades, ["BTC/USD"]),
            Err(SessionError::Closed)
        );

        assert_eq!(
            session.on_event(EventCategory::Trade, |_| {}),
            Err(SessionError::Closed)
        );
        assert_eq!(session.on_orderbook(|_| {}), Err(SessionError::Closed));
        assert_eq!(session.on_state_change(|_| {}), Err(SessionError::Closed));
        assert_eq!(session.dispatcher.listener_count(EventCategory::Trade), 1);
        assert_eq!(session.dispatcher.listener_count(EventCategory::Connection), 0);
    }
}

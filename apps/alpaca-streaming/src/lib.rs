#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Alpaca Streaming - WebSocket Session Client
//!
//! Persistent, self-healing sessions for Alpaca's three WebSocket streams:
//! account activity (order/trade updates), stock market data and crypto
//! market data. A session keeps the caller's desired subscriptions, replays
//! them after every reconnect and fans decoded events out to registered
//! listeners.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming types with no I/O
//!   - `streaming`: Flavors, channels, connection states and events
//!   - `subscription`: Desired-subscription registry
//!
//! - **Application**: Port definitions and services
//!   - `ports`: Frame transport interface
//!   - `services`: Listener dispatch and the ordered dispatch queue
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `alpaca`: Codec, handshake, connection manager and sessions
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OpenTelemetry setup
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐   frames   ┌──────────────┐
//! Alpaca WS ─────►│  Connection  │───────────►│    Codec     │
//!                 │   Manager    │◄─┐         └──────┬───────┘
//!                 └──────────────┘  │ changes        │ events
//!                        ▲          │                ▼
//!                        │   ┌──────┴──────┐  ┌──────────────┐
//!                 replay │   │   Session   │  │   Dispatch   │──► listeners
//!                        └───│  Registry   │  │    Queue     │
//!                            └─────────────┘  └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    Bar, BarKind, Channel, ConnectionState, EventCategory, Order, OrderEvent, Orderbook,
    OrderbookLevel, Quote, StreamErrorEvent, StreamErrorKind, StreamEvent, StreamFlavor,
    SubscriptionAck, Trade, TradeUpdate,
};
pub use domain::subscription::{SubscriptionSnapshot, Symbol};

// Ports
pub use application::ports::{Frame, FrameSink, FrameStream, StreamConnector, TransportError};

// Sessions
pub use infrastructure::alpaca::{
    AlpacaStreams, AuthError, Credentials, SessionError, StreamSession, TungsteniteConnector,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, DataFeed, Environment, SessionSettings, StreamEndpoints, StreamsConfig,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

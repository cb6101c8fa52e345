//! Alpaca WebSocket Adapters
//!
//! Streaming sessions for Alpaca's three WebSocket streams:
//!
//! - **Account activity**: order/trade updates (`trade_updates`)
//! - **Stock market data**: trades, quotes and bars from IEX or SIP
//! - **Crypto market data**: trades, quotes, bars and order books

pub mod auth;
pub mod client;
pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use auth::{AuthError, AuthHandshake, AuthOutcome, AuthState, Credentials};
pub use client::AlpacaStreams;
pub use codec::{CodecError, Inbound, JsonCodec};
pub use connection::{ConnectionError, ConnectionManager};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use protocol::{AccountProtocol, MarketDataProtocol, StreamProtocol};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{SessionError, StreamSession};
pub use transport::TungsteniteConnector;

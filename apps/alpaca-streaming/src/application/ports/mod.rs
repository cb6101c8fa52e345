//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamConnector`: opens a frame-oriented, bidirectional connection
//!   (a WebSocket in production, in-memory channels in tests)

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Sink;
use futures_util::stream::BoxStream;

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload (the account stream sends JSON as binary frames).
    Binary(Vec<u8>),
    /// Ping control frame.
    Ping(Vec<u8>),
    /// Pong control frame.
    Pong(Vec<u8>),
    /// Close control frame with an optional reason.
    Close(Option<String>),
}

/// Errors raised by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Endpoint that was dialed.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The open connection failed while reading or writing.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The peer or the local side already closed the connection.
    #[error("connection closed")]
    Closed,
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a connection. Ends when the peer goes away.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// Opens connections to a stream endpoint.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Open a connection to `url` and split it into its two halves.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the endpoint cannot be reached
    /// or the upgrade handshake fails.
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError>;
}

//! WebSocket Transport
//!
//! [`StreamConnector`] backed by `tokio-tungstenite` with rustls. Converts
//! between tungstenite messages and transport [`Frame`]s so the connection
//! manager never sees the WebSocket library.

use std::sync::Once;

use async_trait::async_trait;
use futures_util::future::ready;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::application::ports::{Frame, FrameSink, FrameStream, StreamConnector, TransportError};

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring crypto provider for rustls, once per process.
///
/// Harmless if the application already installed one.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Production connector speaking WebSocket over TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        install_crypto_provider();

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        let (write, read) = ws_stream.split();

        let sink: FrameSink = Box::pin(
            write
                .sink_map_err(|e| TransportError::WebSocket(e.to_string()))
                .with(|frame: Frame| ready(Ok::<_, TransportError>(into_message(frame)))),
        );

        let stream: FrameStream = read
            .filter_map(|result| {
                ready(match result {
                    Ok(message) => from_message(message).map(Ok),
                    Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
                })
            })
            .boxed();

        Ok((sink, stream))
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        })),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Ping(bytes) => Some(Frame::Ping(bytes.to_vec())),
        Message::Pong(bytes) => Some(Frame::Pong(bytes.to_vec())),
        Message::Close(close) => Some(Frame::Close(
            close.map(|frame| frame.reason.as_str().to_owned()),
        )),
        // Raw frames only surface when writing, never when reading.
        Message::Frame(_) => None,
    }
}

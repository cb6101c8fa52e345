//! Connection Manager
//!
//! Owns the physical connection of one session and drives it through
//! `Connecting → AwaitingAuth → Authenticated → Streaming`, reconnecting
//! with backoff whenever it is lost.
//!
//! # Per-connection flow
//!
//! 1. Open the transport and send the authentication frame.
//! 2. Drop anything that is not part of the handshake until the server
//!    answers. A rejection is terminal; a timeout or server error is not.
//! 3. Replay the registry snapshot. The account stream then waits for its
//!    `listening` acknowledgement.
//! 4. Stream: hand decoded events to the dispatch queue, forward live
//!    subscription changes, answer pings and watch liveness.
//!
//! Only this task moves the session's [`ConnectionState`]. Each transition
//! is published through the state watch and queued as a
//! [`StreamEvent::Connection`] event, so listeners see it in order with
//! data events.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::auth::{AuthError, AuthHandshake, AuthOutcome};
use super::codec::{Inbound, JsonCodec};
use super::heartbeat::{HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::protocol::StreamProtocol;
use super::reconnect::ReconnectPolicy;
use crate::application::ports::{Frame, FrameSink, StreamConnector, TransportError};
use crate::application::services::DispatchQueue;
use crate::domain::streaming::{
    ConnectionState, StreamErrorEvent, StreamErrorKind, StreamEvent, StreamFlavor,
};
use crate::domain::subscription::{SubscriptionChange, SubscriptionRegistry};
use crate::infrastructure::config::SessionSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Transient failures that end one connection and trigger a reconnect.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Socket-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server closed the connection.
    #[error("server closed the connection: {}", .0.as_deref().unwrap_or("no reason"))]
    ServerClosed(Option<String>),

    /// No traffic after a ping.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Retryable handshake failure.
    #[error(transparent)]
    Auth(AuthError),

    /// An outbound frame could not be built.
    #[error("failed to encode outbound frame: {0}")]
    Encode(String),
}

/// Why a connection attempt ended.
#[derive(Debug)]
enum SessionExit {
    /// The caller disconnected.
    Cancelled,
    /// Credentials were rejected; the session closes.
    Rejected(AuthError),
    /// Transient failure; reconnect after backoff.
    Lost {
        error: ConnectionError,
        streamed_for: Option<Duration>,
    },
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Runs one session's connection loop until cancelled or rejected.
pub struct ConnectionManager {
    protocol: Arc<dyn StreamProtocol>,
    connector: Arc<dyn StreamConnector>,
    registry: Arc<SubscriptionRegistry>,
    events: DispatchQueue,
    state: Arc<watch::Sender<ConnectionState>>,
    settings: SessionSettings,
    cancel: CancellationToken,
    codec: JsonCodec,
}

/// Handshake and streaming phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingAuth { deadline: Instant },
    AwaitingAck { deadline: Instant },
    Streaming { since: Instant },
}

impl Phase {
    const fn deadline(self) -> Option<Instant> {
        match self {
            Self::AwaitingAuth { deadline } | Self::AwaitingAck { deadline } => Some(deadline),
            Self::Streaming { .. } => None,
        }
    }

    const fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming { .. })
    }
}

/// Mutable state of one live connection.
struct Connection {
    id: Uuid,
    sink: FrameSink,
    handshake: AuthHandshake,
    phase: Phase,
    liveness: Arc<HeartbeatState>,
    /// Registry generation already applied by the reconciliation frame.
    synced_generation: u64,
}

impl Connection {
    fn streamed_for(&self) -> Option<Duration> {
        match self.phase {
            Phase::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    fn lost(&self, error: ConnectionError) -> SessionExit {
        SessionExit::Lost {
            error,
            streamed_for: self.streamed_for(),
        }
    }
}

impl ConnectionManager {
    /// Create a manager; nothing happens until [`ConnectionManager::run`].
    #[must_use]
    pub fn new(
        protocol: Arc<dyn StreamProtocol>,
        connector: Arc<dyn StreamConnector>,
        registry: Arc<SubscriptionRegistry>,
        events: DispatchQueue,
        state: Arc<watch::Sender<ConnectionState>>,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> Self {
        let codec = JsonCodec::new(protocol.flavor());
        Self {
            protocol,
            connector,
            registry,
            events,
            state,
            settings,
            cancel,
            codec,
        }
    }

    fn flavor(&self) -> StreamFlavor {
        self.protocol.flavor()
    }

    /// Connect, stream and reconnect until cancelled or rejected. Always
    /// ends in [`ConnectionState::Closed`].
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<SubscriptionChange>) {
        let flavor = self.flavor();
        let mut backoff = ReconnectPolicy::new(self.settings.reconnect());

        loop {
            self.transition(ConnectionState::Connecting).await;

            let connection_id = Uuid::new_v4();
            let span = tracing::info_span!(
                "stream_connection",
                flavor = flavor.as_str(),
                connection_id = %connection_id
            );
            let exit = self
                .connect_and_stream(connection_id, &mut commands)
                .instrument(span)
                .await;

            match exit {
                SessionExit::Cancelled => break,
                SessionExit::Rejected(error) => {
                    tracing::error!(flavor = %flavor, error = %error, "Authentication rejected, closing session");
                    let code = match &error {
                        AuthError::Rejected { code, .. } => *code,
                        _ => None,
                    };
                    self.events
                        .deliver(StreamEvent::Error(StreamErrorEvent {
                            kind: StreamErrorKind::Auth,
                            code,
                            message: error.to_string(),
                        }))
                        .await;
                    break;
                }
                SessionExit::Lost {
                    error,
                    streamed_for,
                } => {
                    if backoff.record_connection(streamed_for) {
                        tracing::debug!(flavor = %flavor, "Connection was stable, backoff reset");
                    }
                    self.transition(ConnectionState::Reconnecting).await;

                    let delay = backoff.next_delay();
                    metrics::record_reconnect(flavor, delay);
                    tracing::warn!(
                        flavor = %flavor,
                        error = %error,
                        attempt = backoff.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Connection lost, reconnecting"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.transition(ConnectionState::Closed).await;
    }

    async fn connect_and_stream(
        &self,
        connection_id: Uuid,
        commands: &mut mpsc::UnboundedReceiver<SubscriptionChange>,
    ) -> SessionExit {
        let url = self.protocol.endpoint().to_string();
        tracing::info!(url = %url, "Connecting");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return SessionExit::Cancelled,
            result = self.connector.connect(&url) => result,
        };
        let (sink, mut stream) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                return SessionExit::Lost {
                    error: e.into(),
                    streamed_for: None,
                };
            }
        };

        let auth = match self.protocol.auth_request() {
            Ok(frame) => frame,
            Err(e) => return SessionExit::Rejected(AuthError::InvalidCredentials(e.to_string())),
        };

        let mut conn = Connection {
            id: connection_id,
            sink,
            handshake: AuthHandshake::new(self.flavor()),
            phase: Phase::AwaitingAuth {
                deadline: Instant::now() + self.settings.auth_timeout,
            },
            liveness: Arc::new(HeartbeatState::new()),
            synced_generation: 0,
        };

        if let Err(e) = conn.sink.send(Frame::Text(auth)).await {
            return conn.lost(e.into());
        }
        conn.handshake.on_sent();
        self.transition(ConnectionState::AwaitingAuth).await;

        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        let mut heartbeat = HeartbeatManager::spawn(
            self.settings.heartbeat(),
            Arc::clone(&conn.liveness),
            heartbeat_cancel,
        );

        loop {
            let deadline = conn.phase.deadline();
            let step = tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = conn.sink.send(Frame::Close(None)).await;
                    let _ = conn.sink.close().await;
                    Err(SessionExit::Cancelled)
                }
                () = sleep_until(deadline) => self.on_deadline(&mut conn).await,
                Some(event) = heartbeat.recv() => self.on_heartbeat(&mut conn, event).await,
                Some(change) = commands.recv(), if conn.phase.is_streaming() => {
                    self.on_change(&mut conn, &change).await
                }
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.on_frame(&mut conn, frame).await,
                    Some(Err(e)) => Err(conn.lost(e.into())),
                    None => Err(conn.lost(ConnectionError::ServerClosed(None))),
                },
            };

            if let Err(exit) = step {
                return exit;
            }
        }
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    async fn on_deadline(&self, conn: &mut Connection) -> Result<(), SessionExit> {
        match conn.phase {
            Phase::AwaitingAuth { .. } => {
                let error = conn.handshake.on_timeout(self.settings.auth_timeout);
                Err(conn.lost(ConnectionError::Auth(error)))
            }
            Phase::AwaitingAck { .. } => {
                tracing::warn!("No subscription acknowledgement, streaming anyway");
                self.enter_streaming(conn).await;
                Ok(())
            }
            Phase::Streaming { .. } => Ok(()),
        }
    }

    async fn on_heartbeat(
        &self,
        conn: &mut Connection,
        event: HeartbeatEvent,
    ) -> Result<(), SessionExit> {
        match event {
            HeartbeatEvent::SendPing => conn
                .sink
                .send(Frame::Ping(Vec::new()))
                .await
                .map_err(|e| conn.lost(e.into())),
            HeartbeatEvent::Timeout => Err(conn.lost(ConnectionError::HeartbeatTimeout)),
        }
    }

    async fn on_change(
        &self,
        conn: &mut Connection,
        change: &SubscriptionChange,
    ) -> Result<(), SessionExit> {
        if change.generation <= conn.synced_generation {
            tracing::trace!(generation = change.generation, "Change already applied by reconciliation");
            return Ok(());
        }

        let snapshot = self.registry.snapshot();
        match self.protocol.change_request(change, &snapshot) {
            Ok(Some(frame)) => {
                tracing::debug!(
                    action = change.action.as_str(),
                    channel = %change.channel,
                    symbols = change.symbols.len(),
                    "Sending subscription change"
                );
                conn.sink
                    .send(Frame::Text(frame))
                    .await
                    .map_err(|e| conn.lost(e.into()))
            }
            Ok(None) => Ok(()),
            Err(e) => Err(conn.lost(ConnectionError::Encode(e.to_string()))),
        }
    }

    async fn on_frame(&self, conn: &mut Connection, frame: Frame) -> Result<(), SessionExit> {
        let flavor = self.flavor();
        conn.liveness.record_activity();

        let decoded = match frame {
            Frame::Text(text) => self.codec.decode(&text),
            Frame::Binary(bytes) => self.codec.decode_bytes(&bytes),
            Frame::Ping(payload) => {
                return conn
                    .sink
                    .send(Frame::Pong(payload))
                    .await
                    .map_err(|e| conn.lost(e.into()));
            }
            Frame::Pong(_) => return Ok(()),
            Frame::Close(reason) => return Err(conn.lost(ConnectionError::ServerClosed(reason))),
        };
        metrics::record_frame_received(flavor);

        let messages = match decoded {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                metrics::record_decode_failure(flavor);
                return Ok(());
            }
        };

        for message in messages {
            self.on_message(conn, message).await?;
        }
        Ok(())
    }

    async fn on_message(&self, conn: &mut Connection, message: Inbound) -> Result<(), SessionExit> {
        let flavor = self.flavor();

        if let Inbound::Error(err) = &message {
            metrics::record_server_error(flavor, err.code);
        }

        match conn.phase {
            Phase::AwaitingAuth { .. } => match conn.handshake.on_message(&message) {
                AuthOutcome::Pending => Ok(()),
                AuthOutcome::Accepted => self.on_authenticated(conn).await,
                AuthOutcome::Failed(error) if error.is_terminal() => Err(SessionExit::Rejected(error)),
                AuthOutcome::Failed(error) => Err(conn.lost(ConnectionError::Auth(error))),
                AuthOutcome::OutOfOrder => {
                    tracing::warn!("Message received before authentication, dropping");
                    metrics::record_protocol_violation(flavor);
                    Ok(())
                }
            },
            Phase::AwaitingAck { .. } => match message {
                Inbound::Subscribed(ack) => {
                    self.events.deliver(StreamEvent::Subscription(ack)).await;
                    self.enter_streaming(conn).await;
                    Ok(())
                }
                Inbound::Error(err) => {
                    self.deliver_server_error(&err.msg, err.code).await;
                    self.enter_streaming(conn).await;
                    Ok(())
                }
                other => self.on_streaming_message(other).await,
            },
            Phase::Streaming { .. } => self.on_streaming_message(message).await,
        }
    }

    async fn on_streaming_message(&self, message: Inbound) -> Result<(), SessionExit> {
        match message {
            Inbound::Event(event) => {
                self.events.deliver(event).await;
            }
            Inbound::Subscribed(ack) => {
                self.events.deliver(StreamEvent::Subscription(ack)).await;
            }
            Inbound::Error(err) => {
                self.deliver_server_error(&err.msg, err.code).await;
            }
            Inbound::Connected | Inbound::Authenticated => {
                tracing::debug!("Ignoring repeated handshake message");
            }
            Inbound::Unauthorized(status) => {
                tracing::warn!(status = %status, "Unexpected authorization message while streaming");
            }
        }
        Ok(())
    }

    async fn on_authenticated(&self, conn: &mut Connection) -> Result<(), SessionExit> {
        tracing::info!(connection_id = %conn.id, "Authenticated");
        self.transition(ConnectionState::Authenticated).await;
        self.events.deliver(StreamEvent::Authorized).await;

        let snapshot = self.registry.snapshot();
        conn.synced_generation = snapshot.generation();

        let frame = self
            .protocol
            .reconcile_request(&snapshot)
            .map_err(|e| conn.lost(ConnectionError::Encode(e.to_string())))?;

        tracing::info!(subscriptions = snapshot.len(), "Replaying subscriptions");
        conn.sink
            .send(Frame::Text(frame))
            .await
            .map_err(|e| conn.lost(e.into()))?;

        if self.protocol.awaits_reconcile_ack() {
            conn.phase = Phase::AwaitingAck {
                deadline: Instant::now() + self.settings.auth_timeout,
            };
        } else {
            self.enter_streaming(conn).await;
        }
        Ok(())
    }

    async fn enter_streaming(&self, conn: &mut Connection) {
        conn.phase = Phase::Streaming {
            since: Instant::now(),
        };
        self.transition(ConnectionState::Streaming).await;
    }

    async fn deliver_server_error(&self, message: &str, code: i32) {
        tracing::warn!(code, msg = %message, "Server reported an error");
        self.events
            .deliver(StreamEvent::Error(StreamErrorEvent::from_server(code, message)))
            .await;
    }

    /// Move to `next` if the state machine allows it, publish it and queue
    /// it for listeners.
    async fn transition(&self, next: ConnectionState) {
        let current = *self.state.borrow();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(
                from = current.as_str(),
                to = next.as_str(),
                "Ignoring invalid state transition"
            );
            return;
        }

        tracing::debug!(from = current.as_str(), to = next.as_str(), "State transition");
        self.state.send_replace(next);
        metrics::set_streaming(self.flavor(), next == ConnectionState::Streaming);
        self.events.deliver(StreamEvent::Connection(next)).await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

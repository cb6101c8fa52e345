//! Shared helpers for session integration tests.
//!
//! [`MockConnector`] hands out in-memory connections. Each connection the
//! session opens shows up on the paired [`MockServer`] as a
//! [`MockConnection`] that records outbound frames and injects inbound ones.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alpaca_streaming::{
    AlpacaStreams, ConnectionState, Credentials, Frame, FrameSink, FrameStream, SessionSettings,
    StreamConnector, StreamEvent, StreamSession, TransportError,
};
use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// How long helpers wait before failing a test.
pub const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Connector
// =============================================================================

/// In-memory [`StreamConnector`].
#[derive(Debug)]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<MockConnection>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockConnector {
    /// Fail the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (sent_tx, sent_rx) = futures_mpsc::unbounded::<Frame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Result<Frame, TransportError>>();

        let sink: FrameSink = Box::pin(sent_tx.sink_map_err(|_| TransportError::Closed));
        let stream: FrameStream = UnboundedReceiverStream::new(inbound_rx).boxed();

        let connection = MockConnection {
            url: url.to_string(),
            sent: sent_rx,
            inbound: Some(inbound_tx),
        };
        self.accepted
            .send(connection)
            .map_err(|_| TransportError::Connect {
                url: url.to_string(),
                reason: "mock server gone".to_string(),
            })?;
        Ok((sink, stream))
    }
}

/// Receiving side of a [`MockConnector`].
pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockServer {
    /// Wait for the session to open its next connection.
    pub async fn accept(&mut self) -> MockConnection {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Whether another connection was opened within `window`.
    pub async fn accepts_within(&mut self, window: Duration) -> bool {
        timeout(window, self.accepted.recv()).await.is_ok()
    }
}

/// Create a connector and its server side.
pub fn mock_transport() -> (Arc<MockConnector>, MockServer) {
    let (accepted, accepted_rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        accepted,
        failures: AtomicUsize::new(0),
        attempts: AtomicUsize::new(0),
    });
    (connector, MockServer { accepted: accepted_rx })
}

// =============================================================================
// Connection
// =============================================================================

/// Server end of one in-memory connection.
pub struct MockConnection {
    /// URL the session dialed.
    pub url: String,
    sent: futures_mpsc::UnboundedReceiver<Frame>,
    inbound: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
}

impl MockConnection {
    /// Next frame the session sent, control frames included.
    pub async fn next_frame(&mut self) -> Frame {
        timeout(WAIT, self.sent.next())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("session closed the connection")
    }

    /// Next text frame the session sent, skipping control frames.
    pub async fn next_text(&mut self) -> String {
        loop {
            let frame = timeout(WAIT, self.sent.next())
                .await
                .expect("timed out waiting for an outbound frame")
                .expect("session closed the connection");
            if let Frame::Text(text) = frame {
                return text;
            }
        }
    }

    /// Next text frame parsed as JSON.
    pub async fn next_json(&mut self) -> serde_json::Value {
        serde_json::from_str(&self.next_text().await).unwrap()
    }

    /// Whether the session sent a text frame within `window`.
    pub async fn sends_text_within(&mut self, window: Duration) -> Option<String> {
        timeout(window, self.next_text_raw()).await.ok().flatten()
    }

    async fn next_text_raw(&mut self) -> Option<String> {
        while let Some(frame) = self.sent.next().await {
            if let Frame::Text(text) = frame {
                return Some(text);
            }
        }
        None
    }

    /// Inject a text frame.
    pub fn push_text(&self, text: &str) {
        self.push(Frame::Text(text.to_string()));
    }

    /// Inject a binary frame.
    pub fn push_binary(&self, text: &str) {
        self.push(Frame::Binary(text.as_bytes().to_vec()));
    }

    /// Inject any frame.
    pub fn push(&self, frame: Frame) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Ok(frame));
        }
    }

    /// End the inbound stream as if the server went away.
    pub fn drop_connection(&mut self) {
        self.inbound = None;
    }

    /// Read the market data auth frame and accept it.
    pub async fn accept_market_auth(&mut self) -> serde_json::Value {
        self.push_text(r#"[{"T":"success","msg":"connected"}]"#);
        let auth = self.next_json().await;
        assert_eq!(auth["action"], "auth");
        self.push_text(r#"[{"T":"success","msg":"authenticated"}]"#);
        auth
    }

    /// Read the account auth frame and accept it.
    pub async fn accept_account_auth(&mut self) -> serde_json::Value {
        let auth = self.next_json().await;
        assert!(auth["action"] == "auth" || auth["action"] == "authenticate");
        self.push_binary(
            r#"{"stream":"authorization","data":{"status":"authorized","action":"authenticate"}}"#,
        );
        auth
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Settings with short timeouts and no heartbeat.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        auth_timeout: Duration::from_millis(300),
        heartbeat_interval: Duration::ZERO,
        reconnect_delay_initial: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(50),
        reconnect_jitter: 0.0,
        ..SessionSettings::default()
    }
}

/// Session factory wired to `connector`.
pub fn streams(connector: Arc<MockConnector>) -> AlpacaStreams {
    AlpacaStreams::new(Credentials::key_pair("test-key", "test-secret").unwrap())
        .with_settings(fast_settings())
        .with_connector(connector)
}

/// Wait until the session reaches `state`.
pub async fn wait_for_state(session: &StreamSession, state: ConnectionState) {
    let mut changes = session.state_changes();
    timeout(WAIT, changes.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, at {}", session.state()))
        .expect("state channel closed");
}

/// Poll `condition` until it holds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Collects every event delivered to a session.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl Recorder {
    /// Register for every category on `session`.
    pub fn attach(session: &StreamSession) -> Self {
        let recorder = Self::default();
        for category in alpaca_streaming::EventCategory::all() {
            let events = Arc::clone(&recorder.events);
            session
                .on_event(*category, move |event| events.lock().push(event.clone()))
                .unwrap();
        }
        recorder
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    /// Recorded connection states, in order.
    pub fn states(&self) -> Vec<ConnectionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Connection(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Count of events matching `predicate`.
    pub fn count<F: Fn(&StreamEvent) -> bool>(&self, predicate: F) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

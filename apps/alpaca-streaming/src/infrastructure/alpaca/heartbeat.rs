//! Heartbeat Manager
//!
//! Watches connection liveness with periodic pings. Any inbound frame
//! counts as activity, so a busy stream never needs a pong. When a ping
//! goes unanswered and the connection stays silent past the timeout, the
//! manager reports [`HeartbeatEvent::Timeout`] and the connection is
//! treated as lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages. Zero disables the heartbeat.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Whether pings are sent at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping frame.
    SendPing,
    /// No activity since the last ping; the connection should be dropped.
    Timeout,
}

/// Liveness state shared between the heartbeat manager and the read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
    waiting_for_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            waiting_for_pong: AtomicBool::new(false),
        }
    }

    /// Record that a frame (of any kind) arrived.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping went out.
    pub fn mark_ping_sent(&self) {
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Check if a ping is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Heartbeat manager that monitors one connection.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Spawn a manager for a new connection and return its event stream.
    ///
    /// With a disabled config no task is spawned and the receiver never
    /// yields. Cancelling `cancel` stops the task.
    #[must_use]
    pub fn spawn(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<HeartbeatEvent> {
        let (event_tx, event_rx) = mpsc::channel(4);
        if config.is_enabled() {
            tokio::spawn(Self::new(config, state, event_tx, cancel).run());
        } else {
            // Keep the channel open so the receiver pends instead of closing.
            tokio::spawn(async move {
                cancel.cancelled().await;
                drop(event_tx);
            });
        }
        event_rx
    }

    /// Run the heartbeat monitoring loop until cancelled or timed out.
    pub async fn run(self) {
        if !self.config.is_enabled() {
            return;
        }

        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check liveness and request a ping.
    ///
    /// Returns `Err(())` if a timeout occurred and the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        if self.state.is_waiting_for_pong() {
            let elapsed = self.state.time_since_activity();
            if elapsed > self.config.pong_timeout {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis(),
                    timeout_ms = self.config.pong_timeout.as_millis(),
                    "Heartbeat timeout detected"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return Err(());
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }
        self.state.mark_ping_sent();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.pong_timeout, Duration::from_secs(20));
        assert!(config.is_enabled());
        assert!(!HeartbeatConfig::new(Duration::ZERO, Duration::from_secs(1)).is_enabled());
    }

    #[test]
    fn activity_clears_outstanding_ping() {
        let state = HeartbeatState::new();
        state.mark_ping_sent();
        assert!(state.is_waiting_for_pong());

        state.record_activity();
        assert!(!state.is_waiting_for_pong());
        assert!(state.time_since_activity() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn manager_sends_ping_events() {
        let config = HeartbeatConfig::new(Duration::from_millis(50), Duration::from_secs(1));
        let state = Arc::new(HeartbeatState::new());
        let cancel = CancellationToken::new();

        let mut events = HeartbeatManager::spawn(config, Arc::clone(&state), cancel.clone());

        let event = tokio::time::timeout(Duration::from_millis(500), events.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");

        assert_eq!(event, HeartbeatEvent::SendPing);
        assert!(state.is_waiting_for_pong());
        cancel.cancel();
    }

    #[tokio::test]
    async fn manager_detects_silence() {
        let config = HeartbeatConfig::new(Duration::from_millis(30), Duration::from_millis(50));
        let state = Arc::new(HeartbeatState::new());
        let cancel = CancellationToken::new();

        let mut events = HeartbeatManager::spawn(config, state, cancel.clone());

        let mut received_timeout = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), events.recv()).await
        {
            if event == HeartbeatEvent::Timeout {
                received_timeout = true;
                break;
            }
        }

        assert!(received_timeout, "should receive timeout event");
        cancel.cancel();
    }

    #[tokio::test]
    async fn disabled_manager_stays_silent() {
        let config = HeartbeatConfig::new(Duration::ZERO, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let mut events = HeartbeatManager::spawn(config, Arc::new(HeartbeatState::new()), cancel.clone());

        let result = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(result.is_err(), "disabled heartbeat must not emit");

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert_eq!(closed.ok().flatten(), None);
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(10));
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager =
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}

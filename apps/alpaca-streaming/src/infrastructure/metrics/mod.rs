//! Prometheus Metrics Module
//!
//! Session-level counters and gauges, recorded through the `metrics` facade.
//! Without an installed recorder every call is a no-op, so the library can
//! record unconditionally; binaries opt in with [`init_metrics`].
//!
//! # Metrics Categories
//!
//! - **Frames**: frames received, decode failures, protocol violations
//! - **Dispatch**: events dropped for slow listeners, listener panics, detached workers
//! - **Connections**: streaming gauge, reconnects, backoff delays

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{EventCategory, StreamFlavor};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe every metric.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "alpaca_stream_frames_received_total",
        "Frames received from Alpaca stream connections"
    );
    describe_counter!(
        "alpaca_stream_decode_failures_total",
        "Frames or frame elements that could not be decoded"
    );
    describe_counter!(
        "alpaca_stream_protocol_violations_total",
        "Frames received out of order and dropped"
    );
    describe_counter!(
        "alpaca_stream_events_dropped_total",
        "Events dropped because listeners did not keep up"
    );
    describe_counter!(
        "alpaca_stream_listener_panics_total",
        "Listener callbacks that panicked"
    );
    describe_counter!(
        "alpaca_stream_dispatch_workers_detached_total",
        "Dispatch workers left running at disconnect because a listener was stuck"
    );
    describe_counter!(
        "alpaca_stream_server_errors_total",
        "Error frames reported by the server"
    );
    describe_counter!(
        "alpaca_stream_reconnects_total",
        "Reconnection attempts after a lost connection"
    );
    describe_gauge!(
        "alpaca_stream_streaming",
        "1 while the session is streaming, 0 otherwise"
    );
    describe_histogram!(
        "alpaca_stream_backoff_seconds",
        "Delay before each reconnection attempt"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received on a session.
pub fn record_frame_received(flavor: StreamFlavor) {
    counter!("alpaca_stream_frames_received_total", "flavor" => flavor.as_str()).increment(1);
}

/// Record a frame (or array element) that failed to decode.
pub fn record_decode_failure(flavor: StreamFlavor) {
    counter!("alpaca_stream_decode_failures_total", "flavor" => flavor.as_str()).increment(1);
}

/// Record a message received before the handshake completed.
pub fn record_protocol_violation(flavor: StreamFlavor) {
    counter!("alpaca_stream_protocol_violations_total", "flavor" => flavor.as_str()).increment(1);
}

/// Record an event dropped because the dispatch queue stayed full.
pub fn record_event_dropped(flavor: StreamFlavor, category: EventCategory) {
    counter!(
        "alpaca_stream_events_dropped_total",
        "flavor" => flavor.as_str(),
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a listener callback panic.
pub fn record_listener_panic(flavor: StreamFlavor, category: EventCategory) {
    counter!(
        "alpaca_stream_listener_panics_total",
        "flavor" => flavor.as_str(),
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a dispatch worker detached at disconnect.
pub fn record_dispatch_worker_detached(flavor: StreamFlavor) {
    counter!("alpaca_stream_dispatch_workers_detached_total", "flavor" => flavor.as_str())
        .increment(1);
}

/// Record a server error frame.
pub fn record_server_error(flavor: StreamFlavor, code: i32) {
    counter!(
        "alpaca_stream_server_errors_total",
        "flavor" => flavor.as_str(),
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record a reconnection attempt and the delay preceding it.
pub fn record_reconnect(flavor: StreamFlavor, delay: Duration) {
    counter!("alpaca_stream_reconnects_total", "flavor" => flavor.as_str()).increment(1);
    histogram!("alpaca_stream_backoff_seconds", "flavor" => flavor.as_str())
        .record(delay.as_secs_f64());
}

/// Flag whether a session is currently streaming.
pub fn set_streaming(flavor: StreamFlavor, streaming: bool) {
    gauge!("alpaca_stream_streaming", "flavor" => flavor.as_str())
        .set(if streaming { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

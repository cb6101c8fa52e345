//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the port the connection manager opens sockets
//! through and the listener dispatch service that fans decoded events out
//! to caller callbacks.

/// Port interfaces for external systems (WebSocket transport).
pub mod ports;

/// Application services (listener dispatch).
pub mod services;

//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the stream vocabulary (flavors, channels, connection
//! states, decoded events) and the desired-subscription registry. All types
//! here are pure Rust with serialization support and know nothing about
//! sockets.

/// Stream flavors, channels, connection states and decoded events.
pub mod streaming;

/// Desired subscription state shared between callers and the connection.
pub mod subscription;

//! Configuration Module
//!
//! Environment-driven configuration for streaming sessions.

mod settings;

pub use settings::{
    ConfigError, DataFeed, Environment, SessionSettings, StreamEndpoints, StreamsConfig,
};

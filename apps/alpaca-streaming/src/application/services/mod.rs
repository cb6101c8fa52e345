//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ListenerDispatcher`: per-category callback registry and fan-out
//! - `DispatchQueue`: bounded hand-off from a read loop to a dispatch worker
//! - `DispatchWorker`: bounded join of that worker thread

mod dispatcher;

pub use dispatcher::{DispatchQueue, DispatchWorker, Listener, ListenerDispatcher};

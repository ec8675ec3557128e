//! rustfwd Library
//!
//! A lightweight TCP and UDP port forwarder. A static set of forwarding
//! rules is loaded once at startup; the dispatcher runs one independent
//! relay per rule until the process is asked to stop.

pub mod config;
pub mod dispatcher;
pub mod relay;
pub mod shutdown;

pub use config::{Config, Protocol, Rule};
pub use dispatcher::RuleDispatcher;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the forwarder
pub type Result<T> = anyhow::Result<T>;

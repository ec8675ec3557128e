//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main configuration structure
///
/// Immutable after load; the engine never mutates it. An empty rule list is
/// accepted here so tests can build partial configs, but the dispatcher
/// treats it as a startup-fatal condition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Enables verbose relay-level logging (accepted connections,
    /// session lifecycle, per-error detail).
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One forwarding directive: local listening port to remote target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rule {
    pub local_port: u16,
    pub remote_port: u16,
    /// Resolved at dial time, not at load time.
    pub remote_host: String,
    pub protocol: Protocol,
}

/// Transport protocol a rule forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Rule {
    /// Remote target in `ToSocketAddrs` form for dialing.
    pub fn remote_target(&self) -> (&str, u16) {
        (self.remote_host.as_str(), self.remote_port)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} :{} -> {}:{}",
            self.protocol, self.local_port, self.remote_host, self.remote_port
        )
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

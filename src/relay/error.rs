//! Relay Error Taxonomy
//!
//! Rule-fatal and connection-local failures are distinguished at the point
//! of handling: bind failures kill their own rule, dial failures drop a
//! single connection or datagram, and mid-relay I/O errors tear down just
//! the affected connection or session.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Ports below this require elevated bind permission on the host.
const PRIVILEGED_PORT_MAX: u16 = 1024;

/// Errors produced by the forwarding engine
#[derive(Debug, Error)]
pub enum RelayError {
    /// The local listening port could not be claimed. Fatal for the rule.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The remote target could not be reached. Local to one connection or
    /// one UDP session.
    #[error("failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The listening socket itself failed mid-operation. Fatal for the rule.
    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        RelayError::Bind { addr, source }
    }

    pub fn dial(host: &str, port: u16, source: io::Error) -> Self {
        RelayError::Dial {
            target: format!("{}:{}", host, port),
            source,
        }
    }

    /// Operator guidance when a bind on a privileged port was refused.
    ///
    /// Returns `Some` only for permission-denied bind failures on ports
    /// below 1024; callers are expected to log the hint next to the error.
    pub fn privileged_port_hint(&self) -> Option<String> {
        match self {
            RelayError::Bind { addr, source }
                if addr.port() < PRIVILEGED_PORT_MAX
                    && source.kind() == io::ErrorKind::PermissionDenied =>
            {
                Some(format!(
                    "port {} is privileged; run as root or grant the binary CAP_NET_BIND_SERVICE",
                    addr.port()
                ))
            }
            _ => None,
        }
    }
}

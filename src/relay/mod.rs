//! Forwarding Relays
//!
//! One relay services one rule: the TCP relay pipes bytes between accepted
//! connections and freshly dialed target connections; the UDP relay
//! demultiplexes inbound datagrams into per-client sessions.

pub mod error;
pub mod session;
pub mod tcp;
pub mod udp;

pub use error::RelayError;
pub use session::{SessionTable, UdpSession};
pub use tcp::TcpRelay;
pub use udp::UdpRelay;

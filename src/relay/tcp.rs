//! TCP Relay
//!
//! Binds one listening socket per rule and pipes bytes between each
//! accepted connection and a freshly dialed target connection. Every
//! accepted connection is independent: an error or slow peer on one never
//! blocks or aborts another on the same listener.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::RelayError;
use crate::config::Rule;

/// Services one TCP forwarding rule
pub struct TcpRelay {
    rule: Rule,
}

impl TcpRelay {
    pub fn new(rule: Rule) -> Self {
        Self { rule }
    }

    /// Run the relay until shutdown or an unrecoverable listener error.
    ///
    /// Bind failure is fatal for this rule only; the caller logs it (with
    /// the privileged-port hint when applicable) and leaves other rules
    /// running.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), RelayError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.rule.local_port));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RelayError::bind(bind_addr, e))?;

        info!("TCP relay listening on {} ({})", bind_addr, self.rule);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((client, peer)) => {
                            debug!("Accepted connection from {} on :{}", peer, self.rule.local_port);
                            let rule = self.rule.clone();
                            tokio::spawn(async move {
                                handle_connection(rule, client, peer).await;
                            });
                        }
                        Err(e) if accept_error_is_transient(&e) => {
                            warn!("Transient accept error on :{}: {}", self.rule.local_port, e);
                        }
                        Err(e) => {
                            error!("Listener on :{} failed: {}", self.rule.local_port, e);
                            return Err(RelayError::Io(e));
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("TCP relay on :{} shutting down", self.rule.local_port);
                    return Ok(());
                }
            }
        }
    }
}

/// Relay one accepted connection to the rule's target.
///
/// Dial failure closes the accepted connection and never touches the
/// listener. On success the two directions copy independently and are
/// joined before both sockets are released.
async fn handle_connection(rule: Rule, client: TcpStream, peer: SocketAddr) {
    let (host, port) = rule.remote_target();
    let target = match TcpStream::connect((host, port)).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                "Dropping connection from {}: {}",
                peer,
                RelayError::dial(host, port, e)
            );
            return;
        }
    };

    debug!("Relaying {} <-> {}:{}", peer, host, port);

    let (client_read, client_write) = client.into_split();
    let (target_read, target_write) = target.into_split();

    // Two independent directional copies; a failure in one direction must
    // not cut short data still draining in the other.
    let upstream = tokio::spawn(copy_then_close(client_read, target_write));
    let downstream = tokio::spawn(copy_then_close(target_read, client_write));

    let (up, down) = tokio::join!(upstream, downstream);
    let bytes_up = summarize_direction(up, peer, "client->target");
    let bytes_down = summarize_direction(down, peer, "target->client");

    debug!(
        "Connection from {} closed ({} bytes up, {} bytes down)",
        peer, bytes_up, bytes_down
    );
}

/// Copy until the source closes or errors, then half-close the write side
/// so the peer observes end-of-stream for this direction only.
async fn copy_then_close(mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf) -> io::Result<u64> {
    let copied = tokio::io::copy(&mut reader, &mut writer).await;
    let _ = writer.shutdown().await;
    copied
}

fn summarize_direction(
    result: Result<io::Result<u64>, tokio::task::JoinError>,
    peer: SocketAddr,
    direction: &str,
) -> u64 {
    match result {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            debug!("Relay {} for {} ended with error: {}", direction, peer, e);
            0
        }
        Err(e) => {
            warn!("Relay {} task for {} failed: {}", direction, peer, e);
            0
        }
    }
}

/// Accept errors caused by the remote end are transient; anything touching
/// the listening socket itself is not.
fn accept_error_is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_accept_error_classification() {
        let transient = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(accept_error_is_transient(&transient));

        let fatal = io::Error::new(io::ErrorKind::NotConnected, "listener gone");
        assert!(!accept_error_is_transient(&fatal));
    }
}

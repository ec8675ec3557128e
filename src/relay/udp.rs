//! UDP Relay
//!
//! Binds one UDP socket per rule and demultiplexes inbound datagrams into
//! per-client sessions. Each session owns a socket connected to the rule's
//! target and a reply task forwarding target replies back to the client; a
//! periodic reaper evicts sessions that have gone idle.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::session::{alloc_session_id, SessionTable, UdpSession};
use super::RelayError;
use crate::config::Rule;

/// Cadence of the idle-session reaper.
const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Sessions with no inbound datagram for longer than this are evicted on
/// the next reaper tick.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65535;

/// Services one UDP forwarding rule
pub struct UdpRelay {
    rule: Rule,
    reap_interval: Duration,
    idle_timeout: Duration,
    sessions: SessionTable,
}

impl UdpRelay {
    pub fn new(rule: Rule) -> Self {
        Self::with_timeouts(rule, REAP_INTERVAL, IDLE_TIMEOUT)
    }

    /// Create a relay with custom reaper timings. Production code uses the
    /// fixed defaults; tests shorten them to exercise eviction.
    pub fn with_timeouts(rule: Rule, reap_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            rule,
            reap_interval,
            idle_timeout,
            sessions: SessionTable::new(),
        }
    }

    /// Run the relay until shutdown or a fatal error on the listening
    /// socket. All live sessions are torn down before returning.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), RelayError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.rule.local_port));
        let listener = match UdpSocket::bind(bind_addr).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => return Err(RelayError::bind(bind_addr, e)),
        };

        info!("UDP relay listening on {} ({})", bind_addr, self.rule);

        let mut reap_timer = tokio::time::interval(self.reap_interval);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                recv_result = listener.recv_from(&mut buf) => {
                    match recv_result {
                        Ok((len, client)) => {
                            self.handle_datagram(&listener, client, &buf[..len]).await;
                        }
                        Err(e) => {
                            error!("UDP listener on :{} failed: {}", self.rule.local_port, e);
                            self.teardown_all();
                            return Err(RelayError::Io(e));
                        }
                    }
                }
                _ = reap_timer.tick() => {
                    self.reap_idle_sessions();
                }
                _ = shutdown_rx.recv() => {
                    info!("UDP relay on :{} shutting down", self.rule.local_port);
                    self.teardown_all();
                    return Ok(());
                }
            }
        }
    }

    /// Forward one inbound datagram through the client's session, creating
    /// the session first if this is a new client address.
    ///
    /// Lookup-or-create is atomic per client address: this method is only
    /// called from the single receive loop, and the table lock covers the
    /// timestamp refresh.
    async fn handle_datagram(&self, listener: &Arc<UdpSocket>, client: SocketAddr, payload: &[u8]) {
        let outbound = match self.sessions.touch(&client) {
            Some(socket) => socket,
            None => match self.create_session(listener, client).await {
                Ok(socket) => socket,
                Err(e) => {
                    warn!("Rejecting datagram from {}: {}", client, e);
                    return;
                }
            },
        };

        if let Err(e) = outbound.send(payload).await {
            warn!("Failed to forward datagram from {}: {}", client, e);
        }
    }

    /// Dial a new outbound socket for a client and start its reply task.
    async fn create_session(
        &self,
        listener: &Arc<UdpSocket>,
        client: SocketAddr,
    ) -> Result<Arc<UdpSocket>, RelayError> {
        let (host, port) = self.rule.remote_target();

        let outbound = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| RelayError::dial(host, port, e))?;
        outbound
            .connect((host, port))
            .await
            .map_err(|e| RelayError::dial(host, port, e))?;
        let outbound = Arc::new(outbound);

        let id = alloc_session_id();
        let reply_task = tokio::spawn(reply_loop(
            id,
            Arc::clone(&outbound),
            Arc::clone(listener),
            client,
            self.sessions.clone(),
        ));

        self.sessions
            .insert(client, UdpSession::new(id, Arc::clone(&outbound), reply_task));

        info!(
            "Created UDP session {} for {} ({}), {} active",
            id,
            client,
            self.rule,
            self.sessions.len()
        );

        Ok(outbound)
    }

    /// Evict every session idle longer than the threshold.
    fn reap_idle_sessions(&self) {
        for (client, session) in self.sessions.evict_idle(self.idle_timeout) {
            info!(
                "UDP session {} for {} expired after {:?} idle",
                session.id, client, self.idle_timeout
            );
            session.close();
        }
    }

    /// Cancel every live session. Used on shutdown and fatal listener
    /// errors.
    fn teardown_all(&self) {
        let drained = self.sessions.drain();
        if !drained.is_empty() {
            info!(
                "Tearing down {} UDP sessions on :{}",
                drained.len(),
                self.rule.local_port
            );
        }
        for (_, session) in drained {
            session.close();
        }
    }
}

/// Forward target replies back to the original client via the rule's
/// listening socket. Exits when the outbound socket errors or is closed,
/// removing its own session from the table (id-checked, so a session that
/// was already evicted and replaced is left alone).
async fn reply_loop(
    id: u64,
    outbound: Arc<UdpSocket>,
    listener: Arc<UdpSocket>,
    client: SocketAddr,
    sessions: SessionTable,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        match outbound.recv(&mut buf).await {
            Ok(len) => {
                if let Err(e) = listener.send_to(&buf[..len], client).await {
                    debug!("Failed to send reply to {}: {}", client, e);
                }
            }
            Err(e) => {
                debug!("UDP session {} outbound socket closed: {}", id, e);
                break;
            }
        }
    }

    if sessions.remove_if(&client, id) {
        debug!("UDP session {} for {} removed itself", id, client);
    }
}

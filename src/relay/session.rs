//! UDP Session Table
//!
//! Maps a client address to its in-flight UDP conversation. Three writers
//! touch the table concurrently: the datagram-receiving path, the reaper,
//! and reply tasks removing themselves on target-socket errors. A single
//! mutex guards all of them, so the reaper's staleness check and the
//! datagram path's timestamp refresh are mutually consistent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::debug;

/// Process-wide counter distinguishing successive sessions for the same
/// client address.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the id a new session will carry. Taken before the reply task is
/// spawned so the task can identify its own table entry.
pub fn alloc_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One client's in-flight conversation through a UDP rule
#[derive(Debug)]
pub struct UdpSession {
    pub id: u64,
    /// Socket connected to the rule's remote target, exclusively owned by
    /// this session (the reply task holds the only other reference).
    pub outbound: Arc<UdpSocket>,
    /// Timestamp of the most recent inbound datagram from the client.
    pub last_seen: Instant,
    /// Reads target replies and forwards them to the client; aborted on
    /// eviction.
    reply_task: JoinHandle<()>,
}

impl UdpSession {
    pub fn new(id: u64, outbound: Arc<UdpSocket>, reply_task: JoinHandle<()>) -> Self {
        Self {
            id,
            outbound,
            last_seen: Instant::now(),
            reply_task,
        }
    }

    /// Cancel the reply task. Dropping the session afterwards releases the
    /// last references to the outbound socket, closing it.
    pub fn close(self) {
        self.reply_task.abort();
    }
}

/// Concurrently accessed mapping from client address to session
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<SocketAddr, UdpSession>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh `last_seen` for the client's session and return its outbound
    /// socket, or `None` if no session exists.
    pub fn touch(&self, client: &SocketAddr) -> Option<Arc<UdpSocket>> {
        let mut sessions = self.inner.lock().unwrap();
        sessions.get_mut(client).map(|session| {
            session.last_seen = Instant::now();
            Arc::clone(&session.outbound)
        })
    }

    /// Insert a freshly created session for a client address.
    ///
    /// Only the single datagram-receiving task inserts, which keeps
    /// lookup-or-create atomic per client address. A displaced session
    /// (possible only if the caller raced its own earlier insert) is closed.
    pub fn insert(&self, client: SocketAddr, session: UdpSession) {
        let displaced = {
            let mut sessions = self.inner.lock().unwrap();
            sessions.insert(client, session)
        };
        if let Some(old) = displaced {
            debug!("Displaced stale session {} for {}", old.id, client);
            old.close();
        }
    }

    /// Remove the client's session, but only if it still carries the given
    /// id. Used by reply tasks to remove themselves without clobbering a
    /// successor session created after a reaper eviction. Idempotent.
    pub fn remove_if(&self, client: &SocketAddr, id: u64) -> bool {
        let mut sessions = self.inner.lock().unwrap();
        match sessions.get(client) {
            Some(session) if session.id == id => {
                sessions.remove(client);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every session idle longer than `idle_timeout`.
    ///
    /// The staleness check happens under the same lock that guards
    /// `last_seen` updates, so a session refreshed by a concurrent datagram
    /// is never evicted.
    pub fn evict_idle(&self, idle_timeout: Duration) -> Vec<(SocketAddr, UdpSession)> {
        let mut sessions = self.inner.lock().unwrap();
        let expired: Vec<SocketAddr> = sessions
            .iter()
            .filter(|(_, session)| session.last_seen.elapsed() > idle_timeout)
            .map(|(addr, _)| *addr)
            .collect();

        expired
            .into_iter()
            .filter_map(|addr| sessions.remove(&addr).map(|session| (addr, session)))
            .collect()
    }

    /// Remove and return all sessions. Used on relay teardown.
    pub fn drain(&self) -> Vec<(SocketAddr, UdpSession)> {
        let mut sessions = self.inner.lock().unwrap();
        sessions.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

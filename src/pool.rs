//! Active/standby connection pool with failover promotion.
//!
//! The pool grows to the sizes requested by the current bonding mode using an
//! injected connection factory. Factory exhaustion (`None`) is expected, not
//! exceptional: growth simply stops. When an active connection fails, the
//! oldest standby is promoted so the active set keeps its size whenever
//! possible.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Capability: a low-level transport a pooled connection sends on.
#[async_trait]
pub trait PathTransport: Send + Sync {
    async fn send(&self, data: &[u8]) -> io::Result<usize>;
}

/// Capability: connection factory for the bonded group. `None` means the
/// platform cannot supply another connection right now.
pub type ConnectionFactory = Box<dyn Fn() -> Option<Arc<dyn PathTransport>> + Send + Sync>;

/// One pooled connection. Membership (active or standby) lives in the pool.
#[derive(Clone)]
pub struct PooledConnection {
    pub id: u64,
    pub transport: Arc<dyn PathTransport>,
    pub created_at: Instant,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

struct PoolState {
    active: Vec<PooledConnection>,
    standby: VecDeque<PooledConnection>,
}

/// Pool of active and standby connections for a bonded group.
///
/// A connection is a member of exactly one of {active, standby} or neither.
pub struct ConnectionPool {
    factory: ConnectionFactory,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            state: Mutex::new(PoolState {
                active: Vec::new(),
                standby: VecDeque::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Idempotently grow the active set to `min_active` and the standby set
    /// to `max_standby`. Stops without error when the factory is exhausted.
    pub fn maintain(&self, min_active: usize, max_standby: usize) {
        let mut state = self.state.lock().unwrap();

        while state.active.len() < min_active {
            let Some(conn) = self.create() else {
                warn!(
                    active = state.active.len(),
                    target = min_active,
                    "connection factory exhausted while growing active set"
                );
                return;
            };
            debug!(id = conn.id, "added active connection");
            state.active.push(conn);
        }

        while state.standby.len() < max_standby {
            let Some(conn) = self.create() else {
                warn!(
                    standby = state.standby.len(),
                    target = max_standby,
                    "connection factory exhausted while growing standby set"
                );
                return;
            };
            debug!(id = conn.id, "added standby connection");
            state.standby.push_back(conn);
        }
    }

    fn create(&self) -> Option<PooledConnection> {
        let transport = (self.factory)()?;
        Some(PooledConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            transport,
            created_at: Instant::now(),
        })
    }

    /// Remove a failed connection from whichever set holds it. A failed
    /// active connection is replaced by the oldest standby, if any.
    pub fn connection_failed(&self, id: u64) {
        let mut state = self.state.lock().unwrap();

        if let Some(index) = state.active.iter().position(|conn| conn.id == id) {
            state.active.remove(index);
            info!(id, "removed failed connection from active set");
            if let Some(standby) = state.standby.pop_front() {
                info!(id = standby.id, "promoted standby connection to active");
                state.active.push(standby);
            }
            return;
        }

        if let Some(index) = state.standby.iter().position(|conn| conn.id == id) {
            state.standby.remove(index);
            info!(id, "removed failed connection from standby set");
        }
    }

    /// Snapshot of the active set, in pool order (first is oldest).
    pub fn active_connections(&self) -> Vec<PooledConnection> {
        self.state.lock().unwrap().active.clone()
    }

    /// Snapshot of the standby set, oldest first.
    pub fn standby_connections(&self) -> Vec<PooledConnection> {
        self.state.lock().unwrap().standby.iter().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    /// Release every pooled connection.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.active.clear();
        state.standby.clear();
    }
}

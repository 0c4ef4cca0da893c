//! Priority-class traffic dispatch across pooled connections.
//!
//! Each priority class gets its own dispatch lane (channel + worker task) so
//! high-priority traffic is never queued behind low-priority traffic. Voice
//! and video are pinned to the first active connection; everything else picks
//! uniformly at random among the active set. Sends with no active connection
//! are dropped and reported, never retried here.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

use crate::error::BondError;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::types::{BondEvent, TrafficPriority};

/// Routes outbound payloads across the pool by priority class.
pub struct TrafficManager {
    pool: Arc<ConnectionPool>,
    lanes: HashMap<TrafficPriority, mpsc::UnboundedSender<Vec<u8>>>,
    events: mpsc::UnboundedSender<BondEvent>,
    stop: watch::Sender<bool>,
}

impl TrafficManager {
    /// Create the manager and spawn one dispatch worker per priority class.
    pub fn new(pool: Arc<ConnectionPool>, events: mpsc::UnboundedSender<BondEvent>) -> Self {
        let (stop, _) = watch::channel(false);
        let mut lanes = HashMap::new();

        for priority in TrafficPriority::all() {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.insert(priority, tx);
            Self::spawn_lane(priority, rx, pool.clone(), events.clone(), stop.subscribe());
        }

        Self {
            pool,
            lanes,
            events,
            stop,
        }
    }

    /// Queue a payload for dispatch on its priority lane.
    ///
    /// Fails immediately with [`BondError::NoActiveConnection`] when the
    /// active set is empty; the caller decides whether to retry.
    pub fn send(&self, payload: Vec<u8>, priority: TrafficPriority) -> Result<(), BondError> {
        if self.pool.active_count() == 0 {
            warn!(?priority, "dropping send, no active connection");
            let _ = self
                .events
                .send(BondEvent::Error(BondError::NoActiveConnection));
            return Err(BondError::NoActiveConnection);
        }

        if let Some(lane) = self.lanes.get(&priority) {
            let _ = lane.send(payload);
        }
        Ok(())
    }

    /// Cancel all lane workers.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    fn spawn_lane(
        priority: TrafficPriority,
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
        pool: Arc<ConnectionPool>,
        events: mpsc::UnboundedSender<BondEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    payload = rx.recv() => {
                        let Some(payload) = payload else { return };
                        let Some(conn) = select_connection(&pool, priority) else {
                            warn!(?priority, "active set drained before dispatch");
                            let _ = events.send(BondEvent::Error(BondError::NoActiveConnection));
                            continue;
                        };
                        if let Err(e) = conn.transport.send(&payload).await {
                            error!(?priority, id = conn.id, "send failed: {e}");
                            let _ = events
                                .send(BondEvent::Error(BondError::Transport(e.to_string())));
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }
}

/// Pick the connection for a priority class: real-time classes take the first
/// (best) active connection, the rest spread uniformly at random.
fn select_connection(pool: &ConnectionPool, priority: TrafficPriority) -> Option<PooledConnection> {
    let active = pool.active_connections();
    if active.is_empty() {
        return None;
    }
    if priority.is_realtime() {
        return active.into_iter().next();
    }
    let index = rand::rng().random_range(0..active.len());
    active.into_iter().nth(index)
}

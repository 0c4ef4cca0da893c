//! Per-interface managed connections with bounded retry.
//!
//! This module owns one logical transport connection per [`ConnectionType`]:
//!
//! - Enable/disable toggling with interface-availability checks
//! - Transport state tracking (connecting, ready, failed, cancelled)
//! - Automatic, silent reconnects up to a bound; exhaustion is terminal
//! - Status fan-out to the policy engine and the consumer event channel
//!
//! The per-type state machine is
//! `disabled -> connecting -> connected -> (failed -> connecting)* -> disabled`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::BondConfig;
use crate::monitor::{PathMonitor, PathUpdate};
use crate::types::{BondEvent, ConnectionStatus, ConnectionType};

/// State-change notification from a live transport connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportState {
    Connecting,
    Ready,
    Failed(String),
    Cancelled,
}

/// Handle to one live transport connection. Dropping the handle does not
/// tear the transport down; `cancel` does.
pub trait TransportHandle: Send + Sync {
    fn cancel(&self);
}

/// Capability: transport connection factory supplied by the platform.
///
/// Returns `None` when no transport can be created for the given type. The
/// receiver yields the connection's state changes in order.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        connection_type: ConnectionType,
    ) -> Option<(Box<dyn TransportHandle>, mpsc::Receiver<TransportState>)>;
}

struct ConnectionState {
    enabled: bool,
    retry_count: u32,
    handle: Option<Box<dyn TransportHandle>>,
    /// Bumped on every enable/disable so stale driver and retry tasks
    /// become no-ops instead of racing a newer connection.
    generation: u64,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            // All connection types start enabled, matching the toggle
            // semantics the UI expects.
            enabled: true,
            retry_count: 0,
            handle: None,
            generation: 0,
        }
    }
}

struct Inner {
    connector: Arc<dyn TransportConnector>,
    monitor: Arc<PathMonitor>,
    states: Mutex<HashMap<ConnectionType, ConnectionState>>,
    status_tx: mpsc::UnboundedSender<(ConnectionType, ConnectionStatus)>,
    events: mpsc::UnboundedSender<BondEvent>,
    max_retry_attempts: u32,
    retry_interval: Duration,
    hotspot_target: Mutex<Option<String>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

/// Owns the managed connections, one per connection type.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        monitor: Arc<PathMonitor>,
        status_tx: mpsc::UnboundedSender<(ConnectionType, ConnectionStatus)>,
        events: mpsc::UnboundedSender<BondEvent>,
        config: &BondConfig,
    ) -> Self {
        let states = ConnectionType::all()
            .into_iter()
            .map(|connection_type| (connection_type, ConnectionState::new()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                connector,
                monitor,
                states: Mutex::new(states),
                status_tx,
                events,
                max_retry_attempts: config.max_retry_attempts,
                retry_interval: config.retry_interval,
                hotspot_target: Mutex::new(None),
                stop: Mutex::new(None),
            }),
        }
    }

    /// Flip the enabled flag for a connection type.
    ///
    /// Newly enabled types open a transport connection if an interface is
    /// available, and report unsatisfied (without retrying) if not. Newly
    /// disabled types are cancelled immediately and their retry budget reset.
    pub async fn toggle_connection(&self, connection_type: ConnectionType) {
        self.apply_enabled(connection_type, None).await;
    }

    /// Set the enabled flag directly. Enabling an already-enabled type with
    /// no live transport re-opens it; disabling is idempotent.
    pub async fn set_enabled(&self, connection_type: ConnectionType, enabled: bool) {
        self.apply_enabled(connection_type, Some(enabled)).await;
    }

    /// `desired` of `None` flips the current flag. The read and the write
    /// share one critical section so concurrent toggles serialize.
    async fn apply_enabled(&self, connection_type: ConnectionType, desired: Option<bool>) {
        let generation = {
            let mut states = self.inner.states.lock().unwrap();
            let state = states.get_mut(&connection_type).expect("known type");
            let enabled = desired.unwrap_or(!state.enabled);
            if !enabled {
                if !state.enabled && state.handle.is_none() {
                    return;
                }
                info!(%connection_type, "disabling connection");
                state.enabled = false;
                state.generation += 1;
                state.retry_count = 0;
                if let Some(handle) = state.handle.take() {
                    handle.cancel();
                }
                drop(states);
                Inner::emit_status(&self.inner, connection_type, ConnectionStatus::Unsatisfied);
                return;
            }
            if state.enabled && state.handle.is_some() {
                return;
            }
            info!(%connection_type, "enabling connection");
            state.enabled = true;
            state.generation += 1;
            state.retry_count = 0;
            state.generation
        };

        if !self.inner.monitor.current_path().supports(connection_type) {
            warn!(%connection_type, "no available interface");
            Inner::emit_status(&self.inner, connection_type, ConnectionStatus::Unsatisfied);
            return;
        }
        Inner::open_connection(&self.inner, connection_type, generation).await;
    }

    /// The path monitor this manager checks availability against.
    pub fn monitor(&self) -> Arc<PathMonitor> {
        Arc::clone(&self.inner.monitor)
    }

    pub fn is_enabled(&self, connection_type: ConnectionType) -> bool {
        self.inner
            .states
            .lock()
            .unwrap()
            .get(&connection_type)
            .map(|state| state.enabled)
            .unwrap_or(false)
    }

    /// Connect to a named hotspot device. Pairing mechanics belong to the
    /// platform; this records the target and brings the hotspot type up.
    pub async fn connect_to_hotspot(&self, device_name: &str) {
        info!(device = device_name, "connecting to hotspot");
        *self.inner.hotspot_target.lock().unwrap() = Some(device_name.to_string());
        self.set_enabled(ConnectionType::Hotspot, true).await;
    }

    /// The hotspot device a connection was last requested for.
    pub fn hotspot_target(&self) -> Option<String> {
        self.inner.hotspot_target.lock().unwrap().clone()
    }

    /// Re-publish the discoverable hotspot device list to consumers.
    pub fn update_hotspot_devices(&self, devices: Vec<String>) {
        let _ = self.inner.events.send(BondEvent::HotspotDevices(devices));
    }

    /// Start consuming path updates from the monitor. Status for each type is
    /// the conjunction of interface availability and the enabled flag.
    pub fn start(&self, mut updates: mpsc::UnboundedReceiver<PathUpdate>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        if let Some(prev) = self.inner.stop.lock().unwrap().replace(stop_tx) {
            let _ = prev.send(true);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => {
                        let Some(update) = update else { return };
                        let enabled = inner
                            .states
                            .lock()
                            .unwrap()
                            .get(&update.connection_type)
                            .map(|state| state.enabled)
                            .unwrap_or(false);
                        let status = if enabled {
                            update.status
                        } else {
                            ConnectionStatus::Unsatisfied
                        };
                        Inner::emit_status(&inner, update.connection_type, status);
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Cancel the path-update consumer and every live transport handle.
    pub fn stop(&self) {
        if let Some(stop) = self.inner.stop.lock().unwrap().take() {
            let _ = stop.send(true);
        }
        self.teardown_all();
    }

    /// Cancel every live transport handle and invalidate in-flight retries.
    pub fn teardown_all(&self) {
        let mut states = self.inner.states.lock().unwrap();
        for state in states.values_mut() {
            state.generation += 1;
            state.retry_count = 0;
            if let Some(handle) = state.handle.take() {
                handle.cancel();
            }
        }
    }
}

impl Inner {
    fn emit_status(inner: &Arc<Inner>, connection_type: ConnectionType, status: ConnectionStatus) {
        debug!(%connection_type, ?status, "connection status");
        let _ = inner.status_tx.send((connection_type, status));
        let _ = inner.events.send(BondEvent::ConnectionStatus {
            connection_type,
            status,
        });
    }

    /// Open a new transport connection and spawn its state driver. A stale
    /// generation means the type was toggled while we were connecting.
    async fn open_connection(inner: &Arc<Inner>, connection_type: ConnectionType, generation: u64) {
        let Some((handle, states_rx)) = inner.connector.connect(connection_type).await else {
            warn!(%connection_type, "transport connector returned no connection");
            Inner::emit_status(inner, connection_type, ConnectionStatus::Unsatisfied);
            return;
        };

        {
            let mut states = inner.states.lock().unwrap();
            let state = states.get_mut(&connection_type).expect("known type");
            if state.generation != generation || !state.enabled {
                drop(states);
                handle.cancel();
                return;
            }
            if let Some(old) = state.handle.replace(handle) {
                old.cancel();
            }
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            Inner::drive_transport(inner, connection_type, generation, states_rx).await;
        });
    }

    async fn drive_transport(
        inner: Arc<Inner>,
        connection_type: ConnectionType,
        generation: u64,
        mut states_rx: mpsc::Receiver<TransportState>,
    ) {
        while let Some(transport_state) = states_rx.recv().await {
            {
                let states = inner.states.lock().unwrap();
                let state = states.get(&connection_type).expect("known type");
                if state.generation != generation {
                    return;
                }
            }
            match transport_state {
                TransportState::Connecting => {
                    Inner::emit_status(
                        &inner,
                        connection_type,
                        ConnectionStatus::RequiresConnection,
                    );
                }
                TransportState::Ready => {
                    inner
                        .states
                        .lock()
                        .unwrap()
                        .get_mut(&connection_type)
                        .expect("known type")
                        .retry_count = 0;
                    Inner::emit_status(&inner, connection_type, ConnectionStatus::Satisfied);
                }
                TransportState::Cancelled => {
                    Inner::emit_status(&inner, connection_type, ConnectionStatus::Unsatisfied);
                    return;
                }
                TransportState::Failed(reason) => {
                    Inner::handle_failure(&inner, connection_type, generation, reason);
                    return;
                }
            }
        }
    }

    /// Retry after a transport failure, or go terminal once the bound is hit.
    /// Retries are silent; exhaustion is surfaced as unsatisfied and stays
    /// that way until the next manual toggle.
    fn handle_failure(
        inner: &Arc<Inner>,
        connection_type: ConnectionType,
        generation: u64,
        reason: String,
    ) {
        let mut states = inner.states.lock().unwrap();
        let state = states.get_mut(&connection_type).expect("known type");
        if state.generation != generation || !state.enabled {
            return;
        }
        if let Some(handle) = state.handle.take() {
            handle.cancel();
        }

        if state.retry_count < inner.max_retry_attempts {
            state.retry_count += 1;
            let attempt = state.retry_count;
            drop(states);
            info!(%connection_type, attempt, %reason, "transport failed, scheduling retry");

            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.retry_interval).await;
                let still_current = {
                    let states = inner.states.lock().unwrap();
                    let state = states.get(&connection_type).expect("known type");
                    state.generation == generation && state.enabled
                };
                if still_current {
                    Inner::open_connection(&inner, connection_type, generation).await;
                }
            });
        } else {
            error!(%connection_type, %reason, "max retry attempts reached");
            state.enabled = false;
            state.generation += 1;
            drop(states);
            Inner::emit_status(inner, connection_type, ConnectionStatus::Unsatisfied);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{InterfaceInfo, PathProvider, PathSnapshot};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedPath(PathSnapshot);

    impl PathProvider for FixedPath {
        fn current_path(&self) -> PathSnapshot {
            self.0.clone()
        }
    }

    fn snapshot_with(types: &[ConnectionType]) -> PathSnapshot {
        PathSnapshot {
            status: ConnectionStatus::Satisfied,
            interfaces: types
                .iter()
                .map(|&connection_type| InterfaceInfo {
                    name: format!("{connection_type}0"),
                    connection_type,
                    is_expensive: false,
                    is_constrained: false,
                })
                .collect(),
        }
    }

    struct NoopHandle;

    impl TransportHandle for NoopHandle {
        fn cancel(&self) {}
    }

    /// Connector that immediately reports the scripted states for every
    /// connection attempt and counts attempts.
    struct ScriptedConnector {
        states: Vec<TransportState>,
        attempts: AtomicU32,
    }

    impl ScriptedConnector {
        fn new(states: Vec<TransportState>) -> Self {
            Self {
                states,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TransportConnector for ScriptedConnector {
        async fn connect(
            &self,
            _connection_type: ConnectionType,
        ) -> Option<(Box<dyn TransportHandle>, mpsc::Receiver<TransportState>)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(8);
            for state in self.states.clone() {
                tx.try_send(state).unwrap();
            }
            tokio::spawn(async move {
                // Keep the sender alive briefly so the driver drains it.
                tokio::time::sleep(Duration::from_millis(10)).await;
                drop(tx);
            });
            Some((Box::new(NoopHandle), rx))
        }
    }

    struct Harness {
        manager: ConnectionManager,
        connector: Arc<ScriptedConnector>,
        status_rx: mpsc::UnboundedReceiver<(ConnectionType, ConnectionStatus)>,
    }

    fn harness(states: Vec<TransportState>, available: &[ConnectionType]) -> Harness {
        let connector = Arc::new(ScriptedConnector::new(states));
        let monitor = Arc::new(PathMonitor::new(
            Arc::new(FixedPath(snapshot_with(available))),
            Duration::from_secs(1),
        ));
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (events, _event_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            connector.clone(),
            monitor,
            status_tx,
            events,
            &BondConfig::default(),
        );
        Harness {
            manager,
            connector,
            status_rx,
        }
    }

    async fn last_status(
        rx: &mut mpsc::UnboundedReceiver<(ConnectionType, ConnectionStatus)>,
    ) -> Option<(ConnectionType, ConnectionStatus)> {
        let mut last = None;
        while let Ok(update) = rx.try_recv() {
            last = Some(update);
        }
        last
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_with_unavailable_interface_reports_unsatisfied() {
        let mut h = harness(vec![TransportState::Ready], &[ConnectionType::Ethernet]);

        // Wifi has no interface: toggling it off then on must not connect.
        h.manager.toggle_connection(ConnectionType::Wifi).await;
        h.manager.toggle_connection(ConnectionType::Wifi).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 0);
        let (connection_type, status) = last_status(&mut h.status_rx).await.unwrap();
        assert_eq!(connection_type, ConnectionType::Wifi);
        assert_eq!(status, ConnectionStatus::Unsatisfied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_transport_reports_satisfied() {
        let mut h = harness(
            vec![TransportState::Connecting, TransportState::Ready],
            &[ConnectionType::Ethernet],
        );

        h.manager.set_enabled(ConnectionType::Ethernet, true).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 1);
        let (connection_type, status) = last_status(&mut h.status_rx).await.unwrap();
        assert_eq!(connection_type, ConnectionType::Ethernet);
        assert_eq!(status, ConnectionStatus::Satisfied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_is_terminal() {
        let mut h = harness(
            vec![TransportState::Failed("refused".into())],
            &[ConnectionType::Wifi],
        );

        h.manager.set_enabled(ConnectionType::Wifi, true).await;
        // Initial attempt plus three retries at 5s spacing.
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 4);
        assert!(!h.manager.is_enabled(ConnectionType::Wifi));
        let (_, status) = last_status(&mut h.status_rx).await.unwrap();
        assert_eq!(status, ConnectionStatus::Unsatisfied);

        // No further automatic attempts once terminal.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_and_resets_retry() {
        let mut h = harness(
            vec![TransportState::Failed("flaky".into())],
            &[ConnectionType::Wifi],
        );

        h.manager.set_enabled(ConnectionType::Wifi, true).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Disable mid-retry: pending retries must die with the generation.
        h.manager.set_enabled(ConnectionType::Wifi, false).await;
        let attempts_at_disable = h.connector.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), attempts_at_disable);

        let (_, status) = last_status(&mut h.status_rx).await.unwrap();
        assert_eq!(status, ConnectionStatus::Unsatisfied);

        // Re-enable: retry budget starts fresh.
        h.manager.set_enabled(ConnectionType::Wifi, true).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            h.connector.attempts.load(Ordering::SeqCst),
            attempts_at_disable + 4
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_resets_retry_budget() {
        let mut h = harness(vec![TransportState::Ready], &[ConnectionType::Ethernet]);

        h.manager.set_enabled(ConnectionType::Ethernet, true).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_, status) = last_status(&mut h.status_rx).await.unwrap();
        assert_eq!(status, ConnectionStatus::Satisfied);
        assert!(h.manager.is_enabled(ConnectionType::Ethernet));
    }

    #[tokio::test]
    async fn test_concurrent_toggles_net_zero_flips() {
        let h = harness(vec![TransportState::Ready], &[ConnectionType::Wifi]);
        let manager = Arc::new(h.manager);

        // An even number of flips must leave the flag where it started,
        // however the toggle tasks interleave.
        for _ in 0..50 {
            let first = {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.toggle_connection(ConnectionType::Wifi).await;
                })
            };
            let second = {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.toggle_connection(ConnectionType::Wifi).await;
                })
            };
            first.await.unwrap();
            second.await.unwrap();
        }

        assert!(manager.is_enabled(ConnectionType::Wifi));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_to_hotspot_records_target() {
        let h = harness(vec![TransportState::Ready], &[ConnectionType::Hotspot]);

        h.manager.connect_to_hotspot("my-phone").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.manager.hotspot_target().as_deref(), Some("my-phone"));
        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_path_updates_gated_by_enabled_flag() {
        let mut h = harness(vec![TransportState::Ready], &[ConnectionType::Wifi]);
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        h.manager.start(update_rx);

        // Disabled type: a satisfied path update is reported as unsatisfied.
        h.manager.set_enabled(ConnectionType::Wifi, false).await;
        let _ = last_status(&mut h.status_rx).await;

        update_tx
            .send(PathUpdate {
                connection_type: ConnectionType::Wifi,
                status: ConnectionStatus::Satisfied,
                quality: 1.0,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_, status) = last_status(&mut h.status_rx).await.unwrap();
        assert_eq!(status, ConnectionStatus::Unsatisfied);
        h.manager.stop();
    }
}

//! The bonding-mode policy engine.
//!
//! The bond manager owns the current mode and the set of active connection
//! types, reacts to connection status callbacks, drives the connection pool
//! and multipath-session creation, and publishes bond status. Mode-specific
//! behavior is data (priority order, pool requirements, service-type hints);
//! there is one manager for all modes.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::BondConfig;
use crate::connection::ConnectionManager;
use crate::error::BondError;
use crate::monitor::InterfaceInfo;
use crate::pool::ConnectionPool;
use crate::telemetry::{BondMetrics, TelemetryManager};
use crate::types::{
    BondEvent, BondStatus, BondingMode, ConnectionStatus, ConnectionType, MultipathServiceType,
};

/// Capability: multipath-session factory supplied by the platform.
pub trait MultipathSessionFactory: Send + Sync {
    fn create_session(&self, service_type: MultipathServiceType) -> Result<(), BondError>;
}

/// Pluggable predicate deciding whether two interfaces may join one bundle.
///
/// The default accepts everything; installations that require e.g. MTU
/// equality can supply their own.
pub type CompatibilityPredicate = Box<dyn Fn(&InterfaceInfo, &InterfaceInfo) -> bool + Send + Sync>;

/// Capability: measurement source for the periodic metrics sample, returning
/// (throughput B/s, latency, error rate).
pub type MetricsSampler = Box<dyn Fn() -> (f64, Duration, f64) + Send + Sync>;

struct BondInner {
    config: BondConfig,
    connections: Arc<ConnectionManager>,
    pool: Arc<ConnectionPool>,
    telemetry: Mutex<TelemetryManager>,
    sessions: Arc<dyn MultipathSessionFactory>,
    mode: Mutex<BondingMode>,
    /// The sole mutation path is `connection_status_changed`; every access
    /// goes through this mutex.
    active: Mutex<BTreeSet<ConnectionType>>,
    events: mpsc::UnboundedSender<BondEvent>,
    compatibility: CompatibilityPredicate,
    sampler: MetricsSampler,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

/// Policy engine selecting the bonding mode and the active connections.
pub struct BondManager {
    inner: Arc<BondInner>,
}

impl BondManager {
    pub fn new(
        config: BondConfig,
        connections: Arc<ConnectionManager>,
        pool: Arc<ConnectionPool>,
        sessions: Arc<dyn MultipathSessionFactory>,
        events: mpsc::UnboundedSender<BondEvent>,
    ) -> Self {
        let telemetry =
            TelemetryManager::new(config.telemetry_history_limit, config.telemetry_window);
        let mode = config.bonding_mode;
        Self {
            inner: Arc::new(BondInner {
                config,
                connections,
                pool,
                telemetry: Mutex::new(telemetry),
                sessions,
                mode: Mutex::new(mode),
                active: Mutex::new(BTreeSet::new()),
                events,
                compatibility: Box::new(|_, _| true),
                sampler: Box::new(|| (0.0, Duration::ZERO, 0.0)),
                stop: Mutex::new(None),
            }),
        }
    }

    /// Install a bundle-compatibility predicate.
    pub fn with_compatibility(mut self, predicate: CompatibilityPredicate) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("builder used before start");
        inner.compatibility = predicate;
        self
    }

    /// Install a measurement source for periodic metrics samples.
    pub fn with_metrics_sampler(mut self, sampler: MetricsSampler) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("builder used before start");
        inner.sampler = sampler;
        self
    }

    pub fn current_mode(&self) -> BondingMode {
        *self.inner.mode.lock().unwrap()
    }

    /// Snapshot of the currently active connection types.
    pub fn active_connections(&self) -> BTreeSet<ConnectionType> {
        self.inner.active.lock().unwrap().clone()
    }

    /// Current bond status, derived from the pool's active-connection count.
    pub fn bond_status(&self) -> BondStatus {
        if self.inner.pool.active_count() > 0 {
            BondStatus::Active
        } else {
            BondStatus::Inactive
        }
    }

    /// Mean throughput over the telemetry window.
    pub fn average_throughput(&self, window: Option<Duration>) -> Option<f64> {
        self.inner.telemetry.lock().unwrap().average_throughput(window)
    }

    /// Mean latency over the telemetry window.
    pub fn average_latency(&self, window: Option<Duration>) -> Option<Duration> {
        self.inner.telemetry.lock().unwrap().average_latency(window)
    }

    /// Mean error rate over the telemetry window.
    pub fn average_error_rate(&self, window: Option<Duration>) -> Option<f64> {
        self.inner.telemetry.lock().unwrap().average_error_rate(window)
    }

    /// Switch the bonding policy.
    ///
    /// Fails with [`BondError::InvalidConfiguration`] when the current
    /// connectivity cannot satisfy the mode (load-balance needs at least two
    /// connectable, mutually compatible types), and with the underlying error
    /// when multipath-session creation fails. The mode is unchanged on any
    /// failure.
    pub fn set_bonding_mode(&self, mode: BondingMode) -> Result<(), BondError> {
        info!(%mode, "setting bonding mode");
        let requirements = mode.requirements();

        let connectable = self.connectable_types();
        if connectable.len() < requirements.min_active {
            warn!(
                %mode,
                connectable = connectable.len(),
                required = requirements.min_active,
                "invalid configuration for requested mode"
            );
            return Err(BondError::InvalidConfiguration);
        }

        self.inner
            .pool
            .maintain(requirements.min_active, requirements.max_standby);

        if let Err(e) = self.inner.sessions.create_session(mode.service_type()) {
            error!(%mode, "multipath session creation failed: {e}");
            let _ = self.inner.events.send(BondEvent::Error(e.clone()));
            return Err(e);
        }

        *self.inner.mode.lock().unwrap() = mode;
        // The factory may have produced nothing; report the pool as it is.
        let _ = self
            .inner
            .events
            .send(BondEvent::BondStatus(self.bond_status()));
        Ok(())
    }

    /// Connection types that could participate in a bundle right now:
    /// an interface is available, the type is enabled, and the interface is
    /// compatible with the rest of the candidate bundle.
    fn connectable_types(&self) -> BTreeSet<ConnectionType> {
        let path = self.inner.connections.monitor().current_path();
        let mut bundle: Vec<&InterfaceInfo> = Vec::new();
        let mut types = BTreeSet::new();

        for iface in &path.interfaces {
            if !self.inner.connections.is_enabled(iface.connection_type) {
                continue;
            }
            if bundle
                .iter()
                .all(|member| (self.inner.compatibility)(member, iface))
            {
                bundle.push(iface);
                types.insert(iface.connection_type);
            }
        }
        types
    }

    /// Status callback from the connection layer. Satisfied types join the
    /// active set, everything else leaves it; the policy is then re-applied.
    pub async fn connection_status_changed(
        &self,
        connection_type: ConnectionType,
        status: ConnectionStatus,
    ) {
        {
            let mut active = self.inner.active.lock().unwrap();
            match status {
                ConnectionStatus::Satisfied => {
                    active.insert(connection_type);
                }
                ConnectionStatus::Unsatisfied | ConnectionStatus::RequiresConnection => {
                    active.remove(&connection_type);
                }
            }
            debug!(%connection_type, ?status, active = ?active, "active set updated");
        }
        self.evaluate_connections().await;
    }

    /// Re-apply the current policy to the active set.
    ///
    /// Active-backup keeps only the highest-priority satisfied type and
    /// disables the rest; the parallel modes use every member simultaneously.
    pub async fn evaluate_connections(&self) {
        let mode = self.current_mode();
        let active = self.active_connections();

        if mode.uses_all_connections() {
            for connection_type in &active {
                let _ = self
                    .inner
                    .events
                    .send(BondEvent::ActiveConnection(*connection_type));
            }
            debug!(%mode, ?active, "all satisfied connections active");
            return;
        }

        let Some(primary) = ConnectionType::priority_order()
            .into_iter()
            .find(|connection_type| active.contains(connection_type))
        else {
            warn!("no connection available for active-backup");
            return;
        };

        for connection_type in ConnectionType::all() {
            if connection_type != primary && self.inner.connections.is_enabled(connection_type) {
                info!(%connection_type, %primary, "disabling non-primary connection");
                self.inner
                    .connections
                    .set_enabled(connection_type, false)
                    .await;
            }
        }
        let _ = self.inner.events.send(BondEvent::ActiveConnection(primary));
    }

    /// Start the run loop: applies status callbacks and ticks the metrics
    /// recomputation at the configured interval.
    pub fn start(
        &self,
        mut status_rx: mpsc::UnboundedReceiver<(ConnectionType, ConnectionStatus)>,
    ) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        if let Some(prev) = self.inner.stop.lock().unwrap().replace(stop_tx) {
            let _ = prev.send(true);
        }

        let manager = BondManager {
            inner: Arc::clone(&self.inner),
        };
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.inner.config.metrics_interval);
            loop {
                tokio::select! {
                    update = status_rx.recv() => {
                        let Some((connection_type, status)) = update else { return };
                        manager.connection_status_changed(connection_type, status).await;
                    }
                    _ = tick.tick() => {
                        manager.collect_metrics();
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

    /// Stop the run loop and release every owned connection: the periodic
    /// task, the pooled connections, and the managed transports go together.
    pub fn stop(&self) {
        if let Some(stop) = self.inner.stop.lock().unwrap().take() {
            let _ = stop.send(true);
        }
        self.inner.pool.clear();
        self.inner.connections.teardown_all();
    }

    fn collect_metrics(&self) {
        let active = self.inner.pool.active_count();
        let standby = self.inner.pool.standby_connections().len();

        let (throughput_bps, latency, error_rate) = (self.inner.sampler)();
        self.inner.telemetry.lock().unwrap().record(BondMetrics::new(
            throughput_bps,
            latency,
            error_rate,
            active + standby,
        ));

        let status = if active > 0 {
            BondStatus::Active
        } else {
            BondStatus::Inactive
        };
        let _ = self.inner.events.send(BondEvent::BondStatus(status));
    }
}

//! Path observation: interface enumeration, quality scoring, and change events.
//!
//! The platform supplies path snapshots through the [`PathProvider`]
//! capability. The monitor polls it on its own task, diffs consecutive
//! snapshots per connection type, and emits one update per affected type.
//! Per-type updates are delivered in the order the changes were observed;
//! there is no ordering guarantee across different types.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::types::{ConnectionStatus, ConnectionType};

/// A network interface as reported by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceInfo {
    /// Platform interface name (e.g. "en0").
    pub name: String,
    /// The connection type this interface maps to.
    pub connection_type: ConnectionType,
    /// Metered or otherwise costly path (e.g. cellular tether).
    pub is_expensive: bool,
    /// Path with reduced capability (e.g. Low Data Mode).
    pub is_constrained: bool,
}

impl InterfaceInfo {
    /// Quality score in (0, 1]. Expensive and constrained flags compound:
    /// both together yield 0.56.
    pub fn quality_score(&self) -> f64 {
        let mut quality = 1.0;
        if self.is_expensive {
            quality *= 0.8;
        }
        if self.is_constrained {
            quality *= 0.7;
        }
        quality
    }
}

/// The platform's current view of network reachability.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSnapshot {
    /// Overall reachability reported by the platform.
    pub status: ConnectionStatus,
    /// Interfaces currently available.
    pub interfaces: Vec<InterfaceInfo>,
}

impl Default for PathSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Unsatisfied,
            interfaces: Vec::new(),
        }
    }
}

impl PathSnapshot {
    /// Whether any available interface maps to the given connection type.
    pub fn supports(&self, connection_type: ConnectionType) -> bool {
        self.interfaces
            .iter()
            .any(|iface| iface.connection_type == connection_type)
    }

    /// Status for a single connection type: the path status when an interface
    /// is available, unsatisfied otherwise.
    pub fn status_for(&self, connection_type: ConnectionType) -> ConnectionStatus {
        if self.supports(connection_type) {
            self.status
        } else {
            ConnectionStatus::Unsatisfied
        }
    }

    /// Best quality score among interfaces of the given type.
    pub fn quality_for(&self, connection_type: ConnectionType) -> Option<f64> {
        self.interfaces
            .iter()
            .filter(|iface| iface.connection_type == connection_type)
            .map(|iface| iface.quality_score())
            .max_by(|a, b| a.total_cmp(b))
    }
}

/// Capability: interface enumeration and path snapshot, supplied by the
/// platform layer.
pub trait PathProvider: Send + Sync {
    fn current_path(&self) -> PathSnapshot;
}

/// Per-type change notification emitted by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct PathUpdate {
    pub connection_type: ConnectionType,
    pub status: ConnectionStatus,
    /// Quality of the best interface for this type, 0.0 when none remains.
    pub quality: f64,
}

/// Watches the platform path and notifies per-type changes.
pub struct PathMonitor {
    provider: Arc<dyn PathProvider>,
    poll_interval: Duration,
    current: Mutex<PathSnapshot>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl PathMonitor {
    pub fn new(provider: Arc<dyn PathProvider>, poll_interval: Duration) -> Self {
        let current = provider.current_path();
        Self {
            provider,
            poll_interval,
            current: Mutex::new(current),
            stop: Mutex::new(None),
        }
    }

    /// The last-observed snapshot, returned synchronously.
    pub fn current_path(&self) -> PathSnapshot {
        self.current.lock().unwrap().clone()
    }

    /// Begin continuous observation on a dedicated task. Each affected
    /// connection type gets one [`PathUpdate`] per observed change.
    ///
    /// Calling `start` again replaces the previous observation task.
    pub fn start(self: &Arc<Self>, updates: mpsc::UnboundedSender<PathUpdate>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        if let Some(prev) = self.stop.lock().unwrap().replace(stop_tx) {
            let _ = prev.send(true);
        }

        info!(interval = ?self.poll_interval, "path monitor starting");
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(monitor.poll_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let next = monitor.provider.current_path();
                        let changed = {
                            let mut current = monitor.current.lock().unwrap();
                            let changed = diff_snapshots(&current, &next);
                            *current = next;
                            changed
                        };
                        for update in changed {
                            debug!(
                                connection_type = %update.connection_type,
                                status = ?update.status,
                                quality = update.quality,
                                "path changed"
                            );
                            if updates.send(update).is_err() {
                                return;
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            info!("path monitor stopped");
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Halt observation and cancel the polling task.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().unwrap().take() {
            let _ = stop.send(true);
        }
    }
}

/// Compute per-type updates between two consecutive snapshots: a type is
/// affected when it newly appeared, disappeared, or changed quality or status.
fn diff_snapshots(prev: &PathSnapshot, next: &PathSnapshot) -> Vec<PathUpdate> {
    let mut updates = Vec::new();
    for connection_type in ConnectionType::all() {
        let old_status = prev.status_for(connection_type);
        let new_status = next.status_for(connection_type);
        let old_quality = prev.quality_for(connection_type);
        let new_quality = next.quality_for(connection_type);

        if old_status != new_status || old_quality != new_quality {
            updates.push(PathUpdate {
                connection_type,
                status: new_status,
                quality: new_quality.unwrap_or(0.0),
            });
        }
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, connection_type: ConnectionType) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            connection_type,
            is_expensive: false,
            is_constrained: false,
        }
    }

    fn satisfied(interfaces: Vec<InterfaceInfo>) -> PathSnapshot {
        PathSnapshot {
            status: ConnectionStatus::Satisfied,
            interfaces,
        }
    }

    struct StaticProvider(Mutex<PathSnapshot>);

    impl PathProvider for StaticProvider {
        fn current_path(&self) -> PathSnapshot {
            self.0.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_quality_score_compounds() {
        let mut eth = iface("en0", ConnectionType::Ethernet);
        assert_eq!(eth.quality_score(), 1.0);

        eth.is_expensive = true;
        assert_eq!(eth.quality_score(), 0.8);

        eth.is_constrained = true;
        assert!((eth.quality_score() - 0.56).abs() < 1e-9);

        eth.is_expensive = false;
        assert_eq!(eth.quality_score(), 0.7);
    }

    #[test]
    fn test_snapshot_status_for() {
        let snap = satisfied(vec![iface("en0", ConnectionType::Ethernet)]);
        assert_eq!(
            snap.status_for(ConnectionType::Ethernet),
            ConnectionStatus::Satisfied
        );
        assert_eq!(
            snap.status_for(ConnectionType::Wifi),
            ConnectionStatus::Unsatisfied
        );
    }

    #[test]
    fn test_diff_reports_appearance_and_disappearance() {
        let before = satisfied(vec![iface("en0", ConnectionType::Ethernet)]);
        let after = satisfied(vec![iface("en1", ConnectionType::Wifi)]);

        let updates = diff_snapshots(&before, &after);
        assert_eq!(updates.len(), 2);

        let eth = updates
            .iter()
            .find(|u| u.connection_type == ConnectionType::Ethernet)
            .unwrap();
        assert_eq!(eth.status, ConnectionStatus::Unsatisfied);
        assert_eq!(eth.quality, 0.0);

        let wifi = updates
            .iter()
            .find(|u| u.connection_type == ConnectionType::Wifi)
            .unwrap();
        assert_eq!(wifi.status, ConnectionStatus::Satisfied);
        assert_eq!(wifi.quality, 1.0);
    }

    #[test]
    fn test_diff_reports_quality_change_only() {
        let before = satisfied(vec![iface("en1", ConnectionType::Wifi)]);
        let mut degraded = iface("en1", ConnectionType::Wifi);
        degraded.is_expensive = true;
        let after = satisfied(vec![degraded]);

        let updates = diff_snapshots(&before, &after);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].connection_type, ConnectionType::Wifi);
        assert_eq!(updates[0].status, ConnectionStatus::Satisfied);
        assert_eq!(updates[0].quality, 0.8);
    }

    #[test]
    fn test_diff_no_change() {
        let snap = satisfied(vec![iface("en0", ConnectionType::Ethernet)]);
        assert!(diff_snapshots(&snap, &snap.clone()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_emits_updates_on_change() {
        let provider = Arc::new(StaticProvider(Mutex::new(PathSnapshot::default())));
        let monitor = Arc::new(PathMonitor::new(
            provider.clone() as Arc<dyn PathProvider>,
            Duration::from_millis(100),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor.start(tx);

        // No change yet: a few ticks produce nothing.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(rx.try_recv().is_err());

        *provider.0.lock().unwrap() = satisfied(vec![iface("en0", ConnectionType::Ethernet)]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.connection_type, ConnectionType::Ethernet);
        assert_eq!(update.status, ConnectionStatus::Satisfied);
        assert!(monitor.current_path().supports(ConnectionType::Ethernet));

        monitor.stop();
    }
}

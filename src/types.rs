//! Core data model: connection types, statuses, bonding modes, and events.
//!
//! Everything here is plain data. Mode-specific behavior is expressed as data
//! (priority order, connection requirements, service-type hints) rather than
//! through per-mode manager subtypes.

use serde::{Deserialize, Serialize};

use crate::error::BondError;

/// Physical connection type, ordered by failover priority.
///
/// The derived `Ord` gives ethernet > wifi > hotspot, which is the priority
/// order used by active-backup selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Ethernet,
    Wifi,
    Hotspot,
}

impl ConnectionType {
    /// All known connection types, in priority order.
    pub fn all() -> [ConnectionType; 3] {
        [
            ConnectionType::Ethernet,
            ConnectionType::Wifi,
            ConnectionType::Hotspot,
        ]
    }

    /// Failover priority order (highest first).
    pub fn priority_order() -> [ConnectionType; 3] {
        Self::all()
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionType::Ethernet => "ethernet",
            ConnectionType::Wifi => "wifi",
            ConnectionType::Hotspot => "hotspot",
        };
        f.write_str(name)
    }
}

/// Reachability status for a connection type at an instant.
///
/// Derived from interface availability, the per-type enabled flag, and the
/// transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The path is usable and the transport is ready.
    Satisfied,
    /// The path is not usable (disabled, missing interface, or failed).
    Unsatisfied,
    /// The path could become usable; a connection attempt is in flight.
    RequiresConnection,
}

/// Multipath session service-type hint passed to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipathServiceType {
    /// Seamless failover between paths.
    Handover,
    /// Low-latency interleaving across paths.
    Interactive,
    /// Bandwidth aggregation across paths.
    Aggregate,
}

/// Connection-count requirements carried by a bonding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequirements {
    pub min_active: usize,
    pub max_standby: usize,
}

/// Bonding policy governing how multiple network paths are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BondingMode {
    /// One active path; the rest are pre-warmed standbys.
    ActiveBackup,
    /// Traffic spread across every active path.
    LoadBalance,
    /// Every path carries a copy of the traffic.
    Broadcast,
    /// Mode picked dynamically from observed metrics.
    Adaptive,
}

impl BondingMode {
    /// Active/standby pool sizes this mode maintains.
    pub fn requirements(&self) -> ConnectionRequirements {
        let (min_active, max_standby) = match self {
            BondingMode::ActiveBackup => (1, 1),
            BondingMode::LoadBalance => (2, 2),
            BondingMode::Broadcast => (1, 3),
            BondingMode::Adaptive => (1, 2),
        };
        ConnectionRequirements {
            min_active,
            max_standby,
        }
    }

    /// Multipath service-type hint used when creating the bonded session.
    pub fn service_type(&self) -> MultipathServiceType {
        match self {
            BondingMode::ActiveBackup => MultipathServiceType::Handover,
            BondingMode::LoadBalance => MultipathServiceType::Interactive,
            BondingMode::Broadcast | BondingMode::Adaptive => MultipathServiceType::Aggregate,
        }
    }

    /// Whether every satisfied connection is used simultaneously, as opposed
    /// to a single primary with backups.
    pub fn uses_all_connections(&self) -> bool {
        !matches!(self, BondingMode::ActiveBackup)
    }
}

impl std::fmt::Display for BondingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BondingMode::ActiveBackup => "active-backup",
            BondingMode::LoadBalance => "load-balance",
            BondingMode::Broadcast => "broadcast",
            BondingMode::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

/// Overall bond health, derived from the connection pool. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondStatus {
    Active,
    Inactive,
    Error(String),
}

/// Outbound traffic priority class. Higher ordinal wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrafficPriority {
    BestEffort = 0,
    Background = 1,
    Interactive = 2,
    Video = 3,
    Voice = 4,
}

impl TrafficPriority {
    /// All priority classes, highest first.
    pub fn all() -> [TrafficPriority; 5] {
        [
            TrafficPriority::Voice,
            TrafficPriority::Video,
            TrafficPriority::Interactive,
            TrafficPriority::Background,
            TrafficPriority::BestEffort,
        ]
    }

    /// Real-time classes are pinned to the first (best) active connection.
    pub fn is_realtime(&self) -> bool {
        matches!(self, TrafficPriority::Voice | TrafficPriority::Video)
    }
}

/// Event published to the consumer (UI) layer.
///
/// One tagged enum instead of per-component callback traits; consumers
/// receive these on an unbounded channel.
#[derive(Debug, Clone)]
pub enum BondEvent {
    /// Per-type connection status changed.
    ConnectionStatus {
        connection_type: ConnectionType,
        status: ConnectionStatus,
    },
    /// Overall bond status changed (or was re-published by the metrics loop).
    BondStatus(BondStatus),
    /// The sole active connection under active-backup changed.
    ActiveConnection(ConnectionType),
    /// The set of discoverable hotspot devices changed.
    HotspotDevices(Vec<String>),
    /// A non-fatal failure was surfaced.
    Error(BondError),
}

//! Multi-interface network bonding and failover orchestration.
//!
//! This library monitors the availability and quality of several physical
//! network paths (Ethernet, Wi-Fi, tethered hotspot) and steers traffic across
//! them according to a selectable bonding policy. It is a policy engine, not a
//! wire protocol: the platform supplies transports, path snapshots, and
//! multipath sessions through capability traits, and consumes status events.
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - `monitor`: Path observation, interface diffing, and quality scoring
//! - `connection`: Per-interface managed connections with bounded retry
//! - `pool`: Active/standby connection pool with failover promotion
//! - `traffic`: Priority-class dispatch across pooled connections
//! - `telemetry`: Rolling bond metrics with windowed averages
//! - `bond`: The bonding-mode policy engine driving everything above
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use netbond::*;
//! # fn wire(connections: Arc<connection::ConnectionManager>,
//! #         pool: Arc<pool::ConnectionPool>,
//! #         sessions: Arc<dyn bond::MultipathSessionFactory>) {
//! let (events, _event_rx) = tokio::sync::mpsc::unbounded_channel();
//! let (status_tx, status_rx) = tokio::sync::mpsc::unbounded_channel();
//! let bond = bond::BondManager::new(
//!     BondConfig::default(), connections, pool, sessions, events);
//! bond.start(status_rx);
//! # }
//! ```

pub mod bond;
pub mod config;
pub mod connection;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod telemetry;
pub mod traffic;
pub mod types;

pub use config::BondConfig;
pub use error::BondError;
pub use types::{
    BondEvent, BondStatus, BondingMode, ConnectionStatus, ConnectionType, MultipathServiceType,
    TrafficPriority,
};

//! Error taxonomy for the bonding engine.
//!
//! Connectivity flicker is absorbed by the retry logic and never surfaces
//! here; these variants cover the structural failures that are reported to
//! the caller of the mutating operation.

use thiserror::Error;

/// The primary error type for the bonding library.
///
/// `Clone` so errors can both be returned to the caller and re-published on
/// the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BondError {
    /// The requested bonding mode cannot be satisfied with the current
    /// connectivity. The mode is left unchanged.
    #[error("invalid configuration for requested bonding mode")]
    InvalidConfiguration,

    /// An underlying transport connection failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Multipath session setup failed; the mode change is aborted.
    #[error("multipath session creation failed: {0}")]
    SessionCreation(String),

    /// A send was attempted with no active connection in the pool.
    #[error("no active connection available")]
    NoActiveConnection,
}

/// A specialized `Result` type for this library.
pub type Result<T> = std::result::Result<T, BondError>;

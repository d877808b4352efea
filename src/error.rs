//! Errors arising from misuse of the reaper's interfaces.
//!
//! Reclaim outcomes themselves (lost ownership races, failed teardowns, a
//! shut down queue) are never errors; they are reported through
//! [`Retired`][crate::Retired] and the log.

use std::io;

use thiserror::Error;

use crate::handle::HandleId;

/// An error returned by the reaper's administrative and registration calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The handle does not exist, or has already been destroyed.
    #[error("unknown or destroyed address space {0}")]
    UnknownHandle(HandleId),

    /// An address space must be shared by at least one task.
    #[error("address space {0} has no live tasks")]
    NoTasks(HandleId),

    /// An address space was registered without any live task.
    #[error("an address space must be registered with at least one task")]
    EmptyRegistration,

    /// A task tried to join an address space that is already being reclaimed.
    #[error("address space {0} is already being reclaimed")]
    ReclaimStarted(HandleId),

    /// A value written to the administrative switch is out of range.
    #[error("invalid reclaim switch value {0:?} (expected 0 or 1)")]
    InvalidSwitchValue(String),

    /// A configuration value could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidConfig {
        /// The configuration key.
        key: &'static str,
        /// The rejected raw value.
        value: String,
    },

    /// A worker thread could not be spawned.
    #[error("couldn't spawn reclaim worker")]
    Spawn(#[source] io::Error),
}

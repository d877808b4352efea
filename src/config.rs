//! Reaper configuration.
//!
//! The configuration can be deserialized (every field is optional) or read
//! from the environment:
//! - `MMREAP_RECLAIM`: `enabled` (default) or `disabled`, also accepting
//!   `on`/`off` and the persisted `1`/`0`.
//! - `MMREAP_WORKERS`: the size of the worker pool. Zero is valid, queued
//!   address spaces are then only reclaimed by
//!   [`reap_one`][crate::Reaper::reap_one] or at shutdown.
//!
//! The default pool size is chosen at build time, either by one of the
//! `workers-N` features or by the `MMREAP_DEFAULT_WORKERS` build variable.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::switch::ReclaimMode;
use crate::worker::{ShutdownMode, MAX_BATCH};

cfg_if::cfg_if! {
    if #[cfg(feature = "workers-8")] {
        const DEFAULT_WORKERS: usize = 8;
    } else if #[cfg(feature = "workers-4")] {
        const DEFAULT_WORKERS: usize = 4;
    } else if #[cfg(feature = "workers-2")] {
        const DEFAULT_WORKERS: usize = 2;
    } else if #[cfg(feature = "workers-1")] {
        const DEFAULT_WORKERS: usize = 1;
    } else {
        include!(concat!(env!("OUT_DIR"), "/build_constants.rs"));
        const DEFAULT_WORKERS: usize = BUILD_DEFAULT_WORKERS;
    }
}

const ENV_RECLAIM: &str = "MMREAP_RECLAIM";
const ENV_WORKERS: &str = "MMREAP_WORKERS";

/// The configuration of a [`Reaper`][crate::Reaper].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The initial state of the deferred reclaim switch.
    pub reclaim: ReclaimMode,
    /// The number of background workers.
    pub workers: usize,
    /// How many address spaces a worker takes off the queue at once, clamped
    /// to `1..=MAX_BATCH`.
    pub batch: usize,
    /// What dropping the reaper does with address spaces still queued.
    pub shutdown: ShutdownMode,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            reclaim: ReclaimMode::default(),
            workers: DEFAULT_WORKERS,
            batch: MAX_BATCH,
            shutdown: ShutdownMode::default(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment, falling back to
    /// the defaults for unset variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from the values `lookup` returns for the
    /// environment keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_RECLAIM) {
            config.reclaim = raw.parse()?;
        }

        if let Some(raw) = lookup(ENV_WORKERS) {
            config.workers = raw.trim().parse().map_err(|_| Error::InvalidConfig {
                key: ENV_WORKERS,
                value: raw.clone(),
            })?;
        }

        Ok(config)
    }

    /// The effective batch size.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch.max(1).min(MAX_BATCH)
    }
}

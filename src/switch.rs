//! The process-wide switch deciding whether reclaim is deferred at all.
//!
//! The switch is read once per address space, by its reclaim owner, at the
//! moment ownership is established; that decision is final for the address
//! space. Toggling it therefore only affects reclaims triggered afterwards.

use core::fmt;
use core::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;

use self::ReclaimMode::{Disabled, Enabled};

////////////////////////////////////////////////////////////////////////////////////////////////////
// ReclaimMode
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Whether teardown is deferred to the background workers.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimMode {
    /// Teardown is queued and performed by a background worker.
    #[default]
    Enabled,
    /// Teardown is performed synchronously by the exiting task.
    Disabled,
}

impl ReclaimMode {
    /// Returns `true` for [`Enabled`][ReclaimMode::Enabled].
    #[inline]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Enabled)
    }
}

impl From<bool> for ReclaimMode {
    #[inline]
    fn from(enabled: bool) -> Self {
        if enabled {
            Enabled
        } else {
            Disabled
        }
    }
}

impl FromStr for ReclaimMode {
    type Err = Error;

    /// Parses a mode case-insensitively, accepting the usual aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" | "enable" | "on" | "true" | "1" => Ok(Enabled),
            "disabled" | "disable" | "off" | "false" | "0" => Ok(Disabled),
            _ => Err(Error::InvalidConfig {
                key: "reclaim",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for ReclaimMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Enabled => write!(f, "enabled"),
            Disabled => write!(f, "disabled"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ControlSwitch
////////////////////////////////////////////////////////////////////////////////////////////////////

const RAW_MIN: i64 = 0;
const RAW_MAX: i64 = 1;

/// The administrative enable/disable switch for deferred reclaim.
///
/// Reads are relaxed: acting on a value that is one toggle stale costs at
/// most one extra synchronous or deferred reclaim.
#[derive(Debug)]
pub struct ControlSwitch(AtomicBool);

impl Default for ControlSwitch {
    #[inline]
    fn default() -> Self {
        Self::new(ReclaimMode::default())
    }
}

impl ControlSwitch {
    /// Creates a new [`ControlSwitch`] in the given `mode`.
    #[inline]
    pub fn new(mode: ReclaimMode) -> Self {
        Self(AtomicBool::new(mode.is_enabled()))
    }

    /// Returns `true` if reclaim is currently deferred.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns the current [`ReclaimMode`].
    #[inline]
    pub fn mode(&self) -> ReclaimMode {
        ReclaimMode::from(self.is_enabled())
    }

    /// Enables or disables deferred reclaim for subsequently triggered
    /// reclaims.
    #[inline]
    pub fn set(&self, enabled: bool) {
        let prev = self.0.swap(enabled, Ordering::Relaxed);
        if prev != enabled {
            info!("deferred reclaim {}", ReclaimMode::from(enabled));
        }
    }

    /// Renders the switch the way it is persisted, as `0` or `1`.
    #[inline]
    pub fn read_raw(&self) -> String {
        String::from(if self.is_enabled() { "1" } else { "0" })
    }

    /// Sets the switch from its persisted integer form.
    ///
    /// Surrounding whitespace is ignored; anything that is not an integer in
    /// `[0, 1]` is rejected and leaves the switch unchanged.
    pub fn write_raw(&self, raw: &str) -> Result<(), Error> {
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| Error::InvalidSwitchValue(raw.to_owned()))?;

        if !(RAW_MIN..=RAW_MAX).contains(&value) {
            return Err(Error::InvalidSwitchValue(raw.to_owned()));
        }

        self.set(value == RAW_MAX);
        Ok(())
    }
}

impl fmt::Display for ControlSwitch {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "deferred reclaim {}", self.mode())
    }
}

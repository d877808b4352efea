//! Counters describing what the reaper has done so far.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals, updated without taking the coordinator's lock.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    registered: AtomicU64,
    reclaimed_inline: AtomicU64,
    deferred: AtomicU64,
    reclaimed_deferred: AtomicU64,
    teardown_failures: AtomicU64,
    fallback_reclaims: AtomicU64,
    abandoned: AtomicU64,
    ownership_races_lost: AtomicU64,
}

/// A point-in-time copy of the reaper's counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    /// Address spaces registered.
    pub registered: u64,
    /// Teardowns performed synchronously by the exiting task.
    pub reclaimed_inline: u64,
    /// Address spaces handed to the pending queue.
    pub deferred: u64,
    /// Teardowns performed from the pending queue.
    pub reclaimed_deferred: u64,
    /// Teardown attempts that failed (the handle was dropped regardless).
    pub teardown_failures: u64,
    /// Teardowns performed synchronously because the queue was shut down.
    pub fallback_reclaims: u64,
    /// Queued address spaces given back at shutdown without teardown.
    pub abandoned: u64,
    /// Retirements that found reclaim already owned by another task.
    pub ownership_races_lost: u64,
}

macro_rules! counters {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl Stats {
            $(
                #[inline]
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub(crate) fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    count_registered => registered,
    count_reclaimed_inline => reclaimed_inline,
    count_deferred => deferred,
    count_reclaimed_deferred => reclaimed_deferred,
    count_teardown_failure => teardown_failures,
    count_fallback_reclaim => fallback_reclaims,
    count_abandoned => abandoned,
    count_race_lost => ownership_races_lost,
}

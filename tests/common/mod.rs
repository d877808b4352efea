//! A recording stand-in for the host memory manager.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mmreap::{Config, MemoryManager, ReclaimMode, Reaper, TeardownError};
use parking_lot::Mutex;

/// A fake address space, identified by the pid of its process.
#[derive(Debug, PartialEq, Eq)]
pub struct Victim {
    pub pid: u64,
}

#[derive(Debug, Default)]
struct Inner {
    torn_down: Mutex<Vec<u64>>,
    failing: HashSet<u64>,
    panicking: HashSet<u64>,
    delay: Option<Duration>,
}

/// Records every teardown, in the order they happen.
#[derive(Debug, Clone, Default)]
pub struct Host(Arc<Inner>);

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the teardown of the given pids.
    pub fn failing(pids: &[u64]) -> Self {
        Self(Arc::new(Inner {
            failing: pids.iter().copied().collect(),
            ..Inner::default()
        }))
    }

    /// Panics in the teardown of the given pids.
    pub fn panicking(pids: &[u64]) -> Self {
        Self(Arc::new(Inner {
            panicking: pids.iter().copied().collect(),
            ..Inner::default()
        }))
    }

    /// Makes every teardown take `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self(Arc::new(Inner {
            delay: Some(delay),
            ..Inner::default()
        }))
    }

    pub fn torn_down(&self) -> Vec<u64> {
        self.0.torn_down.lock().clone()
    }

    /// Returns how often each pid was handed to `teardown`.
    pub fn counts(&self) -> HashMap<u64, usize> {
        let mut counts = HashMap::new();
        for pid in self.torn_down() {
            *counts.entry(pid).or_insert(0) += 1;
        }
        counts
    }
}

impl MemoryManager for Host {
    type Space = Victim;

    fn teardown(&self, space: Victim) -> Result<(), TeardownError> {
        if let Some(delay) = self.0.delay {
            thread::sleep(delay);
        }

        self.0.torn_down.lock().push(space.pid);
        if self.0.panicking.contains(&space.pid) {
            panic!("pid {} unmapped twice", space.pid);
        }

        if self.0.failing.contains(&space.pid) {
            Err(TeardownError::new(format!("pid {} still has pinned pages", space.pid)))
        } else {
            Ok(())
        }
    }
}

pub fn config(reclaim: ReclaimMode, workers: usize) -> Config {
    Config {
        reclaim,
        workers,
        ..Config::default()
    }
}

pub fn start(reclaim: ReclaimMode, workers: usize, host: &Host) -> Reaper<Host> {
    Reaper::start(config(reclaim, workers), host.clone()).unwrap()
}

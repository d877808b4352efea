//! The background workers draining the pending queue.

use core::fmt;
use core::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use arrayvec::ArrayVec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::coordinator::{Path, Phase, Shared};
use crate::error::Error;
use crate::handle::HandleId;
use crate::teardown::MemoryManager;

/// The maximum number of address spaces a worker takes off the queue per lock
/// acquisition.
pub const MAX_BATCH: usize = 16;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ShutdownMode
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What happens to address spaces still queued when the reaper shuts down.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Tear every queued address space down before returning.
    #[default]
    Drain,
    /// Log every queued address space and hand it back to the caller.
    Abandon,
}

impl fmt::Display for ShutdownMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ShutdownMode::Drain => write!(f, "drain"),
            ShutdownMode::Abandon => write!(f, "abandon"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ShutdownReport
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What became of the address spaces still queued at shutdown.
///
/// Entries already taken by a worker are not listed, they are always finished
/// before the worker exits.
#[derive(Debug)]
pub struct ShutdownReport<S> {
    /// Address spaces torn down by the shutting down thread.
    pub torn_down: Vec<HandleId>,
    /// Address spaces whose teardown failed (and that were dropped).
    pub failed: Vec<HandleId>,
    /// Address spaces given back without teardown, for the caller's fallback.
    pub abandoned: Vec<(HandleId, S)>,
}

impl<S> Default for ShutdownReport<S> {
    #[inline]
    fn default() -> Self {
        Self {
            torn_down: Vec::new(),
            failed: Vec::new(),
            abandoned: Vec::new(),
        }
    }
}

impl<S> ShutdownReport<S> {
    /// Returns `true` if nothing was left in the queue.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.torn_down.is_empty() && self.failed.is_empty() && self.abandoned.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// WorkerPool
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The join handles of the running workers.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `count` workers draining the queue of `shared`.
    ///
    /// If any spawn fails, the workers started so far are stopped again.
    pub(crate) fn spawn<M: MemoryManager>(
        shared: &Arc<Shared<M>>,
        count: usize,
    ) -> Result<Self, Error> {
        let pool = Self {
            workers: Mutex::new(Vec::with_capacity(count)),
        };

        for n in 0..count {
            let worker = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name(format!("mmreap-worker-{}", n))
                .spawn(move || run(&worker, n));

            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown(shared, ShutdownMode::Abandon);
                    return Err(Error::Spawn(e));
                }
            }
        }

        Ok(pool)
    }

    /// Moves the reaper out of the running phase, joins all workers and then
    /// drains or abandons whatever is still queued on the calling thread.
    pub(crate) fn shutdown<M: MemoryManager>(
        &self,
        shared: &Shared<M>,
        mode: ShutdownMode,
    ) -> ShutdownReport<M::Space> {
        {
            let mut state = shared.state.lock();
            if state.phase == Phase::Running {
                info!(queued = state.queue.len(), "shutting down address space reaper ({})", mode);
            }

            state.phase = match mode {
                ShutdownMode::Drain => Phase::Draining,
                ShutdownMode::Abandon => Phase::Stopping,
            };
        }

        shared.work.notify_all();
        let workers = mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("reclaim worker panicked");
            }
        }

        let mut report = ShutdownReport::default();
        loop {
            let next = shared.state.lock().pop_claimed();
            let (id, space) = match next {
                Some(entry) => entry,
                None => break,
            };

            match mode {
                ShutdownMode::Drain => match shared.reclaim(id, space, Path::Deferred) {
                    Ok(()) => report.torn_down.push(id),
                    Err(_) => report.failed.push(id),
                },
                ShutdownMode::Abandon => {
                    shared.abandon(id);
                    report.abandoned.push((id, space));
                }
            }
        }

        report
    }
}

/// The loop of a single worker.
///
/// The worker sleeps until work is queued or the phase changes, takes up to
/// one batch off the queue at a time and tears each entry down with the lock
/// released. A batch that has been taken is always finished.
fn run<M: MemoryManager>(shared: &Shared<M>, n: usize) {
    debug!(worker = n, "reclaim worker started");
    let mut batch: ArrayVec<[(HandleId, M::Space); MAX_BATCH]> = ArrayVec::new();

    'work: loop {
        {
            let mut state = shared.state.lock();
            loop {
                let phase = state.phase;
                match phase {
                    Phase::Running if state.queue.is_empty() => shared.work.wait(&mut state),
                    Phase::Draining if state.queue.is_empty() => break 'work,
                    Phase::Stopping => break 'work,
                    _ => break,
                }
            }

            while batch.len() < shared.batch {
                match state.pop_claimed() {
                    Some(entry) => batch.push(entry),
                    None => break,
                }
            }
        }

        for (id, space) in batch.drain(..) {
            // failures are logged and counted by `reclaim`, never retried
            let _ = shared.reclaim(id, space, Path::Deferred);
        }
    }

    debug!(worker = n, "reclaim worker exiting");
}

//! Ownership hand-off among the racing exiting tasks of an address space.
//!
//! Every task sharing an address space calls
//! [`retire_task`][Reaper::retire_task] exactly once as it exits. The task
//! whose call drops the task count to zero becomes the reclaim owner; the
//! decrement, the ownership test-and-set and the enqueue all happen within a
//! single acquisition of the coordinator's lock, so no two tasks can both
//! observe an unowned, abandoned address space.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::arena::Arena;
use crate::config::Config;
use crate::error::Error;
use crate::handle::{AddressSpace, Flags, HandleId, HandleSnapshot, TaskId};
use crate::queue::PendingQueue;
use crate::stats::{Stats, StatsSnapshot};
use crate::switch::ControlSwitch;
use crate::teardown::{MemoryManager, TeardownError};
use crate::worker::{ShutdownMode, ShutdownReport, WorkerPool};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Retired
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The outcome of retiring one task from an address space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Retired {
    /// Other tasks still share the address space.
    Shared {
        /// The number of tasks left.
        remaining: usize,
    },
    /// Reclaim is already owned by another task.
    AlreadyOwned,
    /// The calling task tore the address space down itself, because deferred
    /// reclaim is disabled.
    ReclaimedInline,
    /// The address space was queued for a background worker.
    Deferred,
    /// The queue has been shut down, so the calling task tore the address
    /// space down itself.
    ReclaimedAfterShutdown,
    /// The calling task's teardown attempt failed; the address space was
    /// dropped regardless.
    TeardownFailed,
}

impl Retired {
    /// Returns `true` if the calling task became the reclaim owner.
    #[inline]
    pub fn is_owner(self) -> bool {
        !matches!(self, Retired::Shared { .. } | Retired::AlreadyOwned)
    }
}

/// The result of one unit of queued work run by [`Reaper::reap_one`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaped {
    /// The reclaimed address space.
    pub id: HandleId,
    /// The outcome of its (single) teardown attempt.
    pub outcome: Result<(), TeardownError>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Shared
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Phase {
    /// Owners queue their address spaces.
    Running,
    /// No new entries; workers drain what is left, then exit.
    Draining,
    /// No new entries; workers exit after their current batch.
    Stopping,
}

/// Which path performed a teardown.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Path {
    Inline,
    Deferred,
    Fallback,
}

/// Everything guarded by the coordinator's single lock.
#[derive(Debug)]
pub(crate) struct State<S> {
    pub(crate) arena: Arena<AddressSpace<S>>,
    pub(crate) queue: PendingQueue,
    pub(crate) phase: Phase,
}

impl<S> State<S> {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            queue: PendingQueue::new(),
            phase: Phase::Running,
        }
    }

    /// Pops the oldest queued address space and claims its payload.
    ///
    /// A popped entry is exclusively owned by the caller from then on.
    pub(crate) fn pop_claimed(&mut self) -> Option<(HandleId, S)> {
        while let Some(id) = self.queue.pop() {
            match self.arena.get_mut(id).and_then(AddressSpace::claim) {
                Some(space) => return Some((id, space)),
                None => error!(handle = %id, "queued address space has no payload, skipping"),
            }
        }

        None
    }
}

/// The state shared between the reaper and its workers.
pub(crate) struct Shared<M: MemoryManager> {
    pub(crate) state: Mutex<State<M::Space>>,
    /// Signalled whenever an entry is queued or the phase changes.
    pub(crate) work: Condvar,
    pub(crate) switch: ControlSwitch,
    pub(crate) stats: Stats,
    pub(crate) batch: usize,
    mm: M,
}

impl<M: MemoryManager> Shared<M> {
    /// Performs the single teardown attempt for `id`, then destroys the
    /// handle whether or not the attempt succeeded.
    ///
    /// A panicking teardown counts as a failed one, so the calling worker
    /// survives and moves on to the next entry.
    ///
    /// Must be called without holding the lock.
    pub(crate) fn reclaim(
        &self,
        id: HandleId,
        space: M::Space,
        path: Path,
    ) -> Result<(), TeardownError> {
        let res = panic::catch_unwind(AssertUnwindSafe(|| self.mm.teardown(space)))
            .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
        match &res {
            Ok(()) => {
                match path {
                    Path::Inline => self.stats.count_reclaimed_inline(),
                    Path::Deferred => self.stats.count_reclaimed_deferred(),
                    Path::Fallback => self.stats.count_fallback_reclaim(),
                }
                debug!(handle = %id, ?path, "address space torn down");
            }
            Err(e) => {
                self.stats.count_teardown_failure();
                error!(
                    handle = %id,
                    ?path,
                    leaked_pages = ?e.leaked_pages(),
                    "address space {}, dropping it without retry",
                    e
                );
            }
        }

        self.destroy(id);
        res
    }

    /// Gives a claimed address space back without tearing it down.
    pub(crate) fn abandon(&self, id: HandleId) {
        self.destroy(id);
        self.stats.count_abandoned();
        warn!(handle = %id, "abandoning queued address space at shutdown");
    }

    fn destroy(&self, id: HandleId) {
        let mut state = self.state.lock();
        if let Some(handle) = state.arena.get_mut(id) {
            debug_assert_eq!(handle.task_count, 0);
            handle.finish();
            state.arena.remove(id);
        }
    }
}

/// Converts the payload of a panicking teardown into a [`TeardownError`].
fn panicked(payload: &(dyn Any + Send)) -> TeardownError {
    let msg = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    TeardownError::new(format!("memory manager panicked ({})", msg))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Reaper
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Coordinates the at-most-once, possibly deferred teardown of address spaces
/// whose tasks are exiting.
///
/// A reaper is an explicitly owned object: it is started once, shared by
/// reference with the exiting tasks and shut down explicitly (or on drop,
/// using the configured [`ShutdownMode`]).
pub struct Reaper<M: MemoryManager> {
    shared: Arc<Shared<M>>,
    pool: WorkerPool,
    on_drop: ShutdownMode,
}

impl<M: MemoryManager> Reaper<M> {
    /// Starts a reaper and its pool of background workers.
    pub fn start(config: Config, mm: M) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new()),
            work: Condvar::new(),
            switch: ControlSwitch::new(config.reclaim),
            stats: Stats::default(),
            batch: config.batch_size(),
            mm,
        });

        let pool = WorkerPool::spawn(&shared, config.workers)?;
        info!(
            workers = config.workers,
            batch = shared.batch,
            "address space reaper started, deferred reclaim {}",
            config.reclaim
        );

        Ok(Self {
            shared,
            pool,
            on_drop: config.shutdown,
        })
    }

    /// Registers an address space shared by `task_count` live tasks.
    pub fn register(&self, space: M::Space, task_count: usize) -> Result<HandleId, Error> {
        if task_count == 0 {
            return Err(Error::EmptyRegistration);
        }

        let id = self
            .shared
            .state
            .lock()
            .arena
            .insert_with(|id| AddressSpace::new(id, space, task_count));
        self.shared.stats.count_registered();
        Ok(id)
    }

    /// Records that one more task shares the address space and returns the
    /// new task count.
    ///
    /// Fails once the address space has an owner, since no task can join an
    /// address space that is being torn down.
    pub fn attach_task(&self, id: HandleId) -> Result<usize, Error> {
        let mut state = self.shared.state.lock();
        let handle = state.arena.get_mut(id).ok_or(Error::UnknownHandle(id))?;
        if handle.is_reclaiming() || handle.task_count == 0 {
            return Err(Error::ReclaimStarted(id));
        }

        handle.task_count += 1;
        Ok(handle.task_count)
    }

    /// Retires the exiting `task` from the address space `id`.
    ///
    /// The task that retires last becomes the reclaim owner and either tears
    /// the address space down itself (deferred reclaim disabled, or the queue
    /// already shut down) or queues it for a worker and returns at once.
    /// Reclaim outcomes are never errors; only misuse (a stale handle or more
    /// retirements than tasks) is.
    pub fn retire_task(&self, id: HandleId, task: TaskId) -> Result<Retired, Error> {
        let (space, path) = {
            let mut state = self.shared.state.lock();
            let accepting = state.phase == Phase::Running;
            let State { arena, queue, .. } = &mut *state;
            let handle = arena.get_mut(id).ok_or(Error::UnknownHandle(id))?;

            handle.task_count = match handle.task_count.checked_sub(1) {
                Some(remaining) => remaining,
                None if handle.flags.contains(Flags::RECLAIM_IN_PROGRESS) => {
                    return Ok(self.race_lost(id, task, handle.owner));
                }
                None => return Err(Error::NoTasks(id)),
            };

            if handle.task_count > 0 {
                return Ok(Retired::Shared {
                    remaining: handle.task_count,
                });
            }

            if handle.flags.contains(Flags::RECLAIM_IN_PROGRESS) {
                return Ok(self.race_lost(id, task, handle.owner));
            }

            handle.flags.insert(Flags::RECLAIM_IN_PROGRESS);
            handle.owner = Some(task);

            // the mode is read exactly once, and is final for this handle
            let path = if !self.shared.switch.is_enabled() {
                Path::Inline
            } else if accepting {
                queue.push(handle);
                self.shared.stats.count_deferred();
                self.shared.work.notify_one();
                debug!(handle = %id, %task, "address space queued for reclaim");
                return Ok(Retired::Deferred);
            } else {
                debug!(handle = %id, %task, "reclaim queue shut down, reclaiming synchronously");
                Path::Fallback
            };

            match handle.claim() {
                Some(space) => (space, path),
                None => return Ok(self.race_lost(id, task, handle.owner)),
            }
        };

        Ok(match (self.shared.reclaim(id, space, path), path) {
            (Err(_), _) => Retired::TeardownFailed,
            (Ok(()), Path::Fallback) => Retired::ReclaimedAfterShutdown,
            (Ok(()), _) => Retired::ReclaimedInline,
        })
    }

    /// Runs one unit of queued work on the calling thread.
    ///
    /// Returns [`None`] if the queue is empty.
    pub fn reap_one(&self) -> Option<Reaped> {
        let (id, space) = self.shared.state.lock().pop_claimed()?;
        let outcome = self.shared.reclaim(id, space, Path::Deferred);
        Some(Reaped { id, outcome })
    }

    /// Stops accepting queued work and shuts the worker pool down.
    ///
    /// With [`ShutdownMode::Drain`] every queued address space is torn down
    /// before this returns; with [`ShutdownMode::Abandon`] the remaining ones
    /// are logged and handed back in the report. Address spaces whose last
    /// task exits afterwards are reclaimed synchronously by that task.
    /// Calling this again only processes whatever is still queued.
    pub fn shutdown(&self, mode: ShutdownMode) -> ShutdownReport<M::Space> {
        self.pool.shutdown(&self.shared, mode)
    }

    /// The administrative switch for deferred reclaim.
    #[inline]
    pub fn switch(&self) -> &ControlSwitch {
        &self.shared.switch
    }

    /// Returns the current state of the address space `id`, unless it has
    /// been destroyed.
    #[inline]
    pub fn snapshot(&self, id: HandleId) -> Option<HandleSnapshot> {
        self.shared.state.lock().arena.get(id).map(AddressSpace::snapshot)
    }

    /// Returns the queued address spaces, in reclaim order.
    #[inline]
    pub fn pending(&self) -> Vec<HandleId> {
        self.shared.state.lock().queue.iter().collect()
    }

    /// Returns the number of queued address spaces.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Returns the number of address spaces not yet destroyed.
    #[inline]
    pub fn live_handles(&self) -> usize {
        self.shared.state.lock().arena.len()
    }

    /// Returns the reaper's counters.
    #[inline]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn race_lost(&self, id: HandleId, task: TaskId, owner: Option<TaskId>) -> Retired {
        self.shared.stats.count_race_lost();
        debug!(handle = %id, %task, ?owner, "reclaim already owned");
        Retired::AlreadyOwned
    }
}

impl<M: MemoryManager> Drop for Reaper<M> {
    #[inline]
    fn drop(&mut self) {
        let report = self.shutdown(self.on_drop);
        if !report.abandoned.is_empty() {
            warn!(count = report.abandoned.len(), "dropping abandoned address spaces");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing_test::traced_test;

    use super::*;
    use crate::switch::ReclaimMode;

    /// Fails every address space numbered `FAIL` and panics on `PANIC`.
    #[derive(Default)]
    struct Counting(AtomicUsize);

    const FAIL: u32 = 13;
    const PANIC: u32 = 66;

    impl MemoryManager for Counting {
        type Space = u32;

        fn teardown(&self, space: u32) -> Result<(), TeardownError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if space == PANIC {
                panic!("corrupted page table at {:#x}", 0xdead_0000u32);
            } else if space == FAIL {
                Err(TeardownError::new("page table walk aborted").with_leaked_pages(4))
            } else {
                Ok(())
            }
        }
    }

    fn manual(reclaim: ReclaimMode) -> Reaper<Counting> {
        let config = Config {
            reclaim,
            workers: 0,
            ..Config::default()
        };
        Reaper::start(config, Counting::default()).unwrap()
    }

    fn teardowns(reaper: &Reaper<Counting>) -> usize {
        reaper.shared.mm.0.load(Ordering::SeqCst)
    }

    #[test]
    fn last_task_becomes_owner() {
        let reaper = manual(ReclaimMode::Enabled);
        let id = reaper.register(1, 4).unwrap();

        for (task, remaining) in (1..4).zip([3, 2, 1].iter()) {
            assert_eq!(
                reaper.retire_task(id, TaskId(task)).unwrap(),
                Retired::Shared { remaining: *remaining }
            );
        }
        assert_eq!(reaper.pending_len(), 0);

        assert_eq!(reaper.retire_task(id, TaskId(4)).unwrap(), Retired::Deferred);
        let snapshot = reaper.snapshot(id).unwrap();
        assert_eq!(snapshot.task_count, 0);
        assert_eq!(snapshot.owner, Some(TaskId(4)));
        assert!(snapshot.flags.contains(Flags::RECLAIM_IN_PROGRESS));
        assert!(snapshot.flags.contains(Flags::RECLAIM_QUEUED));
        assert_eq!(reaper.pending(), vec![id]);
        assert_eq!(teardowns(&reaper), 0);

        let reaped = reaper.reap_one().unwrap();
        assert_eq!(reaped, Reaped { id, outcome: Ok(()) });
        assert_eq!(teardowns(&reaper), 1);
        assert_eq!(reaper.snapshot(id), None);
        assert!(reaper.reap_one().is_none());
    }

    #[test]
    fn retire_after_ownership_is_rejected() {
        let reaper = manual(ReclaimMode::Enabled);
        let id = reaper.register(1, 1).unwrap();
        assert_eq!(reaper.retire_task(id, TaskId(1)).unwrap(), Retired::Deferred);
        assert_eq!(reaper.retire_task(id, TaskId(2)).unwrap(), Retired::AlreadyOwned);
        assert_eq!(reaper.stats().ownership_races_lost, 1);
        assert_eq!(reaper.pending_len(), 1);
    }

    #[test]
    fn disabled_reclaims_inline() {
        let reaper = manual(ReclaimMode::Disabled);
        let id = reaper.register(1, 2).unwrap();
        assert!(!reaper.retire_task(id, TaskId(1)).unwrap().is_owner());
        assert_eq!(reaper.retire_task(id, TaskId(2)).unwrap(), Retired::ReclaimedInline);

        assert_eq!(teardowns(&reaper), 1);
        assert_eq!(reaper.pending_len(), 0);
        assert_eq!(reaper.snapshot(id), None);
        assert_eq!(reaper.stats().reclaimed_inline, 1);
        assert_eq!(reaper.stats().deferred, 0);

        match reaper.retire_task(id, TaskId(3)) {
            Err(Error::UnknownHandle(stale)) => assert_eq!(stale, id),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn attach_task() {
        let reaper = manual(ReclaimMode::Enabled);
        let id = reaper.register(1, 1).unwrap();
        assert_eq!(reaper.attach_task(id).unwrap(), 2);
        assert_eq!(
            reaper.retire_task(id, TaskId(1)).unwrap(),
            Retired::Shared { remaining: 1 }
        );
        assert_eq!(reaper.retire_task(id, TaskId(2)).unwrap(), Retired::Deferred);
        assert!(matches!(reaper.attach_task(id), Err(Error::ReclaimStarted(_))));
    }

    #[test]
    fn empty_registration() {
        let reaper = manual(ReclaimMode::Enabled);
        assert!(matches!(reaper.register(1, 0), Err(Error::EmptyRegistration)));
        assert_eq!(reaper.live_handles(), 0);
    }

    #[traced_test]
    #[test]
    fn failed_teardown_is_logged_once() {
        let reaper = manual(ReclaimMode::Disabled);
        let id = reaper.register(FAIL, 1).unwrap();
        assert_eq!(reaper.retire_task(id, TaskId(1)).unwrap(), Retired::TeardownFailed);

        assert_eq!(teardowns(&reaper), 1);
        assert_eq!(reaper.snapshot(id), None);
        assert_eq!(reaper.stats().teardown_failures, 1);
        assert!(logs_contain("page table walk aborted"));
        assert!(logs_contain("dropping it without retry"));
    }

    #[traced_test]
    #[test]
    fn failed_deferred_teardown_is_not_requeued() {
        let reaper = manual(ReclaimMode::Enabled);
        let id = reaper.register(FAIL, 1).unwrap();
        assert_eq!(reaper.retire_task(id, TaskId(1)).unwrap(), Retired::Deferred);

        let reaped = reaper.reap_one().unwrap();
        assert_eq!(reaped.outcome.unwrap_err().leaked_pages(), Some(4));
        assert_eq!(reaper.pending_len(), 0);
        assert_eq!(reaper.live_handles(), 0);
        assert_eq!(teardowns(&reaper), 1);
        assert!(logs_contain("teardown failed"));
    }

    #[test]
    fn fallback_after_shutdown() {
        let reaper = manual(ReclaimMode::Enabled);
        let id = reaper.register(1, 1).unwrap();
        let report = reaper.shutdown(ShutdownMode::Drain);
        assert!(report.is_empty());

        assert_eq!(
            reaper.retire_task(id, TaskId(1)).unwrap(),
            Retired::ReclaimedAfterShutdown
        );
        assert_eq!(reaper.pending_len(), 0);
        assert_eq!(teardowns(&reaper), 1);
        assert_eq!(reaper.stats().fallback_reclaims, 1);
    }

    #[traced_test]
    #[test]
    fn panicking_teardown_counts_as_failure() {
        let reaper = manual(ReclaimMode::Disabled);
        let id = reaper.register(PANIC, 1).unwrap();
        assert_eq!(reaper.retire_task(id, TaskId(1)).unwrap(), Retired::TeardownFailed);

        assert_eq!(teardowns(&reaper), 1);
        assert_eq!(reaper.live_handles(), 0);
        assert_eq!(reaper.stats().teardown_failures, 1);
        assert!(logs_contain("memory manager panicked (corrupted page table at 0xdead0000)"));
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(
            panicked(&"static").reason(),
            "memory manager panicked (static)"
        );
        assert_eq!(
            panicked(&String::from("owned")).reason(),
            "memory manager panicked (owned)"
        );
        assert_eq!(
            panicked(&7u8).reason(),
            "memory manager panicked (unknown cause)"
        );
    }
}

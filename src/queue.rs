//! The FIFO hand-off between owning tasks and the reclaim workers.
//!
//! The queue stores identifiers only; queue membership is recorded in the
//! handle's [`RECLAIM_QUEUED`][Flags::RECLAIM_QUEUED] flag, and both are
//! mutated under the coordinator's single lock.

use std::collections::VecDeque;

use crate::handle::{AddressSpace, Flags, HandleId};

////////////////////////////////////////////////////////////////////////////////////////////////////
// PendingQueue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The queue of address spaces awaiting background reclaim, in the order
/// their last task exited.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    ids: VecDeque<HandleId>,
}

impl PendingQueue {
    /// Creates a new (empty) [`PendingQueue`].
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `handle` to the back of the queue and marks it as queued.
    ///
    /// Returns `false` and leaves the queue unchanged if the handle has
    /// already been queued once.
    #[inline]
    pub(crate) fn push<S>(&mut self, handle: &mut AddressSpace<S>) -> bool {
        if handle.flags.contains(Flags::RECLAIM_QUEUED) {
            return false;
        }

        handle.flags.insert(Flags::RECLAIM_QUEUED);
        self.ids.push_back(handle.id);
        true
    }

    /// Removes the oldest entry.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<HandleId> {
        self.ids.pop_front()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns an iterator over the queued identifiers, oldest first.
    #[inline]
    pub(crate) fn iter(&self) -> impl Iterator<Item = HandleId> + '_ {
        self.ids.iter().copied()
    }
}

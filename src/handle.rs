//! Per-address-space reclaim state and the identifiers used to refer to it.

use core::fmt;

////////////////////////////////////////////////////////////////////////////////////////////////////
// HandleId
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A stable identifier for a registered address space.
///
/// Identifiers are never reused: once the handle has been destroyed, its slot
/// may be recycled for another address space but any outstanding [`HandleId`]
/// for the old one is detected as stale.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for HandleId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mm#{}.{}", self.index, self.generation)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// TaskId
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The identity of an exiting task (thread).
///
/// This only identifies a task, it never keeps one alive.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(pub u64);

impl From<u64> for TaskId {
    #[inline]
    fn from(tid: u64) -> Self {
        Self(tid)
    }
}

impl fmt::Display for TaskId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "task {}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Flags
////////////////////////////////////////////////////////////////////////////////////////////////////

const IN_PROGRESS_BIT: u8 = 0b01;
const QUEUED_BIT: u8 = 0b10;

/// The coordination flags of an address space.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Flags(u8);

impl Flags {
    /// Some task has become the reclaim owner of the address space.
    pub const RECLAIM_IN_PROGRESS: Self = Self(IN_PROGRESS_BIT);
    /// The address space has been handed to the pending queue.
    pub const RECLAIM_QUEUED: Self = Self(QUEUED_BIT);

    /// Returns the empty set of flags.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns `true` if all flags in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub(crate) fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl fmt::Display for Flags {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (
            self.contains(Self::RECLAIM_IN_PROGRESS),
            self.contains(Self::RECLAIM_QUEUED),
        ) {
            (false, false) => write!(f, "idle"),
            (true, false) => write!(f, "in progress"),
            (false, true) => write!(f, "queued"),
            (true, true) => write!(f, "in progress, queued"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AddressSpace
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The reclaim state of one address space, always accessed under the
/// coordinator's lock.
#[derive(Debug)]
pub(crate) struct AddressSpace<S> {
    pub(crate) id: HandleId,
    pub(crate) task_count: usize,
    pub(crate) flags: Flags,
    pub(crate) owner: Option<TaskId>,
    /// The payload handed to the memory manager, present until the single
    /// teardown attempt claims it.
    space: Option<S>,
}

impl<S> AddressSpace<S> {
    #[inline]
    pub(crate) fn new(id: HandleId, space: S, task_count: usize) -> Self {
        Self {
            id,
            task_count,
            flags: Flags::empty(),
            owner: None,
            space: Some(space),
        }
    }

    /// Returns `true` if reclaim is underway or queued.
    #[inline]
    pub(crate) fn is_reclaiming(&self) -> bool {
        self.flags.contains(Flags::RECLAIM_IN_PROGRESS)
            || self.flags.contains(Flags::RECLAIM_QUEUED)
    }

    /// Takes the payload out for its teardown.
    ///
    /// Returns [`None`] if the payload has already been claimed.
    #[inline]
    pub(crate) fn claim(&mut self) -> Option<S> {
        debug_assert!(self.flags.contains(Flags::RECLAIM_IN_PROGRESS));
        self.space.take()
    }

    /// Clears the flags and the owner once reclaim has completed, right
    /// before the handle is destroyed.
    #[inline]
    pub(crate) fn finish(&mut self) {
        self.flags.remove(Flags::RECLAIM_IN_PROGRESS);
        self.flags.remove(Flags::RECLAIM_QUEUED);
        self.owner = None;
    }

    #[inline]
    pub(crate) fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            id: self.id,
            task_count: self.task_count,
            flags: self.flags,
            owner: self.owner,
            claimed: self.space.is_none(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// HandleSnapshot
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A point-in-time copy of an address space's reclaim state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HandleSnapshot {
    /// The handle's identifier.
    pub id: HandleId,
    /// The number of live tasks still sharing the address space.
    pub task_count: usize,
    /// The current coordination flags.
    pub flags: Flags,
    /// The task responsible for driving reclaim to completion, if any.
    pub owner: Option<TaskId>,
    /// `true` once the teardown attempt has taken the payload.
    pub claimed: bool,
}

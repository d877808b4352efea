//! The interface to the host memory manager that actually frees an address
//! space.

use thiserror::Error;

/// The host memory manager's teardown primitive.
///
/// The address space is passed by value, so it can be handed to
/// [`teardown`][MemoryManager::teardown] at most once.
pub trait MemoryManager: Send + Sync + 'static {
    /// Whatever the memory manager needs to walk and free one address space.
    type Space: Send + 'static;

    /// Releases all mappings and physical memory backing `space`.
    ///
    /// Implementations need not be idempotent; a failed attempt is logged by
    /// the caller and never retried.
    fn teardown(&self, space: Self::Space) -> Result<(), TeardownError>;
}

/// The memory manager could not completely free an address space.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("teardown failed: {reason}")]
pub struct TeardownError {
    reason: String,
    leaked_pages: Option<u64>,
}

impl TeardownError {
    /// Creates a new [`TeardownError`] with the given `reason`.
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            leaked_pages: None,
        }
    }

    /// Records how many pages could not be released.
    #[inline]
    pub fn with_leaked_pages(mut self, pages: u64) -> Self {
        self.leaked_pages = Some(pages);
        self
    }

    /// The reason given by the memory manager.
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The number of pages left behind, if known.
    #[inline]
    pub fn leaked_pages(&self) -> Option<u64> {
        self.leaked_pages
    }
}

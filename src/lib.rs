//! Asynchronous, at-most-once teardown of the address spaces of terminated
//! processes.
//!
//! When a process is killed, each of its exiting threads retires itself from
//! the shared address space. Exactly one of them, the last, becomes the
//! *reclaim owner*; every other thread returns immediately. The owner hands
//! the address space to a FIFO queue drained by background workers, so the
//! bulk of the teardown work happens off the exit path. If deferred reclaim
//! is switched off, the owner tears the address space down itself.
//!
//! The actual freeing of pages is left to the host memory manager, see
//! [`MemoryManager`].
//!
//! # Example
//!
//! ```
//! use mmreap::{Config, MemoryManager, Reaper, Retired, TaskId, TeardownError};
//!
//! struct Host;
//!
//! impl MemoryManager for Host {
//!     type Space = Vec<u8>;
//!
//!     fn teardown(&self, space: Vec<u8>) -> Result<(), TeardownError> {
//!         drop(space);
//!         Ok(())
//!     }
//! }
//!
//! let reaper = Reaper::start(Config::default(), Host).unwrap();
//! let mm = reaper.register(vec![0; 4096], 2).unwrap();
//!
//! assert_eq!(reaper.retire_task(mm, TaskId(1)).unwrap(), Retired::Shared { remaining: 1 });
//! assert_eq!(reaper.retire_task(mm, TaskId(2)).unwrap(), Retired::Deferred);
//!
//! let report = reaper.shutdown(Default::default());
//! assert!(report.abandoned.is_empty());
//! assert_eq!(reaper.live_handles(), 0);
//! ```

#![warn(missing_docs)]

mod arena;
mod coordinator;
mod queue;
mod stats;

pub mod config;
pub mod error;
pub mod handle;
pub mod switch;
pub mod teardown;
pub mod worker;

pub use crate::config::Config;
pub use crate::coordinator::{Reaped, Reaper, Retired};
pub use crate::error::Error;
pub use crate::handle::{Flags, HandleId, HandleSnapshot, TaskId};
pub use crate::stats::StatsSnapshot;
pub use crate::switch::{ControlSwitch, ReclaimMode};
pub use crate::teardown::{MemoryManager, TeardownError};
pub use crate::worker::{ShutdownMode, ShutdownReport};

//! Non-blocking suspension and locking primitives for cooperative tasks.
//!
//! This crate provides two tightly coupled primitives for code that must
//! cooperate with polling-style subsystems without ever parking an
//! operating-system thread:
//!
//! - [`Suspension`]: an atomic wakeup counter plus a stored resumption
//!   handle. Wake signals are counted, never lost, regardless of how
//!   notifying and suspending interleave. [`waiting::wait_for`] builds on
//!   it to turn a polling probe into a suspendable task.
//! - [`SharedLock`]: an asynchronous shared/exclusive lock. Acquisition
//!   always returns synchronously with a future that is either already
//!   resolved or resolves when a release posts its activation continuation
//!   to an injected [`Scheduler`]. Queued requests activate in FIFO order;
//!   compatible shared requests activate together as a batch.
//!
//! "Waiting" anywhere in this crate is pure state — an unresolved future in
//! a queue, or a parked waker inside a [`Suspension`] — so the primitives
//! compose with any executor that can run posted callbacks.
//!
//! # Example
//!
//! ```
//! use parkless::{InlineScheduler, SharedLock};
//!
//! let lock = SharedLock::new(InlineScheduler);
//!
//! // An idle lock grants immediately; the guard releases on drop.
//! let mut guard = lock.try_lock_exclusive().expect("idle");
//! assert!(guard.is_exclusive());
//! guard.unlock();
//!
//! // Shared access coalesces.
//! let a = lock.try_lock_shared().expect("idle");
//! let b = lock.try_lock_shared().expect("coalesces");
//! assert_eq!(lock.active_holders(), 2);
//! drop((a, b));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod lock;
mod macros;
pub mod scheduler;
pub mod suspension;
pub mod test_logging;
pub mod test_utils;
pub mod util;
pub mod waiting;

pub use lock::{Access, LockFuture, LockGuard, SharedLock, TryLockError};
pub use scheduler::{InlineScheduler, Job, ManualScheduler, Scheduler};
pub use suspension::{Suspension, WaitFuture};
pub use waiting::wait_for;

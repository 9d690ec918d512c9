//! Scheduler boundary used to defer lock continuations.
//!
//! The lock never runs caller code itself: when a release activates queued
//! requests, it posts one continuation per activated request to a
//! [`Scheduler`] and returns. The scheduler decides where and when those
//! continuations run.
//!
//! The capability is deliberately tiny — "queue a zero-argument callback
//! for eventual execution" — and is injected at lock construction rather
//! than reached through a global. Continuations posted by a single release
//! are posted in order; no ordering is promised across releases.

use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::fmt;

/// Deferred unit of work posted by the lock.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability to queue a job for eventual execution.
///
/// Implementations may run jobs on any thread, at any later time, but must
/// run every posted job exactly once.
pub trait Scheduler: Send + Sync {
    /// Queues `job` for later execution.
    fn post(&self, job: Job);
}

/// Any sharable closure taking a [`Job`] is a scheduler. This lets tests
/// and embedders hand a capture straight to the lock.
impl<F> Scheduler for F
where
    F: Fn(Job) + Send + Sync,
{
    fn post(&self, job: Job) {
        self(job);
    }
}

/// Scheduler that runs every job immediately on the posting thread.
///
/// Continuations then execute inside the releasing call. That is correct —
/// the lock posts only after its internal state is settled — but it means
/// woken tasks may be polled re-entrantly from `unlock`, so prefer a
/// deferring scheduler when continuations do real work.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn post(&self, job: Job) {
        job();
    }
}

/// Scheduler that queues jobs for explicit, deterministic draining.
///
/// Nothing runs until [`run_one`](ManualScheduler::run_one) or
/// [`run_all`](ManualScheduler::run_all) is called, which makes activation
/// batches observable: after a release, [`pending`](ManualScheduler::pending)
/// is exactly the number of requests the release activated.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: ParkingMutex<VecDeque<Job>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Runs the oldest queued job, if any. Returns whether a job ran.
    ///
    /// The queue lock is released before the job executes, so jobs may post
    /// further jobs.
    pub fn run_one(&self) -> bool {
        let job = self.jobs.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs queued jobs until the queue is empty, including jobs posted
    /// while draining. Returns how many jobs ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn post(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

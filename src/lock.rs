//! Scheduler-driven shared/exclusive lock that never parks a thread.
//!
//! [`SharedLock`] grants read (shared) or write (exclusive) access to a
//! logical resource without ever blocking: [`lock_shared`] and
//! [`lock_exclusive`] always return synchronously with a [`LockFuture`]
//! that is either already resolved or resolves later, when a release posts
//! its activation continuation to the injected [`Scheduler`].
//!
//! # Admission policy
//!
//! | Lock state                 | Shared request        | Exclusive request |
//! |----------------------------|-----------------------|-------------------|
//! | Unlocked, queue empty      | immediate grant       | immediate grant   |
//! | Shared active, queue empty | immediate grant (coalesce) | enqueue      |
//! | Exclusive active           | enqueue               | enqueue           |
//! | Queue non-empty            | enqueue               | enqueue           |
//!
//! Requests that cannot take the fast path queue in strict FIFO order. A
//! shared request never coalesces past a queued exclusive request — the
//! queue being non-empty always means an exclusive request is waiting at or
//! ahead of the front — which bounds writer starvation.
//!
//! # Activation
//!
//! Releasing the last active holder pops the longest compatible run at the
//! queue front: a single exclusive node, or the maximal contiguous run of
//! shared nodes. The run is computed synchronously inside the releasing
//! call, under the same critical section that made the admission decision;
//! one continuation per activated node is then posted to the scheduler.
//! No caller code runs inside the critical section.
//!
//! # What this lock is not
//!
//! There is no cancellation or timeout: once a request queues, it resolves
//! when the holders ahead release. Acquisition is infallible — the futures
//! yield a plain [`LockGuard`], not a `Result`. The lock must outlive its
//! pending futures and guards.

use parking_lot::Mutex as ParkingMutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Waker};

use crate::scheduler::Scheduler;

/// Error returned when trying to acquire without queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    /// The fast path was unavailable: an incompatible holder is active or
    /// requests are queued ahead.
    Locked,
}

impl fmt::Display for TryLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "lock is held or has queued requests"),
        }
    }
}

impl std::error::Error for TryLockError {}

/// Access mode of a request or guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Shared (read) access; compatible with other shared holders.
    Shared,
    /// Exclusive (write) access; compatible with nothing.
    Exclusive,
}

// Slot lifecycle. QUEUED -> GRANTED happens in the activation continuation,
// GRANTED -> CONSUMED when the future resolves into a guard. ABANDONED is
// set by dropping an unresolved future whose node already left the queue.
const QUEUED: u8 = 0;
const GRANTED: u8 = 1;
const CONSUMED: u8 = 2;
const ABANDONED: u8 = 3;

/// Promise half of a queued request, shared between the queue and the
/// future that owns the request.
#[derive(Debug)]
struct NodeSlot {
    state: AtomicU8,
    waker: ParkingMutex<Option<Waker>>,
}

impl NodeSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(QUEUED),
            waker: ParkingMutex::new(None),
        })
    }

    /// Activation continuation body: mark the slot granted and wake the
    /// future if it is being polled somewhere.
    fn grant(&self) {
        if self
            .state
            .compare_exchange(QUEUED, GRANTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let waker = self.waker.lock().take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
        // ABANDONED: the future was dropped after activation and its drop
        // already handed the grant back; nothing to do here.
    }
}

#[derive(Debug)]
struct Node {
    id: u64,
    access: Access,
    slot: Arc<NodeSlot>,
}

#[derive(Debug)]
struct LockState {
    /// True while the single active holder is exclusive.
    exclusive: bool,
    /// Active holders: the shared count, or 1 for an exclusive holder.
    active: usize,
    /// FIFO admission queue of requests that missed the fast path.
    queue: VecDeque<Node>,
    next_node_id: u64,
}

/// An asynchronous shared/exclusive lock driven by an external scheduler.
///
/// See the [module docs](self) for the admission and activation protocol.
pub struct SharedLock<S> {
    scheduler: S,
    state: ParkingMutex<LockState>,
}

impl<S: Scheduler> SharedLock<S> {
    /// Creates an unlocked lock that posts its activation continuations to
    /// `scheduler`.
    pub fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            state: ParkingMutex::new(LockState {
                exclusive: false,
                active: 0,
                queue: VecDeque::new(),
                next_node_id: 0,
            }),
        }
    }

    /// Returns the injected scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// True while any holder (shared or exclusive) is active.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().active > 0
    }

    /// Number of currently active holders.
    #[must_use]
    pub fn active_holders(&self) -> usize {
        self.state.lock().active
    }

    /// Number of requests waiting in the admission queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Requests shared access.
    ///
    /// Returns synchronously. The future is already resolved when the lock
    /// is unlocked, or when shared holders are active and nothing is queued
    /// ahead; otherwise the request joins the FIFO queue.
    pub fn lock_shared(&self) -> LockFuture<'_, S> {
        let mut state = self.state.lock();
        if state.queue.is_empty() && (state.active == 0 || !state.exclusive) {
            state.exclusive = false;
            state.active += 1;
            drop(state);
            return LockFuture::ready(self, Access::Shared);
        }
        self.enqueue(state, Access::Shared)
    }

    /// Requests exclusive access.
    ///
    /// Returns synchronously. The future is already resolved only when the
    /// lock is unlocked with an empty queue; otherwise the request joins
    /// the FIFO queue.
    pub fn lock_exclusive(&self) -> LockFuture<'_, S> {
        let mut state = self.state.lock();
        if state.queue.is_empty() && state.active == 0 {
            state.exclusive = true;
            state.active = 1;
            drop(state);
            return LockFuture::ready(self, Access::Exclusive);
        }
        self.enqueue(state, Access::Exclusive)
    }

    /// Takes shared access if the fast path is available, without queueing.
    ///
    /// Fails whenever `lock_shared` would enqueue, so a try-acquire never
    /// jumps ahead of queued requests.
    pub fn try_lock_shared(&self) -> Result<LockGuard<'_, S>, TryLockError> {
        let mut state = self.state.lock();
        if state.queue.is_empty() && (state.active == 0 || !state.exclusive) {
            state.exclusive = false;
            state.active += 1;
            drop(state);
            return Ok(LockGuard::new(self, Access::Shared));
        }
        Err(TryLockError::Locked)
    }

    /// Takes exclusive access if the lock is idle, without queueing.
    pub fn try_lock_exclusive(&self) -> Result<LockGuard<'_, S>, TryLockError> {
        let mut state = self.state.lock();
        if state.queue.is_empty() && state.active == 0 {
            state.exclusive = true;
            state.active = 1;
            drop(state);
            return Ok(LockGuard::new(self, Access::Exclusive));
        }
        Err(TryLockError::Locked)
    }

    fn enqueue(
        &self,
        mut state: parking_lot::MutexGuard<'_, LockState>,
        access: Access,
    ) -> LockFuture<'_, S> {
        let id = state.next_node_id;
        state.next_node_id += 1;
        let slot = NodeSlot::new();
        state.queue.push_back(Node {
            id,
            access,
            slot: Arc::clone(&slot),
        });
        drop(state);
        LockFuture {
            lock: self,
            inner: FutureInner::Queued { id, access, slot },
        }
    }

    /// Releases one holder. When the last active holder leaves, dequeues
    /// the next compatible run and posts one continuation per activated
    /// request.
    fn release(&self) {
        let batch: SmallVec<[Arc<NodeSlot>; 4]> = {
            let mut state = self.state.lock();
            debug_assert!(state.active > 0, "release without an active holder");
            state.active -= 1;
            if state.active > 0 {
                // Other shared holders remain; no queue activity.
                return;
            }
            state.exclusive = false;

            let mut batch = SmallVec::new();
            match state.queue.front().map(|node| node.access) {
                None => {}
                Some(Access::Exclusive) => {
                    let node = state.queue.pop_front().expect("front checked above");
                    state.exclusive = true;
                    state.active = 1;
                    batch.push(node.slot);
                }
                Some(Access::Shared) => {
                    // Maximal contiguous shared run, stopping at the first
                    // exclusive node or the end of the queue.
                    while state
                        .queue
                        .front()
                        .is_some_and(|node| node.access == Access::Shared)
                    {
                        let node = state.queue.pop_front().expect("front checked above");
                        batch.push(node.slot);
                    }
                    state.active = batch.len();
                }
            }
            batch
        };

        // The run was decided under the state lock; execution of the
        // continuations is the scheduler's business.
        for slot in batch {
            self.scheduler.post(Box::new(move || slot.grant()));
        }
    }

    #[cfg(test)]
    fn debug_state(&self) -> (bool, usize, usize) {
        let state = self.state.lock();
        (state.exclusive, state.active, state.queue.len())
    }
}

impl<S> fmt::Debug for SharedLock<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SharedLock")
            .field("exclusive", &state.exclusive)
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}

enum FutureInner<'a, S: Scheduler> {
    /// Fast-path admission: the guard already exists.
    Ready(LockGuard<'a, S>),
    /// Queued admission: resolves when the slot is granted.
    Queued {
        id: u64,
        access: Access,
        slot: Arc<NodeSlot>,
    },
    Done,
}

/// Future returned by [`SharedLock::lock_shared`] and
/// [`SharedLock::lock_exclusive`].
///
/// Resolves to a [`LockGuard`]; acquisition cannot fail. Dropping an
/// unresolved future withdraws the request: if its activation already
/// raced ahead, the grant is handed straight back to the lock so the
/// protocol never stalls.
#[must_use = "futures do nothing unless polled"]
pub struct LockFuture<'a, S: Scheduler> {
    lock: &'a SharedLock<S>,
    inner: FutureInner<'a, S>,
}

impl<'a, S: Scheduler> LockFuture<'a, S> {
    fn ready(lock: &'a SharedLock<S>, access: Access) -> Self {
        Self {
            lock,
            inner: FutureInner::Ready(LockGuard::new(lock, access)),
        }
    }

    /// True if the next poll will return the guard without waiting.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        match &self.inner {
            FutureInner::Ready(_) => true,
            FutureInner::Queued { slot, .. } => slot.state.load(Ordering::Acquire) == GRANTED,
            FutureInner::Done => false,
        }
    }
}

impl<'a, S: Scheduler> Future for LockFuture<'a, S> {
    type Output = LockGuard<'a, S>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.inner, FutureInner::Done) {
            FutureInner::Ready(guard) => Poll::Ready(guard),
            FutureInner::Queued { id, access, slot } => {
                if slot.state.load(Ordering::Acquire) == GRANTED {
                    return Poll::Ready(Self::consume(this.lock, access, &slot));
                }
                {
                    let mut stored = slot.waker.lock();
                    match &mut *stored {
                        Some(existing) if existing.will_wake(cx.waker()) => {}
                        Some(existing) => existing.clone_from(cx.waker()),
                        stored @ None => *stored = Some(cx.waker().clone()),
                    }
                }
                // The grant may have fired between the state load and the
                // waker store; re-check so the wake is never missed.
                if slot.state.load(Ordering::Acquire) == GRANTED {
                    return Poll::Ready(Self::consume(this.lock, access, &slot));
                }
                this.inner = FutureInner::Queued { id, access, slot };
                Poll::Pending
            }
            FutureInner::Done => panic!("LockFuture polled after completion"),
        }
    }
}

impl<'a, S: Scheduler> LockFuture<'a, S> {
    fn consume(lock: &'a SharedLock<S>, access: Access, slot: &NodeSlot) -> LockGuard<'a, S> {
        let taken =
            slot.state
                .compare_exchange(GRANTED, CONSUMED, Ordering::AcqRel, Ordering::Acquire);
        debug_assert!(taken.is_ok(), "grant consumed twice");
        LockGuard::new(lock, access)
    }
}

impl<S: Scheduler> Drop for LockFuture<'_, S> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.inner, FutureInner::Done) {
            // Dropping the guard inside releases normally.
            FutureInner::Ready(_guard) => {}
            FutureInner::Done => {}
            FutureInner::Queued { id, slot, .. } => {
                let removed = {
                    let mut state = self.lock.state.lock();
                    let before = state.queue.len();
                    state.queue.retain(|node| node.id != id);
                    before != state.queue.len()
                };
                if removed {
                    // Never activated; withdrawing the node is enough.
                    return;
                }
                // The node already left the queue for activation, so a
                // grant belongs to this future whether or not the posted
                // continuation has run yet. Hand it straight back.
                let prior = slot.state.swap(ABANDONED, Ordering::AcqRel);
                debug_assert!(
                    prior == QUEUED || prior == GRANTED,
                    "abandoned future in impossible slot state {prior}"
                );
                self.lock.release();
            }
        }
    }
}

impl<S: Scheduler> fmt::Debug for LockFuture<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            FutureInner::Ready(_) => "ready",
            FutureInner::Queued { .. } => "queued",
            FutureInner::Done => "done",
        };
        f.debug_struct("LockFuture").field("state", &state).finish()
    }
}

/// RAII token for held lock access.
///
/// Move-only; moving the guard transfers release responsibility. Releasing
/// happens exactly once, through the first of [`unlock`](LockGuard::unlock)
/// or drop — a second `unlock` is a safe no-op.
#[must_use = "guard releases the lock immediately if not held"]
pub struct LockGuard<'a, S: Scheduler> {
    lock: &'a SharedLock<S>,
    access: Access,
    released: bool,
}

impl<'a, S: Scheduler> LockGuard<'a, S> {
    fn new(lock: &'a SharedLock<S>, access: Access) -> Self {
        Self {
            lock,
            access,
            released: false,
        }
    }

    /// The access mode this guard holds.
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// True for a write guard.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.access == Access::Exclusive
    }

    /// Releases the guard, activating the next compatible run.
    ///
    /// Idempotent: only the first call (or the drop, if `unlock` was never
    /// called) performs the release.
    pub fn unlock(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.release();
        }
    }
}

impl<S: Scheduler> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl<S: Scheduler> fmt::Debug for LockGuard<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("access", &self.access)
            .field("released", &self.released)
            .finish()
    }
}

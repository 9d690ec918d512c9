//! Atomic suspension counter bridging wake signals to a parked task.
//!
//! [`Suspension`] connects code that reports readiness by calling
//! [`notify`](Suspension::notify) to a single task that parks itself by
//! awaiting [`wait`](Suspension::wait). Signals are counted, never dropped:
//! for any interleaving of a notify with a concurrent suspend attempt,
//! either the notify resumes the parked task or the suspend attempt observes
//! the already-recorded signal and completes without parking.
//!
//! # Counter protocol
//!
//! The whole protocol lives in one signed counter:
//!
//! - `0` — idle: no pending signals, nobody parked.
//! - `-1` — suspended: a task is parked and its waker is stored.
//! - `n > 0` — pending: `n` signals recorded since the last drain.
//!
//! Both sides drive the counter with compare-and-swap loops. The two racing
//! transitions (`-1 -> 1` on a winning notify, `0 -> -1` on a successful
//! park) are what make the primitive lossless, so they stay CAS-based rather
//! than hiding behind a coarse mutex.
//!
//! # Single waiter
//!
//! At most one [`WaitFuture`] may be outstanding per `Suspension` at a time.
//! This is a caller obligation checked by a debug assertion, not a
//! recoverable error path. Any number of threads may notify concurrently.

use parking_lot::Mutex as ParkingMutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll, Waker};

/// Counter value marking a parked waiter.
const SUSPENDED: i64 = -1;

/// Wakeup-counting suspension point.
///
/// Created once per logical waiter context and reused across many
/// suspend/resume cycles.
#[derive(Debug)]
pub struct Suspension {
    /// `0` idle, `-1` suspended, `n > 0` pending signals.
    counter: AtomicI64,
    /// Resumption handle. Only meaningful while `counter == -1`; the park
    /// path stores it before publishing the `-1`, so a notifier that wins
    /// the resume transition always observes it.
    waker: ParkingMutex<Option<Waker>>,
}

impl Suspension {
    /// Creates a new suspension point in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicI64::new(0),
            waker: ParkingMutex::new(None),
        }
    }

    /// Records one wake signal.
    ///
    /// If a task is currently parked, resumes it and returns `true`; the
    /// wake may run arbitrary task code on the calling thread, depending on
    /// the executor. Otherwise the signal is added to the pending count and
    /// `false` is returned.
    ///
    /// Concurrent callers are safe: exactly one of them wins the resume
    /// transition for a given suspension, the rest count their signals.
    pub fn notify(&self) -> bool {
        let mut current = self.counter.load(Ordering::Acquire);
        loop {
            if current == SUSPENDED {
                match self.counter.compare_exchange_weak(
                    SUSPENDED,
                    1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let waker = self.waker.lock().take();
                        if let Some(waker) = waker {
                            waker.wake();
                        }
                        return true;
                    }
                    Err(observed) => current = observed,
                }
            } else {
                match self.counter.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return false,
                    Err(observed) => current = observed,
                }
            }
        }
    }

    /// Returns a future that resolves to the number of signals recorded
    /// since the last drain.
    ///
    /// If signals are already pending, the future is immediately ready and
    /// no suspension happens. Otherwise the task parks until the next
    /// [`notify`](Self::notify).
    ///
    /// Calling this while a previous `WaitFuture` from the same suspension
    /// is still outstanding violates the single-waiter precondition.
    pub fn wait(&self) -> WaitFuture<'_> {
        WaitFuture {
            suspension: self,
            parked: false,
            done: false,
        }
    }

    #[cfg(test)]
    fn debug_counter(&self) -> i64 {
        self.counter.load(Ordering::Acquire)
    }
}

impl Default for Suspension {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`Suspension::wait`].
///
/// Resolves to the number of notifications accumulated since the counter
/// was last drained (always at least 1).
#[derive(Debug)]
pub struct WaitFuture<'a> {
    suspension: &'a Suspension,
    /// Whether this future published the `-1` marker.
    parked: bool,
    done: bool,
}

impl Future for WaitFuture<'_> {
    type Output = i64;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i64> {
        assert!(!self.done, "WaitFuture polled after completion");
        let this = &mut *self;

        let mut current = this.suspension.counter.load(Ordering::Acquire);
        loop {
            if current > 0 {
                // Drain: reset to idle and report how many signals landed.
                match this.suspension.counter.compare_exchange_weak(
                    current,
                    0,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        this.parked = false;
                        this.done = true;
                        return Poll::Ready(current);
                    }
                    Err(observed) => current = observed,
                }
            } else if current == SUSPENDED {
                // Only our own earlier poll can have published the marker.
                debug_assert!(
                    this.parked,
                    "a previous WaitFuture on this Suspension is still outstanding"
                );
                {
                    let mut slot = this.suspension.waker.lock();
                    match &mut *slot {
                        Some(existing) if existing.will_wake(cx.waker()) => {}
                        Some(existing) => existing.clone_from(cx.waker()),
                        slot @ None => *slot = Some(cx.waker().clone()),
                    }
                }
                // A notify may have won the resume transition between the
                // counter load and the waker refresh; re-check before
                // reporting Pending.
                current = this.suspension.counter.load(Ordering::Acquire);
                if current == SUSPENDED {
                    return Poll::Pending;
                }
            } else {
                // Idle. Store the resumption handle first so a notifier
                // that wins `-1 -> 1` is guaranteed to see it, then try to
                // park. Losing the CAS means a signal just landed; loop
                // around and drain it instead of suspending.
                *this.suspension.waker.lock() = Some(cx.waker().clone());
                match this.suspension.counter.compare_exchange(
                    0,
                    SUSPENDED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        this.parked = true;
                        return Poll::Pending;
                    }
                    Err(observed) => current = observed,
                }
            }
        }
    }
}

impl Drop for WaitFuture<'_> {
    fn drop(&mut self) {
        if self.parked && !self.done {
            // Withdraw the parked marker so the suspension can be reused.
            // If a notify already won the resume transition, the counter is
            // positive and those signals stay pending for the next waiter.
            if self
                .suspension
                .counter
                .compare_exchange(SUSPENDED, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.suspension.waker.lock().take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;
    use std::task::Wake;
    use std::thread;

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
        fn wake_by_ref(self: &Arc<Self>) {}
    }

    fn noop_waker() -> Waker {
        Arc::new(NoopWaker).into()
    }

    fn poll_once<F>(fut: &mut F) -> Poll<F::Output>
    where
        F: Future + Unpin,
    {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(fut).poll(&mut cx)
    }

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn notify_before_wait_resolves_immediately() {
        init_test("notify_before_wait_resolves_immediately");
        let suspension = Suspension::new();

        let stored = suspension.notify();
        crate::assert_with_log!(!stored, "no waiter to resume", false, stored);
        let stored = suspension.notify();
        crate::assert_with_log!(!stored, "still no waiter", false, stored);

        let mut fut = suspension.wait();
        let drained = poll_once(&mut fut);
        crate::assert_with_log!(
            drained == Poll::Ready(2),
            "both signals drained at once",
            Poll::Ready(2),
            drained
        );

        let counter = suspension.debug_counter();
        crate::assert_with_log!(counter == 0, "counter reset after drain", 0i64, counter);
        crate::test_complete!("notify_before_wait_resolves_immediately");
    }

    #[test]
    fn notify_resumes_parked_waiter() {
        init_test("notify_resumes_parked_waiter");
        let suspension = Suspension::new();

        let mut fut = suspension.wait();
        let pending = poll_once(&mut fut).is_pending();
        crate::assert_with_log!(pending, "waiter parks on empty counter", true, pending);

        let resumed = suspension.notify();
        crate::assert_with_log!(resumed, "notify wins the resume transition", true, resumed);

        let drained = poll_once(&mut fut);
        crate::assert_with_log!(
            drained == Poll::Ready(1),
            "resumed waiter drains one signal",
            Poll::Ready(1),
            drained
        );
        crate::test_complete!("notify_resumes_parked_waiter");
    }

    #[test]
    fn signals_after_resume_accumulate() {
        init_test("signals_after_resume_accumulate");
        let suspension = Suspension::new();

        let mut fut = suspension.wait();
        assert!(poll_once(&mut fut).is_pending());

        let resumed = suspension.notify();
        crate::assert_with_log!(resumed, "first notify resumes", true, resumed);
        // Further notifies before the waiter drains pile onto the count.
        let resumed_again = suspension.notify();
        crate::assert_with_log!(!resumed_again, "second notify only counts", false, resumed_again);

        let drained = poll_once(&mut fut);
        crate::assert_with_log!(
            drained == Poll::Ready(2),
            "drain reports both signals",
            Poll::Ready(2),
            drained
        );
        crate::test_complete!("signals_after_resume_accumulate");
    }

    #[test]
    fn dropped_parked_waiter_resets_to_idle() {
        init_test("dropped_parked_waiter_resets_to_idle");
        let suspension = Suspension::new();

        {
            let mut fut = suspension.wait();
            assert!(poll_once(&mut fut).is_pending());
        }

        let counter = suspension.debug_counter();
        crate::assert_with_log!(counter == 0, "marker withdrawn on drop", 0i64, counter);

        // A signal stored after the drop goes to the next waiter.
        let resumed = suspension.notify();
        crate::assert_with_log!(!resumed, "nobody parked after drop", false, resumed);
        let mut fut = suspension.wait();
        let drained = poll_once(&mut fut);
        crate::assert_with_log!(
            drained == Poll::Ready(1),
            "next waiter gets the stored signal",
            Poll::Ready(1),
            drained
        );
        crate::test_complete!("dropped_parked_waiter_resets_to_idle");
    }

    #[test]
    fn notify_during_drop_race_keeps_signal_pending() {
        init_test("notify_during_drop_race_keeps_signal_pending");
        let suspension = Suspension::new();

        let mut fut = suspension.wait();
        assert!(poll_once(&mut fut).is_pending());

        // Resume transition fires before the future is dropped: the signal
        // must survive the drop and be visible to the next waiter.
        let resumed = suspension.notify();
        crate::assert_with_log!(resumed, "notify resumes parked waiter", true, resumed);
        drop(fut);

        let mut next = suspension.wait();
        let drained = poll_once(&mut next);
        crate::assert_with_log!(
            drained == Poll::Ready(1),
            "signal survived the dropped waiter",
            Poll::Ready(1),
            drained
        );
        crate::test_complete!("notify_during_drop_race_keeps_signal_pending");
    }

    struct FlagWaker(std::sync::atomic::AtomicBool);

    impl Wake for FlagWaker {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::Release);
        }
    }

    #[test]
    fn repolling_refreshes_the_stored_waker() {
        init_test("repolling_refreshes_the_stored_waker");
        let suspension = Suspension::new();
        let mut fut = suspension.wait();

        let first = Arc::new(FlagWaker(false.into()));
        let second = Arc::new(FlagWaker(false.into()));

        let waker: Waker = Arc::clone(&first).into();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

        // A later poll with a different waker must replace the stored one.
        let waker: Waker = Arc::clone(&second).into();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

        let resumed = suspension.notify();
        crate::assert_with_log!(resumed, "notify resumes the waiter", true, resumed);
        let first_woken = first.0.load(Ordering::Acquire);
        crate::assert_with_log!(!first_woken, "stale waker untouched", false, first_woken);
        let second_woken = second.0.load(Ordering::Acquire);
        crate::assert_with_log!(second_woken, "latest waker woken", true, second_woken);

        let drained = poll_once(&mut fut);
        crate::assert_with_log!(
            drained == Poll::Ready(1),
            "waiter drains the signal",
            Poll::Ready(1),
            drained
        );
        crate::test_complete!("repolling_refreshes_the_stored_waker");
    }

    #[test]
    fn no_lost_wakeups_under_concurrent_notifiers() {
        init_test("no_lost_wakeups_under_concurrent_notifiers");
        const NOTIFIERS: u64 = 4;
        const SIGNALS_EACH: u64 = 1000;

        let suspension = Arc::new(Suspension::new());
        let resumes = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..NOTIFIERS {
            let suspension = Arc::clone(&suspension);
            let resumes = Arc::clone(&resumes);
            handles.push(thread::spawn(move || {
                for _ in 0..SIGNALS_EACH {
                    if suspension.notify() {
                        resumes.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }

        // Drain on the main thread until every signal is accounted for.
        let total = NOTIFIERS * SIGNALS_EACH;
        let mut collected: i64 = 0;
        while (collected as u64) < total {
            let mut fut = suspension.wait();
            loop {
                match poll_once(&mut fut) {
                    Poll::Ready(n) => {
                        collected += n;
                        break;
                    }
                    Poll::Pending => thread::yield_now(),
                }
            }
        }

        for handle in handles {
            handle.join().expect("notifier thread panicked");
        }

        crate::assert_with_log!(
            collected as u64 == total,
            "every signal counted exactly once",
            total,
            collected as u64
        );
        let counter = suspension.debug_counter();
        crate::assert_with_log!(counter == 0, "counter idle after drain", 0i64, counter);
        crate::test_complete!("no_lost_wakeups_under_concurrent_notifiers");
    }
}

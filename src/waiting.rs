//! Adapter turning polling probes into suspendable tasks.
//!
//! Some subsystems report "cannot complete yet" by returning `None` from a
//! probe instead of blocking or suspending. [`wait_for`] converts such a
//! probe into a task that suspends through a [`Suspension`] between
//! attempts, so the caller neither busy-polls nor misses a wakeup.
//!
//! The signal accounting matters: a wakeup that lands between a failed probe
//! and the subsequent park is recorded by the suspension counter, and the
//! adapter's retry budget consumes exactly the recorded signals. The budget
//! is never zero (a resolved wait always reports at least one signal) and
//! never open-ended (each retry spends one signal), so stale signals are
//! eventually consumed instead of looped over forever.

use crate::suspension::Suspension;

/// Runs `probe` until it yields a value, suspending between attempts.
///
/// Whoever makes the probed condition true must call
/// [`Suspension::notify`] on the same `suspension` afterwards; each notify
/// buys the probe one retry.
///
/// The single-waiter rule of [`Suspension`] applies to the returned task:
/// only one `wait_for` (or other waiter) may be pending on a given
/// suspension at a time.
///
/// # Example
///
/// ```
/// use parkless::suspension::Suspension;
/// use parkless::waiting::wait_for;
///
/// let suspension = Suspension::new();
/// let mut attempts = 0;
/// suspension.notify();
/// let task = wait_for(&suspension, || {
///     attempts += 1;
///     (attempts > 1).then_some(attempts)
/// });
/// // Drive `task` on any executor; it completes once the probe succeeds.
/// # let _ = task;
/// ```
pub async fn wait_for<T, F>(suspension: &Suspension, mut probe: F) -> T
where
    F: FnMut() -> Option<T>,
{
    if let Some(value) = probe() {
        return value;
    }
    loop {
        let signals = suspension.wait().await;
        for _ in 0..signals {
            if let Some(value) = probe() {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::future::Future;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll, Wake, Waker};
    use std::thread;

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
        fn wake_by_ref(self: &Arc<Self>) {}
    }

    fn noop_waker() -> Waker {
        Arc::new(NoopWaker).into()
    }

    fn poll_until_ready<T>(future: impl Future<Output = T>) -> T {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);
        loop {
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(value) => return value,
                Poll::Pending => thread::yield_now(),
            }
        }
    }

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn immediate_value_skips_suspension() {
        init_test("immediate_value_skips_suspension");
        let suspension = Suspension::new();
        let mut calls = 0;

        let value = poll_until_ready(wait_for(&suspension, || {
            calls += 1;
            Some(7)
        }));

        crate::assert_with_log!(value == 7, "probe value returned", 7, value);
        crate::assert_with_log!(calls == 1, "single probe call", 1, calls);
        crate::test_complete!("immediate_value_skips_suspension");
    }

    #[test]
    fn retry_budget_matches_recorded_signals() {
        init_test("retry_budget_matches_recorded_signals");
        let suspension = Suspension::new();
        // Two signals recorded before the adapter runs.
        suspension.notify();
        suspension.notify();

        let mut calls = 0;
        let value = poll_until_ready(wait_for(&suspension, || {
            calls += 1;
            // Fails on the initial probe and the first budgeted retry,
            // succeeds on the second retry.
            (calls == 3).then_some(calls)
        }));

        crate::assert_with_log!(value == 3, "value from third probe", 3, value);
        crate::assert_with_log!(calls == 3, "initial probe plus two retries", 3, calls);
        crate::test_complete!("retry_budget_matches_recorded_signals");
    }

    #[test]
    fn exhausted_budget_suspends_again() {
        init_test("exhausted_budget_suspends_again");
        let suspension = Arc::new(Suspension::new());
        let flag = Arc::new(AtomicBool::new(false));

        // One stale signal that does not correspond to the condition; the
        // adapter must burn it and suspend again rather than spin.
        suspension.notify();

        let notifier = {
            let suspension = Arc::clone(&suspension);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(20));
                flag.store(true, Ordering::Release);
                suspension.notify();
            })
        };

        let flag_probe = Arc::clone(&flag);
        let value = poll_until_ready(wait_for(&suspension, || {
            flag_probe.load(Ordering::Acquire).then_some(42)
        }));

        notifier.join().expect("notifier thread panicked");
        crate::assert_with_log!(value == 42, "adapter saw the condition", 42, value);
        crate::test_complete!("exhausted_budget_suspends_again");
    }
}

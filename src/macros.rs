//! Logging-aware assertion and phase macros for tests.
//!
//! Every test opens with [`test_phase!`] and closes with
//! [`test_complete!`]; assertions go through [`assert_with_log!`] so the
//! failure context ends up in the test transcript rather than only in the
//! panic message.
//!
//! [`test_phase!`]: crate::test_phase
//! [`test_complete!`]: crate::test_complete
//! [`assert_with_log!`]: crate::assert_with_log

/// Marks the start of a named test phase in the test log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_logging::log_event(
            $crate::test_logging::TestLogLevel::Info,
            &format!("=== begin: {} ===", $name),
        )
    };
}

/// Marks successful completion of a named test phase in the test log.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_logging::log_event(
            $crate::test_logging::TestLogLevel::Info,
            &format!("=== complete: {} ===", $name),
        )
    };
}

/// Asserts `$cond`, logging the check with its expected and actual values.
///
/// Successful checks are recorded at trace level; failures are logged at
/// error level before panicking, so the transcript shows exactly which
/// check broke and with what values.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        if $cond {
            $crate::test_logging::log_event(
                $crate::test_logging::TestLogLevel::Trace,
                &format!("ok: {} (value {:?})", $what, $actual),
            );
        } else {
            $crate::test_logging::log_event(
                $crate::test_logging::TestLogLevel::Error,
                &format!(
                    "FAILED: {} (expected {:?}, actual {:?})",
                    $what, $expected, $actual
                ),
            );
            panic!(
                "assertion failed: {} (expected {:?}, actual {:?})",
                $what, $expected, $actual
            );
        }
    }};
}

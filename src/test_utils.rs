//! Shared helpers for unit and integration tests.

use std::sync::Once;

use crate::test_logging::{self, TestLogLevel};

static INIT: Once = Once::new();

/// Installs the global test logger once per process, honoring
/// `TEST_LOG_LEVEL`. Safe to call from every test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        test_logging::install(TestLogLevel::from_env());
    });
}

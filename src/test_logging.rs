//! Test logging infrastructure.
//!
//! Captures timestamped, leveled records from tests so that failures in
//! interleaving-sensitive tests can be diagnosed from the log alone. The
//! verbosity is configured once per process through the `TEST_LOG_LEVEL`
//! environment variable (`error`, `warn`, `info`, `debug`, `trace`).
//!
//! Tests do not use this module directly; they go through
//! [`crate::test_utils::init_test_logging`] and the [`test_phase!`],
//! [`test_complete!`] and [`assert_with_log!`] macros.
//!
//! [`test_phase!`]: crate::test_phase
//! [`test_complete!`]: crate::test_complete
//! [`assert_with_log!`]: crate::assert_with_log

use std::sync::{Mutex, OnceLock};
use std::time::Instant;

/// Logging verbosity, ordered from least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// Only failures.
    Error,
    /// Warnings and above.
    Warn,
    /// Test progress markers.
    #[default]
    Info,
    /// Detailed protocol steps.
    Debug,
    /// Everything, including per-assertion records.
    Trace,
}

impl TestLogLevel {
    /// Human-readable name for the level.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Reads the level from `TEST_LOG_LEVEL`, defaulting to `Info`.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

impl std::str::FromStr for TestLogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TestLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Process-wide logger for tests.
#[derive(Debug)]
pub struct TestLogger {
    level: TestLogLevel,
    start: Instant,
    records: Mutex<Vec<String>>,
}

impl TestLogger {
    fn new(level: TestLogLevel) -> Self {
        Self {
            level,
            start: Instant::now(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Records `message` at `level`; echoes to stderr when the configured
    /// verbosity admits it.
    pub fn log(&self, level: TestLogLevel, message: &str) {
        let line = format!(
            "[{:>10.3?}] {:5} {message}",
            self.start.elapsed(),
            level.name()
        );
        if level <= self.level {
            eprintln!("{line}");
        }
        self.records
            .lock()
            .expect("test logger poisoned")
            .push(line);
    }

    /// Full transcript of everything recorded so far, regardless of the
    /// configured echo level.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.records
            .lock()
            .expect("test logger poisoned")
            .join("\n")
    }
}

static LOGGER: OnceLock<TestLogger> = OnceLock::new();

/// Installs the global logger at `level`. Later calls keep the first
/// configuration.
pub fn install(level: TestLogLevel) {
    let _ = LOGGER.set(TestLogger::new(level));
}

/// The global logger, installing one from the environment on first use.
pub fn global() -> &'static TestLogger {
    LOGGER.get_or_init(|| TestLogger::new(TestLogLevel::from_env()))
}

/// Records `message` at `level` on the global logger.
pub fn log_event(level: TestLogLevel, message: &str) {
    global().log(level, message);
}

//! Test utilities for filament's unit tests.
//!
//! - Consistent tracing-based logging initialization
//! - A lock serializing tests that mutate environment variables
//! - [`run_on_scheduler`], running a test body as the main context of a
//!   fresh thread with a [`RoundRobin`] installed

use crate::runtime::{RoundRobin, RuntimeBuilder};
use std::panic;
use std::sync::{Arc, Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Runs `f` on a new thread that has a default [`RoundRobin`] installed.
/// Fibers still pending when `f` returns are unwound before the thread exits.
/// A panic inside `f`, or inside a fiber that `f` joins, fails the calling
/// test.
pub fn run_on_scheduler<F>(f: F)
where
    F: FnOnce(&Arc<RoundRobin>) + Send + 'static,
{
    init_test_logging();
    let outcome = std::thread::Builder::new()
        .name("filament-test-main".into())
        .spawn(move || {
            let scheduler = RuntimeBuilder::new()
                .install()
                .expect("install test scheduler");
            f(&scheduler);
            scheduler.shutdown();
        })
        .expect("spawn test thread")
        .join();
    if let Err(payload) = outcome {
        panic::resume_unwind(payload);
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

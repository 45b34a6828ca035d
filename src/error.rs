//! Error types and error handling strategy for filament.
//!
//! Error handling follows these principles:
//!
//! - Recoverable failures are explicit and typed, surfaced as [`Error`]
//! - Errors raised by fiber bodies and packaged callables are captured and
//!   re-raised unchanged to whoever observes the result
//! - Contract violations inside the runtime (resuming a terminated fiber,
//!   releasing join waiters twice) are not errors: they panic
//! - Forced unwind is not an [`Error`] at all; user code cannot match on it
//!
//! # Error Categories
//!
//! - **Future**: promise/future protocol misuse and broken promises
//! - **Task**: packaged-task misuse
//! - **Fiber**: interruption, panics, joins and migration
//! - **Resource**: stack and execution-context provisioning
//! - **Config**: configuration and environment parsing
//! - **User**: errors produced by user code

use core::fmt;
use std::sync::Arc;

use crate::types::FiberId;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Future / promise ===
    /// The future has no shared state, or its value was already taken.
    FutureUninitialized,
    /// A future was already produced from this promise or task.
    FutureAlreadyRetrieved,
    /// The promise already holds a value or an error.
    PromiseAlreadySatisfied,
    /// The promise was moved from and has no shared state.
    PromiseUninitialized,
    /// The producer went away without storing a result.
    BrokenPromise,

    // === Packaged task ===
    /// The packaged task was already invoked.
    TaskAlreadyStarted,
    /// The packaged task was moved from.
    TaskMoved,

    // === Fiber ===
    /// Interruption was requested and observed at an interruption point.
    Interrupted,
    /// A fiber body or packaged callable panicked.
    Panicked,
    /// Migration of a fiber that is running or already terminated.
    InvalidMigration,
    /// A fiber tried to join itself.
    DeadlockWouldOccur,
    /// The fiber handle was already joined or detached.
    NotJoinable,
    /// No scheduling algorithm is installed on the calling thread.
    NoScheduler,

    // === Resources ===
    /// The stack provider refused the request.
    StackAllocation,
    /// The execution context could not be created.
    ContextCreation,

    // === Configuration ===
    /// Invalid configuration value.
    Config,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::FutureUninitialized
            | Self::FutureAlreadyRetrieved
            | Self::PromiseAlreadySatisfied
            | Self::PromiseUninitialized
            | Self::BrokenPromise => ErrorCategory::Future,
            Self::TaskAlreadyStarted | Self::TaskMoved => ErrorCategory::Task,
            Self::Interrupted
            | Self::Panicked
            | Self::InvalidMigration
            | Self::DeadlockWouldOccur
            | Self::NotJoinable
            | Self::NoScheduler => ErrorCategory::Fiber,
            Self::StackAllocation | Self::ContextCreation => ErrorCategory::Resource,
            Self::Config => ErrorCategory::Config,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns true if the failure came from a usage error in the
    /// promise/future/task protocol rather than from the producer's result.
    #[must_use]
    pub const fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Self::FutureUninitialized
                | Self::FutureAlreadyRetrieved
                | Self::PromiseAlreadySatisfied
                | Self::PromiseUninitialized
                | Self::TaskAlreadyStarted
                | Self::TaskMoved
        )
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Promise/future failures.
    Future,
    /// Packaged-task failures.
    Task,
    /// Fiber lifecycle failures.
    Fiber,
    /// Stack or context provisioning failures.
    Resource,
    /// Configuration failures.
    Config,
    /// User-originated errors.
    User,
}

/// The main error type for filament operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    fiber: Option<FiberId>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            fiber: None,
        }
    }

    /// Wraps an error produced by user code.
    ///
    /// The original error is kept as the source and can be recovered with
    /// [`Error::downcast_ref`].
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User).with_source(source)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error reports an observed interruption.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    /// Returns true if this error reports a broken promise.
    #[must_use]
    pub const fn is_broken_promise(&self) -> bool {
        matches!(self.kind, ErrorKind::BrokenPromise)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Records the fiber the error originated in.
    #[must_use]
    pub fn with_fiber(mut self, fiber: FiberId) -> Self {
        self.fiber = Some(fiber);
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the fiber the error originated in, if recorded.
    #[must_use]
    pub const fn fiber(&self) -> Option<FiberId> {
        self.fiber
    }

    /// Returns the wrapped source error if it has type `E`.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref()?.downcast_ref::<E>()
    }

    /// Creates an interruption error.
    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted)
    }

    /// Creates a broken-promise error.
    #[must_use]
    pub fn broken_promise() -> Self {
        Self::new(ErrorKind::BrokenPromise)
    }

    /// Creates an error from a caught panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(ErrorKind::Panicked).with_message(message)
    }

    /// Creates a "no scheduler installed" error.
    #[must_use]
    pub fn no_scheduler() -> Self {
        Self::new(ErrorKind::NoScheduler)
            .with_message("no scheduling algorithm installed on this thread")
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(fiber) = self.fiber {
            write!(f, " (in {fiber})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for filament operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug, PartialEq)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::TaskMoved);
        assert_eq!(err.to_string(), "TaskMoved");
    }

    #[test]
    fn display_with_message_and_fiber() {
        let err = Error::new(ErrorKind::Panicked)
            .with_message("boom")
            .with_fiber(FiberId::new_for_test(7));
        assert_eq!(err.to_string(), "Panicked: boom (in Fiber#7)");
    }

    #[test]
    fn user_error_keeps_identity() {
        let err = Error::user(Underlying);
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(err.downcast_ref::<Underlying>(), Some(&Underlying));
        assert_eq!(err.source().expect("source missing").to_string(), "underlying");

        // Clones share the same source.
        let copy = err.clone();
        assert!(copy.downcast_ref::<Underlying>().is_some());
    }

    #[test]
    fn panicked_extracts_payload_text() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("bad state");
        let err = Error::panicked(payload.as_ref());
        assert_eq!(err.message(), Some("bad state"));

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(Error::panicked(payload.as_ref()).message(), Some("owned"));

        let payload: Box<dyn std::any::Any + Send> = Box::new(17_u8);
        assert_eq!(
            Error::panicked(payload.as_ref()).message(),
            Some("non-string panic payload")
        );
    }

    #[test]
    fn categories_group_kinds() {
        assert_eq!(ErrorKind::BrokenPromise.category(), ErrorCategory::Future);
        assert_eq!(ErrorKind::TaskMoved.category(), ErrorCategory::Task);
        assert_eq!(ErrorKind::Interrupted.category(), ErrorCategory::Fiber);
        assert_eq!(ErrorKind::StackAllocation.category(), ErrorCategory::Resource);
        assert!(ErrorKind::FutureAlreadyRetrieved.is_protocol_misuse());
        assert!(!ErrorKind::BrokenPromise.is_protocol_misuse());
    }

    #[test]
    fn result_ext_adds_message() {
        let res: core::result::Result<(), ErrorKind> = Err(ErrorKind::Config);
        let err = res.context("bad stack size").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.to_string(), "Config: bad stack size");
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Error::interrupted().is_interrupted());
        assert!(!Error::interrupted().is_broken_promise());
        assert!(Error::broken_promise().is_broken_promise());
    }
}

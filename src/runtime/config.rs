//! Runtime configuration types.
//!
//! These types hold the concrete values that drive scheduler and fiber
//! behavior. In most cases you should use
//! [`RuntimeBuilder`](super::builder::RuntimeBuilder) rather than creating a
//! [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `stack_size` | 256 KiB |
//! | `preserve_fpu` | false |
//! | `idle_park` | 1 ms |

use std::time::Duration;

use crate::context::stack::DEFAULT_STACK_SIZE;
use crate::error::{Error, ErrorKind};

/// Default time an idle scheduler parks before polling again.
pub const DEFAULT_IDLE_PARK: Duration = Duration::from_millis(1);

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size handed to each new fiber (default: 256 KiB).
    pub stack_size: usize,
    /// Whether new fibers preserve floating-point state on switch.
    pub preserve_fpu: bool,
    /// How long an idle scheduler parks before polling again.
    pub idle_park: Duration,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.stack_size == 0 {
            self.stack_size = DEFAULT_STACK_SIZE;
        }
        if self.idle_park.is_zero() {
            self.idle_park = DEFAULT_IDLE_PARK;
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            preserve_fpu: false,
            idle_park: DEFAULT_IDLE_PARK,
        }
    }
}

/// Configuration errors raised while reading the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value found.
        value: String,
        /// Expected type description.
        expected: &'static str,
    },
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config).with_source(err)
    }
}

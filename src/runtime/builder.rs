//! Runtime builder.
//!
//! [`RuntimeBuilder`] assembles a [`RoundRobin`] scheduler from a
//! [`RuntimeConfig`], an optional custom stack allocator and an optional idle
//! hook, and installs it on the calling thread.

use std::sync::Arc;
use std::time::Duration;

use crate::context::stack::{DefaultStackAllocator, StackAllocator};
use crate::error::Result;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::env_config::apply_env_overrides;
use crate::runtime::round_robin::{IdleHook, RoundRobin};

/// Which configuration fields were set through builder methods.
#[derive(Debug, Clone, Copy, Default)]
struct Explicit {
    stack_size: bool,
    preserve_fpu: bool,
    idle_park: bool,
}

impl Explicit {
    const ALL: Self = Self {
        stack_size: true,
        preserve_fpu: true,
        idle_park: true,
    };
}

/// Builder for a thread's scheduler.
///
/// Values set through builder methods win over `FILAMENT_*` environment
/// variables regardless of call order; the environment wins over defaults.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    explicit: Explicit,
    allocator: Option<Arc<dyn StackAllocator>>,
    idle: Option<IdleHook>,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            explicit: Explicit::default(),
            allocator: None,
            idle: None,
        }
    }

    /// Start from an explicit configuration. Every field counts as set
    /// programmatically.
    #[must_use]
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            explicit: Explicit::ALL,
            ..Self::new()
        }
    }

    /// Set the default fiber stack size.
    #[must_use]
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self.explicit.stack_size = true;
        self
    }

    /// Preserve floating-point state on fiber switches by default.
    #[must_use]
    pub fn preserve_fpu(mut self, preserve: bool) -> Self {
        self.config.preserve_fpu = preserve;
        self.explicit.preserve_fpu = true;
        self
    }

    /// Set how long an idle scheduler parks before polling again.
    #[must_use]
    pub fn idle_park(mut self, timeout: Duration) -> Self {
        self.config.idle_park = timeout;
        self.explicit.idle_park = true;
        self
    }

    /// Use a custom stack allocator.
    #[must_use]
    pub fn stack_allocator(mut self, allocator: Arc<dyn StackAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Register work to run when no fiber is ready. The hook returns whether
    /// it did anything.
    #[must_use]
    pub fn on_idle<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.idle = Some(Box::new(f));
        self
    }

    /// Apply `FILAMENT_*` environment variable overrides to every field not
    /// set through a builder method, before or after this call.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error if a variable is set to a value
    /// that does not parse.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        let mut env = self.config.clone();
        apply_env_overrides(&mut env)?;
        let RuntimeConfig {
            stack_size,
            preserve_fpu,
            idle_park,
        } = env;
        if !self.explicit.stack_size {
            self.config.stack_size = stack_size;
        }
        if !self.explicit.preserve_fpu {
            self.config.preserve_fpu = preserve_fpu;
        }
        if !self.explicit.idle_park {
            self.config.idle_park = idle_park;
        }
        Ok(self)
    }

    /// Returns the configuration collected so far.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a scheduler without installing it.
    #[must_use]
    pub fn build(self) -> Arc<RoundRobin> {
        let allocator = self
            .allocator
            .unwrap_or_else(|| Arc::new(DefaultStackAllocator::new()));
        RoundRobin::with_parts(self.config, allocator, self.idle)
    }

    /// Build a scheduler and install it on the calling thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread already has a scheduler.
    pub fn install(self) -> Result<Arc<RoundRobin>> {
        let scheduler = self.build();
        crate::runtime::install(scheduler.clone())?;
        Ok(scheduler)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Environment variable support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`stack_size(64 * 1024)`)
//! 2. **Environment variables**: values from `FILAMENT_*` env vars
//! 3. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FILAMENT_STACK_SIZE` | `usize` | `stack_size` |
//! | `FILAMENT_PRESERVE_FPU` | `bool` | `preserve_fpu` |
//! | `FILAMENT_IDLE_PARK_MS` | `u64` | `idle_park` |

use std::time::Duration;

use crate::runtime::config::{ConfigError, RuntimeConfig};

/// Environment variable name for the fiber stack size.
pub const ENV_STACK_SIZE: &str = "FILAMENT_STACK_SIZE";
/// Environment variable name for floating-point preservation.
pub const ENV_PRESERVE_FPU: &str = "FILAMENT_PRESERVE_FPU";
/// Environment variable name for the idle park interval in milliseconds.
pub const ENV_IDLE_PARK_MS: &str = "FILAMENT_IDLE_PARK_MS";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_STACK_SIZE) {
        config.stack_size = parse_usize(ENV_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_PRESERVE_FPU) {
        config.preserve_fpu = parse_bool(ENV_PRESERVE_FPU, &val)?;
    }
    if let Some(val) = read_env(ENV_IDLE_PARK_MS) {
        config.idle_park = Duration::from_millis(parse_u64(ENV_IDLE_PARK_MS, &val)?);
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var: &'static str, val: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidEnv {
        var,
        value: val.to_string(),
        expected,
    }
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var, val, "unsigned integer"))
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| invalid(var, val, "u64"))
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, val, "bool (true/false/1/0/yes/no)")),
    }
}

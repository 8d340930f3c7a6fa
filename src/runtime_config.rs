//! # Runtime Configuration Module
//!
//! Environment-variable configuration for the coroutine runtime.
//!
//! ## Environment Variables
//!
//! - `MAYFLY_STACK_SIZE`: stack size for handler coroutines, decimal
//!   (`16384`) or hex (`0x4000`). Default: `0x4000` (16 KB). Handlers here
//!   parse bodies and render templates, so the default leaves headroom; tune
//!   down for trivial handlers at very high concurrency.
//! - `MAYFLY_WORKERS`: worker threads for the `may` scheduler. Default: `0`,
//!   meaning the runtime picks.
//!
//! Load once at startup and [`apply`](RuntimeConfig::apply) before any
//! handler is registered; `may` reads its config when coroutines spawn.

use std::env;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for handler coroutines in bytes (default: 16 KB / 0x4000).
    pub stack_size: usize,
    /// Scheduler worker threads (0 = runtime default).
    pub workers: usize,
}

pub const DEFAULT_STACK_SIZE: usize = 0x4000;

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        RuntimeConfig {
            stack_size: parse_size(env::var("MAYFLY_STACK_SIZE").ok().as_deref()),
            workers: env::var("MAYFLY_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }

    /// Push the settings into the `may` global config.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
        if self.workers > 0 {
            may::config().set_workers(self.workers);
        }
        tracing::debug!(
            stack_size = self.stack_size,
            workers = self.workers,
            "runtime config applied"
        );
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: DEFAULT_STACK_SIZE,
            workers: 0,
        }
    }
}

fn parse_size(val: Option<&str>) -> usize {
    match val {
        Some(v) => {
            if let Some(hex) = v.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
            } else {
                v.parse().unwrap_or(DEFAULT_STACK_SIZE)
            }
        }
        None => DEFAULT_STACK_SIZE,
    }
}

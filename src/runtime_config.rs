//! Environment-variable runtime configuration.
//!
//! ## Environment Variables
//!
//! - `ARBOR_STACK_SIZE` — stack size for worker coroutines, decimal or
//!   `0x`-prefixed hex. Default `0x10000` (64 KB).
//! - `ARBOR_SCAN_INTERVAL_MS` — hot-deploy scan interval in milliseconds.
//!   Default 15000.

use std::env;
use std::time::Duration;

use crate::deploy::DEFAULT_SCAN_INTERVAL;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for worker coroutines in bytes.
    pub stack_size: usize,
    /// Pause between hot-deploy scans.
    pub scan_interval: Duration,
}

fn parse_usize(val: &str) -> Option<usize> {
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = env::var("ARBOR_STACK_SIZE")
            .ok()
            .and_then(|v| parse_usize(&v))
            .unwrap_or(0x10000);
        let scan_interval = env::var("ARBOR_SCAN_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SCAN_INTERVAL);
        RuntimeConfig {
            stack_size,
            scan_interval,
        }
    }
}

//! Router limits and timings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Safety limits and housekeeping timings for the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Hard ceiling on collaboration rounds
    pub max_rounds_emergency: u32,
    /// Hard ceiling on provider-reported tokens per session
    pub max_tokens_emergency: u64,
    /// Hard ceiling on session wall-clock time, in minutes
    pub max_elapsed_minutes: u64,
    /// Publish a long-running advisory every N rounds
    pub soft_warn_interval: u32,
    /// Ceiling on nested agent calls per session
    pub max_call_depth: u32,
    /// How long an ended session stays discoverable, in milliseconds
    pub cleanup_grace_ms: u64,
    /// Round cap for bounded sessions started without one
    pub default_max_rounds: u32,
    /// Transcript entries exposed to connectors
    pub context_window: usize,
    /// Single-mode call ids remembered by the hop tracker
    pub hop_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rounds_emergency: 200,
            max_tokens_emergency: 200_000,
            max_elapsed_minutes: 20,
            soft_warn_interval: 25,
            max_call_depth: 50,
            cleanup_grace_ms: 3_000,
            default_max_rounds: 6,
            context_window: 8,
            hop_capacity: 1024,
        }
    }
}

impl RouterConfig {
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_minutes * 60)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

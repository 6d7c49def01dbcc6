//! Configuration model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level dapmux configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DapmuxConfig {
    /// Timeout budgets, in milliseconds.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Trace collection limits.
    #[serde(default)]
    pub traces: TraceConfig,
    /// Per-language adapter command overrides, keyed by language tag.
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,
}

/// Timeout budgets. Every request has a bound; nothing silently hangs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Default per-request timeout.
    pub request_ms: u64,
    /// How long to wait for the deferred `launch` response.
    pub launch_wait_ms: u64,
    /// How long to wait for the adapter's `initialized` event.
    pub initialized_event_ms: u64,
    /// Timeout for `disconnect` during teardown.
    pub disconnect_ms: u64,
    /// Timeout for each step of a child-session handshake.
    pub child_handshake_ms: u64,
    /// Timeout for scraping a TCP adapter's listen address.
    pub port_scrape_ms: u64,
    /// Default timeout for wait-for-pause synchronization.
    pub pause_wait_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            launch_wait_ms: 2_000,
            initialized_event_ms: 10_000,
            disconnect_ms: 5_000,
            child_handshake_ms: 5_000,
            port_scrape_ms: 10_000,
            pause_wait_ms: 10_000,
        }
    }
}

/// Trace collection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    /// Per-session trace ring size; oldest entries drop beyond this.
    pub buffer_cap: usize,
    /// How many locals each trace snapshot keeps.
    pub variables_per_trace: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            buffer_cap: 10_000,
            variables_per_trace: 100,
        }
    }
}

/// Override for one language's adapter command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterConfig {
    /// Replacement executable.
    pub command: Option<String>,
    /// Replacement argument list.
    pub args: Option<Vec<String>>,
}

impl DapmuxConfig {
    /// Reject configurations that would disable required bounds.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        if self.timeouts.request_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.request_ms must be > 0".into(),
            ));
        }
        if self.timeouts.disconnect_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.disconnect_ms must be > 0".into(),
            ));
        }
        if self.timeouts.child_handshake_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.child_handshake_ms must be > 0".into(),
            ));
        }
        if self.timeouts.port_scrape_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.port_scrape_ms must be > 0".into(),
            ));
        }
        if self.traces.buffer_cap == 0 {
            return Err(ConfigError::Invalid("traces.buffer_cap must be > 0".into()));
        }
        if self.traces.variables_per_trace == 0 {
            return Err(ConfigError::Invalid(
                "traces.variables_per_trace must be > 0".into(),
            ));
        }
        Ok(())
    }
}

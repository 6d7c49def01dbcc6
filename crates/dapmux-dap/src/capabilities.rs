//! Adapter capability tracking.

use crate::protocol::Capabilities;

/// Resolved capabilities of the debug adapter, stored as plain booleans.
///
/// Requests guarded by a capability (`configurationDone`,
/// `setFunctionBreakpoints`, `setExceptionBreakpoints`, `terminate`) become
/// no-ops when the adapter does not advertise support.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// Whether the adapter supports `configurationDone`.
    pub configuration_done: bool,
    /// Whether the adapter supports function breakpoints.
    pub function_breakpoints: bool,
    /// Whether the adapter supports conditional breakpoints.
    pub conditional_breakpoints: bool,
    /// Whether the adapter supports hit-count breakpoints.
    pub hit_conditional_breakpoints: bool,
    /// Whether the adapter supports logpoints.
    pub log_points: bool,
    /// Whether the adapter advertises any exception filters.
    pub exception_filters: bool,
    /// Whether the adapter supports the `terminate` request.
    pub terminate: bool,
    /// Whether the adapter supports `evaluate` for hovers.
    pub evaluate_for_hovers: bool,
    /// Whether the adapter supports setting variable values.
    pub set_variable: bool,
}

impl AdapterCapabilities {
    /// Resolve from the protocol-level [`Capabilities`] returned by the
    /// adapter in the `initialize` response.
    pub fn from_initialize_response(caps: &Capabilities) -> Self {
        Self {
            configuration_done: caps.supports_configuration_done_request.unwrap_or(false),
            function_breakpoints: caps.supports_function_breakpoints.unwrap_or(false),
            conditional_breakpoints: caps.supports_conditional_breakpoints.unwrap_or(false),
            hit_conditional_breakpoints: caps
                .supports_hit_conditional_breakpoints
                .unwrap_or(false),
            log_points: caps.supports_log_points.unwrap_or(false),
            exception_filters: caps
                .exception_breakpoint_filters
                .as_ref()
                .is_some_and(|f| !f.is_empty()),
            terminate: caps.supports_terminate_request.unwrap_or(false),
            evaluate_for_hovers: caps.supports_evaluate_for_hovers.unwrap_or(false),
            set_variable: caps.supports_set_variable.unwrap_or(false),
        }
    }
}

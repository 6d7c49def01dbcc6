//! Value-shaped operation results.
//!
//! The manager converts errors into these shapes at its boundary: state
//! errors and adapter rejections come back as `success: false` with a
//! message, never as exceptions the caller has to unwind.

use serde::Serialize;

use dapmux_dap::{StackFrame, Variable};

use crate::session::SessionState;
use crate::trace::TracePoint;

/// Result of `startDebugging`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    /// Whether the debuggee is now launching.
    pub success: bool,
    /// Session state after the attempt.
    pub state: SessionState,
    /// Failure or progress description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of operations that only change state (pause, terminate).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResult {
    /// Whether the operation took effect.
    pub success: bool,
    /// Session state after the operation, when the session still exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OpResult {
    /// Successful result in the given state.
    pub fn ok(state: SessionState) -> Self {
        Self {
            success: true,
            state: Some(state),
            message: None,
        }
    }

    /// Failed result with a message.
    pub fn fail(state: Option<SessionState>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            state,
            message: Some(message.into()),
        }
    }
}

/// Result of `setBreakpoint`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointResult {
    /// Whether the breakpoint is registered (possibly still pending).
    pub success: bool,
    /// The breakpoint record after the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<crate::breakpoints::SessionBreakpoint>,
    /// Failure or pending description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of `continue`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResult {
    /// Whether the continue was issued.
    pub success: bool,
    /// Session state when the operation returned.
    pub state: SessionState,
    /// Failure or outcome description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Top frame of the stop, for wait-for-breakpoint mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<StackFrame>,
    /// Locals at the stop, for wait-for-breakpoint mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,
    /// Collected hits, for collect-hits mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<Vec<TracePoint>>,
}

/// Result of step operations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Whether the step was issued.
    pub success: bool,
    /// Session state when the operation returned.
    pub state: SessionState,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Top frame after the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<StackFrame>,
    /// Locals after the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,
}

/// Result of `stepAndTrace`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTraceResult {
    /// Whether stepping ran at all.
    pub success: bool,
    /// Session state when the operation returned.
    pub state: SessionState,
    /// Failure or early-stop description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// One snapshot per completed step.
    pub traces: Vec<TracePoint>,
    /// How many steps completed within budget.
    pub steps_completed: usize,
}

/// A page of collected traces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracesPage {
    /// The page of traces.
    pub traces: Vec<TracePoint>,
    /// Total matches before paging.
    pub total: usize,
}

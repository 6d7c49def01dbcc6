//! Session error types.

use thiserror::Error;

/// Errors from session manager operations.
///
/// Most operational failures (invalid state, adapter rejections) are
/// returned in-band as `success: false` results; this type covers the
/// cases the caller cannot express a result for.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with the given id.
    #[error("no session with id: {0}")]
    NotFound(String),

    /// The operation is not valid in the session's current state.
    #[error("cannot {operation}: session is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: String,
        /// The session's current state.
        state: crate::session::SessionState,
    },

    /// The requested language has no adapter plugin.
    #[error(transparent)]
    Adapter(#[from] dapmux_adapters::AdapterError),

    /// A DAP-level failure.
    #[error(transparent)]
    Dap(#[from] dapmux_dap::DapError),
}

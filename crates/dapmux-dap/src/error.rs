//! DAP error types.

use thiserror::Error;

/// Errors from DAP client operations.
#[derive(Debug, Error)]
pub enum DapError {
    /// Adapter process failed to start.
    #[error("adapter failed to start: {0}")]
    AdapterSpawnFailed(#[from] std::io::Error),

    /// Transport-level communication error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The byte stream no longer frames valid DAP messages.
    #[error("codec error: {0}")]
    Codec(String),

    /// Request timed out waiting for a response.
    #[error("request '{command}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Adapter rejected the request.
    #[error("adapter rejected request: {message}")]
    Rejected {
        /// The rejection message from the adapter.
        message: String,
    },

    /// Adapter sent an invalid or unparseable response.
    #[error("adapter sent invalid response: {0}")]
    InvalidResponse(String),

    /// The connection to the adapter closed while requests were outstanding.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The adapter never announced a listen address.
    #[error("adapter did not announce a listen address within {0}ms")]
    NoListenAddress(u64),

    /// The adapter process exited.
    #[error("adapter process exited")]
    AdapterExited,
}

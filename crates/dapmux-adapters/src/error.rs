//! Adapter plugin error types.

use thiserror::Error;

/// Errors from language adapter plugins.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// No plugin registered for the requested language.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The adapter runtime or binary is not installed.
    #[error("{adapter} is not installed: {hint}")]
    NotInstalled {
        /// The adapter name.
        adapter: String,
        /// How to install it.
        hint: String,
    },

    /// Installing the adapter failed.
    #[error("install failed for {adapter}: {message}")]
    InstallFailed {
        /// The adapter name.
        adapter: String,
        /// What went wrong.
        message: String,
    },

    /// The debuggee executable could not be resolved.
    #[error("cannot resolve executable: {0}")]
    ExecutableNotFound(String),

    /// I/O error while probing or installing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

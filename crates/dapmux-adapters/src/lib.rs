//! dapmux-adapters — language-specific debug adapter plugins.
//!
//! Each plugin knows how to probe its adapter's installation, construct the
//! adapter command line, resolve the debuggee executable, and shape the
//! language-specific launch configuration. The launch configuration is an
//! opaque JSON bag passed through to the adapter verbatim; no attempt is
//! made to model every adapter's launch schema.

pub mod error;
pub mod go;
pub mod node;
pub mod python;
pub mod rust;

pub use error::AdapterError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dapmux_dap::AdapterCommand;

/// The languages dapmux can debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Node.js via vscode-js-debug.
    Javascript,
    /// ts-node via vscode-js-debug.
    Typescript,
    /// CPython via debugpy.
    Python,
    /// Go via Delve.
    Go,
    /// Rust via CodeLLDB.
    Rust,
}

impl Language {
    /// Parse a language tag.
    pub fn parse(s: &str) -> Result<Self, AdapterError> {
        match s.to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Self::Javascript),
            "typescript" | "ts" => Ok(Self::Typescript),
            "python" | "py" => Ok(Self::Python),
            "go" | "golang" => Ok(Self::Go),
            "rust" | "rs" => Ok(Self::Rust),
            _ => Err(AdapterError::UnsupportedLanguage(s.to_string())),
        }
    }

    /// The canonical tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Python => "python",
            Self::Go => "go",
            Self::Rust => "rust",
        }
    }

    /// Guess the language from a script path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" => Some(Self::Python),
            "js" | "mjs" | "cjs" => Some(Self::Javascript),
            "ts" | "mts" | "cts" => Some(Self::Typescript),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for launching a debuggee, as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct LaunchParams {
    /// Script or binary to debug.
    pub script_path: PathBuf,
    /// Command-line arguments for the debuggee.
    pub args: Vec<String>,
    /// Working directory for the debuggee.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the debuggee.
    pub env: HashMap<String, String>,
    /// Stop at the program entry point.
    pub stop_on_entry: bool,
}

/// Result of probing an adapter installation.
#[derive(Debug, Clone, Default)]
pub struct InstallStatus {
    /// Whether the adapter is usable.
    pub installed: bool,
    /// Reported version, when probing succeeded.
    pub version: Option<String>,
    /// Path of the probed binary.
    pub path: Option<String>,
    /// Why the adapter is unusable, or how to install it.
    pub error: Option<String>,
}

/// Overrides for an adapter's command line, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct AdapterOverride {
    /// Replacement executable.
    pub command: Option<String>,
    /// Replacement argument list.
    pub args: Option<Vec<String>>,
}

/// A language-specific debug adapter plugin.
pub trait LanguageAdapter: Send + Sync {
    /// The language this plugin serves.
    fn language(&self) -> Language;

    /// Adapter name (e.g. "debugpy").
    fn name(&self) -> &'static str;

    /// Runtime the adapter drives (e.g. "python").
    fn runtime(&self) -> &'static str;

    /// Probe whether the adapter is installed and usable.
    fn check_installation(&self) -> InstallStatus;

    /// Install the adapter. Idempotent; plugins that cannot self-install
    /// return the manual instruction as an error.
    fn install(&self) -> Result<(), AdapterError>;

    /// The command line and transport for spawning the adapter.
    fn adapter_command(&self, overrides: &AdapterOverride) -> AdapterCommand;

    /// Resolve the debuggee executable, preferring the caller's path.
    fn resolve_executable(&self, preferred: Option<&Path>) -> Result<PathBuf, AdapterError> {
        match preferred {
            Some(path) => Ok(path.to_path_buf()),
            None => Err(AdapterError::ExecutableNotFound(format!(
                "{} sessions need an explicit script path",
                self.language()
            ))),
        }
    }

    /// Build the adapter-specific launch configuration. The result is sent
    /// to the adapter unmodified.
    fn build_launch_config(
        &self,
        params: &LaunchParams,
        executable: &Path,
    ) -> serde_json::Map<String, serde_json::Value>;
}

/// Look up the plugin for a language.
pub fn adapter_for(language: Language) -> Box<dyn LanguageAdapter> {
    match language {
        Language::Python => Box::new(python::DebugpyAdapter),
        Language::Javascript => Box::new(node::JsDebugAdapter::javascript()),
        Language::Typescript => Box::new(node::JsDebugAdapter::typescript()),
        Language::Go => Box::new(go::DelveAdapter),
        Language::Rust => Box::new(rust::CodeLldbAdapter),
    }
}

/// Shared helper: the launch-config keys every language carries.
pub(crate) fn base_launch_config(
    adapter_type: &str,
    params: &LaunchParams,
    executable: &Path,
) -> serde_json::Map<String, serde_json::Value> {
    let mut config = serde_json::Map::new();
    config.insert("type".into(), adapter_type.into());
    config.insert("request".into(), "launch".into());
    config.insert(
        "program".into(),
        executable.to_string_lossy().into_owned().into(),
    );
    config.insert("args".into(), params.args.clone().into());
    if let Some(cwd) = &params.cwd {
        config.insert("cwd".into(), cwd.to_string_lossy().into_owned().into());
    }
    if !params.env.is_empty() {
        config.insert(
            "env".into(),
            serde_json::to_value(&params.env).unwrap_or_default(),
        );
    }
    config.insert("stopOnEntry".into(), params.stop_on_entry.into());
    config
}

/// Shared helper: run a command and capture its first stdout line.
pub(crate) fn probe_version(command: &str, args: &[&str]) -> Result<String, String> {
    let output = std::process::Command::new(command)
        .args(args)
        .output()
        .map_err(|e| format!("{command} not runnable: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "{command} exited with {}",
            output.status.code().unwrap_or(-1)
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

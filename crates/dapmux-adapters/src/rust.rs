//! CodeLLDB adapter plugin for Rust.

use std::collections::HashMap;
use std::path::Path;

use dapmux_dap::{AdapterCommand, TransportMode};

use crate::{
    base_launch_config, probe_version, AdapterError, AdapterOverride, InstallStatus, Language,
    LanguageAdapter, LaunchParams,
};

/// Rust debugging via CodeLLDB over TCP.
pub struct CodeLldbAdapter;

impl LanguageAdapter for CodeLldbAdapter {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn name(&self) -> &'static str {
        "codelldb"
    }

    fn runtime(&self) -> &'static str {
        "lldb"
    }

    fn check_installation(&self) -> InstallStatus {
        match probe_version("codelldb", &["--version"]) {
            Ok(version) => InstallStatus {
                installed: true,
                version: Some(version),
                path: Some("codelldb".into()),
                error: None,
            },
            Err(e) => InstallStatus {
                installed: false,
                version: None,
                path: None,
                error: Some(format!(
                    "{e}; download a codelldb release and put the binary on PATH"
                )),
            },
        }
    }

    fn install(&self) -> Result<(), AdapterError> {
        if self.check_installation().installed {
            return Ok(());
        }
        Err(AdapterError::NotInstalled {
            adapter: "codelldb".into(),
            hint: "download a codelldb release and put the binary on PATH".into(),
        })
    }

    fn adapter_command(&self, overrides: &AdapterOverride) -> AdapterCommand {
        AdapterCommand {
            command: overrides
                .command
                .clone()
                .unwrap_or_else(|| "codelldb".into()),
            args: overrides
                .args
                .clone()
                .unwrap_or_else(|| vec!["--port".into(), "0".into()]),
            env: HashMap::new(),
            cwd: None,
            mode: TransportMode::Tcp,
        }
    }

    fn build_launch_config(
        &self,
        params: &LaunchParams,
        executable: &Path,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut config = base_launch_config("lldb", params, executable);
        config.insert("sourceLanguages".into(), serde_json::json!(["rust"]));
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rust_adapter_identity() {
        let adapter = CodeLldbAdapter;
        assert_eq!(adapter.language(), Language::Rust);
        assert_eq!(adapter.name(), "codelldb");
        assert_eq!(adapter.runtime(), "lldb");
    }

    #[test]
    fn rust_adapter_command_tcp() {
        let cmd = CodeLldbAdapter.adapter_command(&AdapterOverride::default());
        assert_eq!(cmd.command, "codelldb");
        assert_eq!(cmd.args, vec!["--port", "0"]);
        assert_eq!(cmd.mode, TransportMode::Tcp);
    }

    #[test]
    fn rust_launch_config_sets_source_languages() {
        let params = LaunchParams {
            script_path: PathBuf::from("/w/target/debug/app"),
            ..Default::default()
        };
        let config =
            CodeLldbAdapter.build_launch_config(&params, Path::new("/w/target/debug/app"));
        assert_eq!(config["type"], "lldb");
        assert_eq!(config["sourceLanguages"], serde_json::json!(["rust"]));
        assert_eq!(config["program"], "/w/target/debug/app");
    }
}

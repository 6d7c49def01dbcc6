//! Delve adapter plugin for Go.

use std::collections::HashMap;
use std::path::Path;

use dapmux_dap::{AdapterCommand, TransportMode};

use crate::{
    base_launch_config, probe_version, AdapterError, AdapterOverride, InstallStatus, Language,
    LanguageAdapter, LaunchParams,
};

/// Go debugging via `dlv dap` over TCP. dlv announces its listen address
/// on startup ("DAP server listening at: ...").
pub struct DelveAdapter;

impl LanguageAdapter for DelveAdapter {
    fn language(&self) -> Language {
        Language::Go
    }

    fn name(&self) -> &'static str {
        "delve"
    }

    fn runtime(&self) -> &'static str {
        "go"
    }

    fn check_installation(&self) -> InstallStatus {
        match probe_version("dlv", &["version"]) {
            Ok(version) => InstallStatus {
                installed: true,
                version: Some(version),
                path: Some("dlv".into()),
                error: None,
            },
            Err(e) => InstallStatus {
                installed: false,
                version: None,
                path: None,
                error: Some(format!(
                    "{e}; install with: go install github.com/go-delve/delve/cmd/dlv@latest"
                )),
            },
        }
    }

    fn install(&self) -> Result<(), AdapterError> {
        if self.check_installation().installed {
            return Ok(());
        }
        Err(AdapterError::NotInstalled {
            adapter: "delve".into(),
            hint: "go install github.com/go-delve/delve/cmd/dlv@latest".into(),
        })
    }

    fn adapter_command(&self, overrides: &AdapterOverride) -> AdapterCommand {
        AdapterCommand {
            command: overrides.command.clone().unwrap_or_else(|| "dlv".into()),
            args: overrides.args.clone().unwrap_or_else(|| {
                vec![
                    "dap".into(),
                    "--listen".into(),
                    "127.0.0.1:0".into(),
                ]
            }),
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
        let mut config = base_launch_config("go", params, executable);
        // Sources debug-compile through dlv; prebuilt binaries exec.
        let mode = if executable.extension().is_some_and(|e| e == "go") {
            "debug"
        } else {
            "exec"
        };
        config.insert("mode".into(), mode.into());
        config
    }
}

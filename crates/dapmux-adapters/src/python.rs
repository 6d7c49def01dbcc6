//! debugpy adapter plugin for Python.

use std::collections::HashMap;
use std::path::Path;

use dapmux_dap::{AdapterCommand, TransportMode};

use crate::{
    base_launch_config, probe_version, AdapterError, AdapterOverride, InstallStatus, Language,
    LanguageAdapter, LaunchParams,
};

/// Python debugging via `python -m debugpy.adapter` over stdio.
pub struct DebugpyAdapter;

const PYTHON: &str = "python3";

impl LanguageAdapter for DebugpyAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn name(&self) -> &'static str {
        "debugpy"
    }

    fn runtime(&self) -> &'static str {
        "python"
    }

    fn check_installation(&self) -> InstallStatus {
        match probe_version(PYTHON, &["-m", "debugpy", "--version"]) {
            Ok(version) => InstallStatus {
                installed: true,
                version: Some(version),
                path: Some(PYTHON.into()),
                error: None,
            },
            Err(e) => InstallStatus {
                installed: false,
                version: None,
                path: None,
                error: Some(format!("{e}; install with: {PYTHON} -m pip install debugpy")),
            },
        }
    }

    fn install(&self) -> Result<(), AdapterError> {
        if self.check_installation().installed {
            return Ok(());
        }
        tracing::info!("installing debugpy via pip");
        let output = std::process::Command::new(PYTHON)
            .args(["-m", "pip", "install", "--user", "debugpy"])
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AdapterError::InstallFailed {
                adapter: "debugpy".into(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn adapter_command(&self, overrides: &AdapterOverride) -> AdapterCommand {
        AdapterCommand {
            command: overrides.command.clone().unwrap_or_else(|| PYTHON.into()),
            args: overrides
                .args
                .clone()
                .unwrap_or_else(|| vec!["-m".into(), "debugpy.adapter".into()]),
            env: HashMap::new(),
            cwd: None,
            mode: TransportMode::Stdio,
        }
    }

    fn build_launch_config(
        &self,
        params: &LaunchParams,
        executable: &Path,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut config = base_launch_config("python", params, executable);
        config.insert("console".into(), "internalConsole".into());
        config.insert("justMyCode".into(), true.into());
        config
    }
}

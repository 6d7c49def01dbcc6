//! vscode-js-debug adapter plugin for JavaScript and TypeScript.
//!
//! js-debug is the multi-session adapter: the primary connection only
//! coordinates, and each debuggee target is claimed through a
//! `startDebugging` reverse request on a fresh TCP connection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dapmux_dap::{AdapterCommand, TransportMode};

use crate::{
    base_launch_config, probe_version, AdapterError, AdapterOverride, InstallStatus, Language,
    LanguageAdapter, LaunchParams,
};

/// Node.js debugging via vscode-js-debug's `dapDebugServer` over TCP.
pub struct JsDebugAdapter {
    language: Language,
}

impl JsDebugAdapter {
    /// Plain JavaScript flavor.
    pub fn javascript() -> Self {
        Self {
            language: Language::Javascript,
        }
    }

    /// TypeScript flavor (registers ts-node in the debuggee runtime).
    pub fn typescript() -> Self {
        Self {
            language: Language::Typescript,
        }
    }

    fn server_script() -> PathBuf {
        // Conventional install location; overridable via configuration.
        dirs_home()
            .join(".dapmux")
            .join("js-debug")
            .join("src")
            .join("dapDebugServer.js")
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl LanguageAdapter for JsDebugAdapter {
    fn language(&self) -> Language {
        self.language
    }

    fn name(&self) -> &'static str {
        "vscode-js-debug"
    }

    fn runtime(&self) -> &'static str {
        "node"
    }

    fn check_installation(&self) -> InstallStatus {
        let node = match probe_version("node", &["--version"]) {
            Ok(v) => v,
            Err(e) => {
                return InstallStatus {
                    installed: false,
                    version: None,
                    path: None,
                    error: Some(format!("node is not available: {e}")),
                }
            }
        };
        let server = Self::server_script();
        if server.exists() {
            InstallStatus {
                installed: true,
                version: Some(node),
                path: Some(server.to_string_lossy().into_owned()),
                error: None,
            }
        } else {
            InstallStatus {
                installed: false,
                version: Some(node),
                path: None,
                error: Some(format!(
                    "vscode-js-debug not found at {}; download a js-debug-dap release and unpack it there",
                    server.display()
                )),
            }
        }
    }

    fn install(&self) -> Result<(), AdapterError> {
        if self.check_installation().installed {
            return Ok(());
        }
        // Bootstrap downloads are host concerns; report the manual step.
        Err(AdapterError::NotInstalled {
            adapter: "vscode-js-debug".into(),
            hint: format!(
                "download js-debug-dap and unpack into {}",
                Self::server_script().display()
            ),
        })
    }

    fn adapter_command(&self, overrides: &AdapterOverride) -> AdapterCommand {
        AdapterCommand {
            command: overrides.command.clone().unwrap_or_else(|| "node".into()),
            args: overrides.args.clone().unwrap_or_else(|| {
                // Port 0: the server picks a free port and announces it.
                vec![
                    Self::server_script().to_string_lossy().into_owned(),
                    "0".into(),
                    "127.0.0.1".into(),
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
        let mut config = base_launch_config("pwa-node", params, executable);
        config.insert("console".into(), "internalConsole".into());
        if self.language == Language::Typescript {
            config.insert(
                "runtimeArgs".into(),
                serde_json::json!(["-r", "ts-node/register"]),
            );
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_adapter_identity() {
        let js = JsDebugAdapter::javascript();
        assert_eq!(js.language(), Language::Javascript);
        assert_eq!(js.name(), "vscode-js-debug");
        assert_eq!(js.runtime(), "node");

        let ts = JsDebugAdapter::typescript();
        assert_eq!(ts.language(), Language::Typescript);
    }

    #[test]
    fn node_adapter_command_tcp() {
        let cmd = JsDebugAdapter::javascript().adapter_command(&AdapterOverride::default());
        assert_eq!(cmd.command, "node");
        assert_eq!(cmd.mode, TransportMode::Tcp);
        assert!(cmd.args[0].ends_with("dapDebugServer.js"));
    }

    #[test]
    fn node_launch_config_javascript() {
        let params = LaunchParams {
            script_path: PathBuf::from("/w/app.js"),
            ..Default::default()
        };
        let config =
            JsDebugAdapter::javascript().build_launch_config(&params, Path::new("/w/app.js"));
        assert_eq!(config["type"], "pwa-node");
        assert_eq!(config["program"], "/w/app.js");
        assert!(!config.contains_key("runtimeArgs"));
    }

    #[test]
    fn node_launch_config_typescript_registers_ts_node() {
        let params = LaunchParams {
            script_path: PathBuf::from("/w/app.ts"),
            ..Default::default()
        };
        let config =
            JsDebugAdapter::typescript().build_launch_config(&params, Path::new("/w/app.ts"));
        assert_eq!(config["type"], "pwa-node");
        assert_eq!(config["runtimeArgs"], serde_json::json!(["-r", "ts-node/register"]));
    }
}

//! Tool dispatch: newline-delimited JSON requests onto the session manager.
//!
//! Each request line is `{"op": "<operation>", ...params}`; each response
//! is a single JSON line. All errors come back as
//! `{"success": false, "message": ...}` — a malformed line never kills the
//! loop.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{json, Value};

use dapmux_adapters::{Language, LaunchParams};
use dapmux_session::{
    BreakpointSpec, ContinueOptions, SessionError, SessionManager, StepKind, StepTraceOptions,
    TraceFilter,
};

/// The tool-facing server.
pub struct ToolServer {
    manager: SessionManager,
}

impl ToolServer {
    /// Wrap a session manager.
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    /// The wrapped manager.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Handle one request line, always producing a response value.
    pub async fn handle_line(&self, line: &str) -> Value {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return failure(format!("invalid request JSON: {e}")),
        };
        let Some(op) = request.get("op").and_then(Value::as_str) else {
            return failure("missing 'op' field");
        };

        match self.dispatch(op, &request).await {
            Ok(value) => value,
            Err(e) => failure(e.to_string()),
        }
    }

    async fn dispatch(&self, op: &str, req: &Value) -> Result<Value, SessionError> {
        match op {
            "createSession" => {
                let Some(tag) = str_field(req, "language") else {
                    return Ok(failure("missing 'language'"));
                };
                let language = match Language::parse(tag) {
                    Ok(language) => language,
                    Err(e) => return Ok(failure(e.to_string())),
                };
                let summary = self
                    .manager
                    .create_session(
                        language,
                        str_field(req, "name").map(String::from),
                        str_field(req, "executablePath").map(PathBuf::from),
                    )
                    .await;
                Ok(json!(summary))
            }
            "startDebugging" => {
                let id = session_id(req)?;
                let params = LaunchParams {
                    script_path: str_field(req, "scriptPath")
                        .map(PathBuf::from)
                        .unwrap_or_default(),
                    args: string_list(req, "args"),
                    cwd: str_field(req, "cwd").map(PathBuf::from),
                    env: string_map(req, "env"),
                    stop_on_entry: bool_field(req, "stopOnEntry").unwrap_or(false),
                };
                let result = self.manager.start_debugging(&id, params).await?;
                Ok(json!(result))
            }
            "terminateSession" => {
                let id = session_id(req)?;
                let result = self.manager.terminate_session(&id).await?;
                Ok(json!(result))
            }
            "listSessions" => Ok(json!(self.manager.list_sessions().await)),
            "getSessionInfo" => {
                let id = session_id(req)?;
                Ok(json!(self.manager.session_info(&id).await?))
            }
            "setBreakpoint" => {
                let id = session_id(req)?;
                let Some(file) = str_field(req, "file") else {
                    return Ok(failure("missing 'file'"));
                };
                let Some(line) = i64_field(req, "line") else {
                    return Ok(failure("missing 'line'"));
                };
                let spec = BreakpointSpec {
                    file: PathBuf::from(file),
                    line,
                    column: i64_field(req, "column"),
                    condition: str_field(req, "condition").map(String::from),
                    hit_condition: str_field(req, "hitCondition").map(String::from),
                    log_message: str_field(req, "logMessage").map(String::from),
                    trace: bool_field(req, "trace").unwrap_or(false),
                    dump_file: str_field(req, "dumpFile").map(PathBuf::from),
                    max_dumps: i64_field(req, "maxDumps").map(|v| v as u32),
                };
                Ok(json!(self.manager.set_breakpoint(&id, spec).await?))
            }
            "removeBreakpoint" => {
                let id = session_id(req)?;
                let Some(file) = str_field(req, "file") else {
                    return Ok(failure("missing 'file'"));
                };
                let Some(line) = i64_field(req, "line") else {
                    return Ok(failure("missing 'line'"));
                };
                Ok(json!(
                    self.manager
                        .remove_breakpoint(&id, PathBuf::from(file), line)
                        .await?
                ))
            }
            "listBreakpoints" => {
                let id = session_id(req)?;
                Ok(json!(self.manager.list_breakpoints(&id).await?))
            }
            "getTraces" => {
                let id = session_id(req)?;
                let filter = TraceFilter {
                    file: str_field(req, "file").map(String::from),
                    line: i64_field(req, "line"),
                    function: str_field(req, "function").map(String::from),
                    limit: i64_field(req, "limit").map(|v| v as usize),
                    offset: i64_field(req, "offset").map(|v| v as usize),
                };
                Ok(json!(self.manager.get_traces(&id, filter).await?))
            }
            "clearTraces" => {
                let id = session_id(req)?;
                let cleared = self.manager.clear_traces(&id).await?;
                Ok(json!({ "cleared": cleared }))
            }
            "continue" => {
                let id = session_id(req)?;
                let options = ContinueOptions {
                    wait_for_breakpoint: bool_field(req, "waitForBreakpoint").unwrap_or(false),
                    timeout_ms: i64_field(req, "timeout").map(|v| v as u64),
                    collect_hits: i64_field(req, "collectHits").map(|v| v as u32),
                };
                Ok(json!(
                    self.manager
                        .continue_session(&id, i64_field(req, "threadId"), options)
                        .await?
                ))
            }
            "pause" => {
                let id = session_id(req)?;
                Ok(json!(
                    self.manager
                        .pause_session(&id, i64_field(req, "threadId"))
                        .await?
                ))
            }
            "stepIn" | "stepOver" | "stepOut" => {
                let id = session_id(req)?;
                let kind = match op {
                    "stepIn" => StepKind::In,
                    "stepOut" => StepKind::Out,
                    _ => StepKind::Over,
                };
                Ok(json!(
                    self.manager
                        .step(&id, kind, i64_field(req, "threadId"))
                        .await?
                ))
            }
            "stepAndTrace" => {
                let id = session_id(req)?;
                let options = StepTraceOptions {
                    count: i64_field(req, "count").map(|v| v as u32).unwrap_or(1),
                    timeout_ms: i64_field(req, "timeout").map(|v| v as u64),
                    step_type: str_field(req, "stepType")
                        .and_then(StepKind::parse)
                        .unwrap_or_default(),
                    dump_file: str_field(req, "dumpFile").map(PathBuf::from),
                };
                Ok(json!(self.manager.step_and_trace(&id, options).await?))
            }
            "getStackTrace" => {
                let id = session_id(req)?;
                Ok(json!(
                    self.manager
                        .get_stack_trace(&id, i64_field(req, "threadId"))
                        .await?
                ))
            }
            "getVariables" => {
                let id = session_id(req)?;
                Ok(json!(
                    self.manager
                        .get_variables(&id, i64_field(req, "frameId"), str_field(req, "scope"))
                        .await?
                ))
            }
            "expandVariable" => {
                let id = session_id(req)?;
                let Some(reference) = i64_field(req, "variablesReference") else {
                    return Ok(failure("missing 'variablesReference'"));
                };
                Ok(json!(self.manager.expand_variable(&id, reference).await?))
            }
            "evaluateExpression" => {
                let id = session_id(req)?;
                let Some(expression) = str_field(req, "expression") else {
                    return Ok(failure("missing 'expression'"));
                };
                Ok(json!(
                    self.manager
                        .evaluate_expression(
                            &id,
                            expression,
                            i64_field(req, "frameId"),
                            str_field(req, "context"),
                        )
                        .await?
                ))
            }
            "getSourceContext" => {
                let id = session_id(req)?;
                let context = self
                    .manager
                    .get_source_context(
                        &id,
                        str_field(req, "file").map(PathBuf::from),
                        i64_field(req, "line"),
                        i64_field(req, "linesContext").map(|v| v as usize),
                    )
                    .await?;
                Ok(json!(context))
            }
            "getThreads" => {
                let id = session_id(req)?;
                Ok(json!(self.manager.get_threads(&id).await?))
            }
            other => Ok(failure(format!("unknown op: {other}"))),
        }
    }
}

fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "message": message.into() })
}

fn session_id(req: &Value) -> Result<String, SessionError> {
    str_field(req, "sessionId")
        .map(String::from)
        .ok_or_else(|| SessionError::NotFound("<missing sessionId>".into()))
}

fn str_field<'a>(req: &'a Value, key: &str) -> Option<&'a str> {
    req.get(key).and_then(Value::as_str)
}

fn i64_field(req: &Value, key: &str) -> Option<i64> {
    req.get(key).and_then(Value::as_i64)
}

fn bool_field(req: &Value, key: &str) -> Option<bool> {
    req.get(key).and_then(Value::as_bool)
}

fn string_list(req: &Value, key: &str) -> Vec<String> {
    req.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn string_map(req: &Value, key: &str) -> HashMap<String, String> {
    req.get(key)
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

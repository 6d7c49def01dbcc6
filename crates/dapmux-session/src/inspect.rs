//! Inspection: stacks, scopes, variables, evaluation, source context.

use std::collections::HashSet;
use std::path::PathBuf;

use dapmux_dap::{EvaluateResponseBody, Scope, StackFrame, Thread, Variable};

use crate::error::SessionError;
use crate::manager::SessionManager;
use crate::session::SessionState;
use crate::source::{read_context, SourceContext, DEFAULT_CONTEXT_LINES};

impl SessionManager {
    /// The call stack of a thread. Also refreshes the current frame id.
    pub async fn get_stack_trace(
        &self,
        session_id: &str,
        thread_id: Option<i64>,
    ) -> Result<Vec<StackFrame>, SessionError> {
        let session = self.get(session_id).await?;
        let mut data = session.lock().await;
        let client = require_adapter(&data, "stackTrace")?;

        let thread = thread_id.unwrap_or(data.current_thread_id);
        let frames = client.stack_trace(thread).await?;
        if let Some(top) = frames.first() {
            data.current_frame_id = Some(top.id);
        }
        Ok(frames)
    }

    /// The scopes of a frame (defaults to the current frame).
    pub async fn get_scopes(
        &self,
        session_id: &str,
        frame_id: Option<i64>,
    ) -> Result<Vec<Scope>, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        let client = require_adapter(&data, "scopes")?;

        let Some(frame) = frame_id.or(data.current_frame_id) else {
            return Ok(Vec::new());
        };
        Ok(client.scopes(frame).await?)
    }

    /// Variables of a frame, optionally filtered by scope name
    /// ("local", "global", "closure", …). The filter matches scope names
    /// case-insensitively by containment; a filter no scope matches yields
    /// an empty list. Without a filter, all scopes contribute in adapter
    /// order.
    pub async fn get_variables(
        &self,
        session_id: &str,
        frame_id: Option<i64>,
        scope_filter: Option<&str>,
    ) -> Result<Vec<Variable>, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        let client = require_adapter(&data, "variables")?;

        let Some(frame) = frame_id.or(data.current_frame_id) else {
            return Ok(Vec::new());
        };

        let scopes = client.scopes(frame).await?;
        let filter = scope_filter.map(|f| f.to_lowercase());
        let mut variables = Vec::new();
        for scope in scopes {
            if let Some(filter) = &filter {
                if !scope.name.to_lowercase().contains(filter.as_str()) {
                    continue;
                }
            }
            match client.variables(scope.variables_reference).await {
                Ok(mut vars) => variables.append(&mut vars),
                Err(e) => {
                    tracing::debug!(scope = %scope.name, "variables fetch failed: {e}");
                }
            }
        }
        Ok(variables)
    }

    /// Children of a structured variable.
    pub async fn expand_variable(
        &self,
        session_id: &str,
        variables_reference: i64,
    ) -> Result<Vec<Variable>, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        let client = require_adapter(&data, "variables")?;
        Ok(client.variables(variables_reference).await?)
    }

    /// Evaluate an expression, defaulting to the current frame and the
    /// "repl" context.
    pub async fn evaluate_expression(
        &self,
        session_id: &str,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<EvaluateResponseBody, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        let client = require_adapter(&data, "evaluate")?;

        let frame = frame_id.or(data.current_frame_id);
        let context = context.unwrap_or("repl");
        Ok(client.evaluate(expression, frame, Some(context)).await?)
    }

    /// All threads of the debuggee.
    pub async fn get_threads(&self, session_id: &str) -> Result<Vec<Thread>, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;
        let client = require_adapter(&data, "threads")?;
        Ok(client.threads().await?)
    }

    /// A window of source lines around a location, annotated with current
    /// and breakpoint markers. Defaults to the last stop location;
    /// unreadable files and unknown locations yield `None`.
    pub async fn get_source_context(
        &self,
        session_id: &str,
        file: Option<PathBuf>,
        line: Option<i64>,
        context_lines: Option<usize>,
    ) -> Result<Option<SourceContext>, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;

        let stop = data.last_stop.as_ref();
        let file = match file.or_else(|| {
            stop.and_then(|c| c.frame.source_path().map(PathBuf::from))
        }) {
            Some(f) => f,
            None => return Ok(None),
        };
        let line = line
            .or_else(|| stop.map(|c| c.frame.line))
            .unwrap_or(1);
        let context = context_lines.unwrap_or(DEFAULT_CONTEXT_LINES);

        let breakpoint_lines: HashSet<i64> =
            data.breakpoints.lines_for_file(&file).into_iter().collect();
        Ok(read_context(&file, line, context, &breakpoint_lines).await)
    }
}

fn require_adapter(
    data: &crate::session::SessionData,
    operation: &str,
) -> Result<std::sync::Arc<dapmux_dap::DapClient>, SessionError> {
    if !data.state.has_adapter() {
        return Err(SessionError::InvalidState {
            operation: operation.to_string(),
            state: data.state,
        });
    }
    data.client
        .clone()
        .ok_or_else(|| SessionError::InvalidState {
            operation: operation.to_string(),
            state: SessionState::Error,
        })
}

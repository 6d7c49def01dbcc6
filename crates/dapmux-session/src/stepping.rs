//! Execution control: stepping, pause, continue modes, step-and-trace.

use std::path::PathBuf;

use tokio::time::{Duration, Instant};

use crate::error::SessionError;
use crate::manager::SessionManager;
use crate::results::{ContinueResult, OpResult, StepResult, StepTraceResult};
use crate::session::SessionState;
use crate::trace::{append_jsonl, TracePoint};

/// Which step request to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepKind {
    /// `next`.
    #[default]
    Over,
    /// `stepIn`.
    In,
    /// `stepOut`.
    Out,
}

impl StepKind {
    /// Parse "over" / "in" / "out" (also accepts the DAP command names).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "over" | "next" | "stepover" => Some(Self::Over),
            "in" | "stepin" | "into" => Some(Self::In),
            "out" | "stepout" => Some(Self::Out),
            _ => None,
        }
    }
}

/// Options for `continue`.
#[derive(Debug, Clone, Default)]
pub struct ContinueOptions {
    /// Block until the next stop (or timeout) before returning.
    pub wait_for_breakpoint: bool,
    /// Budget for the waiting modes, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Collect this many breakpoint hits before returning.
    pub collect_hits: Option<u32>,
}

/// Options for `stepAndTrace`.
#[derive(Debug, Clone)]
pub struct StepTraceOptions {
    /// Number of steps to attempt.
    pub count: u32,
    /// Total budget in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Step flavor.
    pub step_type: StepKind,
    /// JSONL file to also append each snapshot to.
    pub dump_file: Option<PathBuf>,
}

impl Default for StepTraceOptions {
    fn default() -> Self {
        Self {
            count: 1,
            timeout_ms: None,
            step_type: StepKind::Over,
            dump_file: None,
        }
    }
}

/// Cap for the per-step wait inside trace loops.
const PER_STEP_WAIT: Duration = Duration::from_secs(5);

impl SessionManager {
    fn pause_wait(&self) -> Duration {
        Duration::from_millis(self.config().timeouts.pause_wait_ms)
    }

    /// Issue one step and wait for the resulting stop. Returns the cached
    /// stop context so `step; inspect` callers see fresh state.
    pub async fn step(
        &self,
        session_id: &str,
        kind: StepKind,
        thread_id: Option<i64>,
    ) -> Result<StepResult, SessionError> {
        let session = self.get(session_id).await?;
        {
            let mut data = session.lock().await;
            if data.state != SessionState::Paused {
                return Ok(StepResult {
                    success: false,
                    state: data.state,
                    message: Some(format!("session is {}, expected paused", data.state)),
                    stopped_at: None,
                    variables: None,
                });
            }
            let Some(client) = data.client.clone() else {
                return Ok(StepResult {
                    success: false,
                    state: data.state,
                    message: Some("session has no adapter client".into()),
                    stopped_at: None,
                    variables: None,
                });
            };
            let thread = thread_id.unwrap_or(data.current_thread_id);
            let issued = match kind {
                StepKind::Over => client.next(thread).await,
                StepKind::In => client.step_in(thread).await,
                StepKind::Out => client.step_out(thread).await,
            };
            if let Err(e) = issued {
                return Ok(StepResult {
                    success: false,
                    state: data.state,
                    message: Some(e.to_string()),
                    stopped_at: None,
                    variables: None,
                });
            }
            self.transition(&mut data, SessionState::Running).await;
        }

        self.wait_for_pause(&session, self.pause_wait()).await;

        let data = session.lock().await;
        Ok(StepResult {
            success: true,
            state: data.state,
            message: None,
            stopped_at: data.last_stop.as_ref().map(|c| c.frame.clone()),
            variables: data.last_stop.as_ref().map(|c| c.variables.clone()),
        })
    }

    /// Ask the adapter to pause a running session. The state flips to
    /// `paused` when the matching `stopped` event arrives.
    pub async fn pause_session(
        &self,
        session_id: &str,
        thread_id: Option<i64>,
    ) -> Result<OpResult, SessionError> {
        let session = self.get(session_id).await?;
        let data = session.lock().await;

        if data.state != SessionState::Running {
            return Ok(OpResult::fail(
                Some(data.state),
                format!("session is {}, expected running", data.state),
            ));
        }
        let Some(client) = data.client.clone() else {
            return Ok(OpResult::fail(
                Some(data.state),
                "session has no adapter client",
            ));
        };
        let thread = thread_id.unwrap_or(data.current_thread_id);
        match client.pause(thread).await {
            Ok(()) => Ok(OpResult::ok(data.state)),
            Err(e) => Ok(OpResult::fail(Some(data.state), e.to_string())),
        }
    }

    /// Resume execution, with optional wait-for-breakpoint and
    /// collect-hits modes.
    pub async fn continue_session(
        &self,
        session_id: &str,
        thread_id: Option<i64>,
        options: ContinueOptions,
    ) -> Result<ContinueResult, SessionError> {
        let session = self.get(session_id).await?;

        {
            let mut data = session.lock().await;
            if data.state != SessionState::Paused {
                return Ok(ContinueResult {
                    success: false,
                    state: data.state,
                    message: Some(format!("session is {}, expected paused", data.state)),
                    stopped_at: None,
                    variables: None,
                    traces: None,
                });
            }
            let Some(client) = data.client.clone() else {
                return Ok(ContinueResult {
                    success: false,
                    state: data.state,
                    message: Some("session has no adapter client".into()),
                    stopped_at: None,
                    variables: None,
                    traces: None,
                });
            };
            if options.collect_hits.is_some() {
                data.traces.clear();
            }
            let thread = thread_id.unwrap_or(data.current_thread_id);
            if let Err(e) = client.continue_execution(thread).await {
                return Ok(ContinueResult {
                    success: false,
                    state: data.state,
                    message: Some(e.to_string()),
                    stopped_at: None,
                    variables: None,
                    traces: None,
                });
            }
            self.transition(&mut data, SessionState::Running).await;
        }

        if let Some(hits) = options.collect_hits {
            return self.collect_hits(&session, hits, options.timeout_ms).await;
        }

        if options.wait_for_breakpoint {
            let budget = options
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.pause_wait());
            self.wait_for_pause(&session, budget).await;

            let data = session.lock().await;
            if data.state == SessionState::Paused {
                return Ok(ContinueResult {
                    success: true,
                    state: data.state,
                    message: None,
                    stopped_at: data.last_stop.as_ref().map(|c| c.frame.clone()),
                    variables: data.last_stop.as_ref().map(|c| c.variables.clone()),
                    traces: None,
                });
            }
            return Ok(ContinueResult {
                success: true,
                state: data.state,
                message: Some(format!(
                    "no breakpoint hit within {}ms",
                    budget.as_millis()
                )),
                stopped_at: None,
                variables: None,
                traces: None,
            });
        }

        let data = session.lock().await;
        Ok(ContinueResult {
            success: true,
            state: data.state,
            message: None,
            stopped_at: None,
            variables: None,
            traces: None,
        })
    }

    /// Loop continue → wait, snapshotting each stop, until `hits` stops
    /// were seen, the budget ran out, or the session stopped pausing.
    async fn collect_hits(
        &self,
        session: &crate::manager::SessionRef,
        hits: u32,
        timeout_ms: Option<u64>,
    ) -> Result<ContinueResult, SessionError> {
        let max_variables = self.config().traces.variables_per_trace;
        let budget = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.pause_wait());
        let deadline = Instant::now() + budget;
        let mut collected: Vec<TracePoint> = Vec::new();

        for i in 0..hits {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.wait_for_pause(session, remaining).await;

            let mut data = session.lock().await;
            if data.state != SessionState::Paused {
                break;
            }
            if let Some(ctx) = &data.last_stop {
                let trace = TracePoint::capture(i + 1, &ctx.frame, &ctx.variables, max_variables);
                data.traces.push(trace.clone());
                collected.push(trace);
            }

            if i + 1 < hits {
                let Some(client) = data.client.clone() else {
                    break;
                };
                let thread = data.current_thread_id;
                if let Err(e) = client.continue_execution(thread).await {
                    tracing::warn!("collect-hits continue failed: {e}");
                    break;
                }
                self.transition(&mut data, SessionState::Running).await;
            }
        }

        let data = session.lock().await;
        Ok(ContinueResult {
            success: true,
            state: data.state,
            message: None,
            stopped_at: data.last_stop.as_ref().map(|c| c.frame.clone()),
            variables: None,
            traces: Some(collected),
        })
    }

    /// Step repeatedly, snapshotting the stop context before each step.
    pub async fn step_and_trace(
        &self,
        session_id: &str,
        options: StepTraceOptions,
    ) -> Result<StepTraceResult, SessionError> {
        let session = self.get(session_id).await?;
        let max_variables = self.config().traces.variables_per_trace;
        let budget = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.pause_wait());
        let deadline = Instant::now() + budget;

        let mut traces: Vec<TracePoint> = Vec::new();
        let mut steps_completed = 0usize;

        for i in 0..options.count {
            {
                let mut data = session.lock().await;
                if data.state != SessionState::Paused {
                    break;
                }
                if let Some(ctx) = &data.last_stop {
                    let trace =
                        TracePoint::capture(i + 1, &ctx.frame, &ctx.variables, max_variables);
                    if let Some(path) = &options.dump_file {
                        if let Err(e) = append_jsonl(path, &trace).await {
                            tracing::warn!(
                                file = %path.display(),
                                "step trace dump write failed: {e}"
                            );
                        }
                    }
                    traces.push(trace);
                }

                let Some(client) = data.client.clone() else {
                    break;
                };
                let thread = data.current_thread_id;
                let issued = match options.step_type {
                    StepKind::Over => client.next(thread).await,
                    StepKind::In => client.step_in(thread).await,
                    StepKind::Out => client.step_out(thread).await,
                };
                if let Err(e) = issued {
                    tracing::warn!("step-and-trace step failed: {e}");
                    break;
                }
                self.transition(&mut data, SessionState::Running).await;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.wait_for_pause(&session, remaining.min(PER_STEP_WAIT))
                .await;
            steps_completed += 1;
        }

        let data = session.lock().await;
        Ok(StepTraceResult {
            success: true,
            state: data.state,
            message: None,
            traces,
            steps_completed,
        })
    }
}

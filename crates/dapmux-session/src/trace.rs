//! Tracepoint snapshots and the bounded per-session trace ring.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use dapmux_dap::{StackFrame, Variable};

/// One captured variable in a trace snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceVariable {
    /// Variable name.
    pub name: String,
    /// Rendered value.
    pub value: String,
    /// Type, when the adapter reported one.
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_type: Option<String>,
}

/// Captured state at one tracepoint hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePoint {
    /// 1-based hit number for the owning breakpoint.
    pub hit_number: u32,
    /// Wall-clock capture time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Source file.
    pub file: String,
    /// 1-based line.
    pub line: i64,
    /// Enclosing function name.
    pub function: String,
    /// Truncated locals snapshot.
    pub variables: Vec<TraceVariable>,
}

impl TracePoint {
    /// Snapshot a stop location, keeping at most `max_variables` locals.
    pub fn capture(
        hit_number: u32,
        frame: &StackFrame,
        variables: &[Variable],
        max_variables: usize,
    ) -> Self {
        Self {
            hit_number,
            timestamp: now_millis(),
            file: frame.source_path().unwrap_or_default().to_string(),
            line: frame.line,
            function: frame.name.clone(),
            variables: variables
                .iter()
                .take(max_variables)
                .map(|v| TraceVariable {
                    name: v.name.clone(),
                    value: v.value.clone(),
                    variable_type: v.variable_type.clone(),
                })
                .collect(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Filter for querying collected traces.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    /// Match traces whose file ends with this suffix.
    pub file: Option<String>,
    /// Match an exact line.
    pub line: Option<i64>,
    /// Match traces whose function contains this string.
    pub function: Option<String>,
    /// Page size.
    pub limit: Option<usize>,
    /// Page offset.
    pub offset: Option<usize>,
}

/// Bounded drop-oldest ring of trace points.
#[derive(Debug, Clone)]
pub struct TraceBuffer {
    entries: VecDeque<TracePoint>,
    cap: usize,
}

impl TraceBuffer {
    /// Ring holding at most `cap` entries.
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
        }
    }

    /// Append, dropping the oldest entry beyond the cap.
    pub fn push(&mut self, trace: TracePoint) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(trace);
    }

    /// Number of retained traces.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all traces, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    /// Filtered, paged view. Returns the page and the total number of
    /// matches before paging.
    pub fn query(&self, filter: &TraceFilter) -> (Vec<TracePoint>, usize) {
        let matches: Vec<&TracePoint> = self
            .entries
            .iter()
            .filter(|t| {
                filter
                    .file
                    .as_ref()
                    .is_none_or(|f| t.file.ends_with(f.as_str()))
                    && filter.line.is_none_or(|l| t.line == l)
                    && filter
                        .function
                        .as_ref()
                        .is_none_or(|f| t.function.contains(f.as_str()))
            })
            .collect();
        let total = matches.len();
        let offset = filter.offset.unwrap_or(0);
        let page: Vec<TracePoint> = matches
            .into_iter()
            .skip(offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        (page, total)
    }
}

/// Append one trace as a JSON line. Callers log and swallow failures; a
/// dump-file problem must not derail the debug session.
pub async fn append_jsonl(path: &Path, trace: &TracePoint) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut line = serde_json::to_vec(trace).map_err(std::io::Error::other)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    Ok(())
}

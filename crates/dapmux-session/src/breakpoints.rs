//! Per-session breakpoint bookkeeping.
//!
//! The in-memory file → breakpoints table is the authoritative desired
//! state: every change re-issues the full per-file set to the adapter
//! (DAP replaces a file's breakpoints atomically), and adapter replies
//! only update ids and verified flags in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use dapmux_dap::{BreakpointResponse, SourceBreakpoint};

/// A breakpoint as tracked by a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBreakpoint {
    /// Adapter-assigned id, once acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Absolute source path.
    pub file: PathBuf,
    /// 1-based line.
    pub line: i64,
    /// Optional column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    /// Whether the adapter verified the breakpoint.
    pub verified: bool,
    /// Condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Hit condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    /// Log message (logpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
    /// Tracepoint flag: auto-continue and snapshot on hit.
    pub trace: bool,
    /// JSONL file traces are appended to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_file: Option<PathBuf>,
    /// Stop auto-continuing after this many snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dumps: Option<u32>,
    /// Snapshots taken so far.
    pub dump_count: u32,
    /// Adapter message (e.g. why verification failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SessionBreakpoint {
    /// A fresh, unverified breakpoint.
    pub fn new(file: PathBuf, line: i64) -> Self {
        Self {
            id: None,
            file,
            line,
            column: None,
            verified: false,
            condition: None,
            hit_condition: None,
            log_message: None,
            trace: false,
            dump_file: None,
            max_dumps: None,
            dump_count: 0,
            message: None,
        }
    }

    /// Whether a hit should be captured by the tracepoint engine.
    pub fn is_dump_target(&self) -> bool {
        self.trace || self.dump_file.is_some()
    }

    /// The wire shape sent in `setBreakpoints`.
    pub fn to_source_breakpoint(&self) -> SourceBreakpoint {
        SourceBreakpoint {
            line: self.line,
            column: self.column,
            condition: self.condition.clone(),
            hit_condition: self.hit_condition.clone(),
            log_message: self.log_message.clone(),
        }
    }
}

/// Normalize a breakpoint path: lexically absolutize against the session's
/// working directory. No symlink resolution; comparisons stay
/// case-sensitive.
pub fn normalize_path(file: &Path, cwd: Option<&Path>) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    match cwd {
        Some(cwd) => cwd.join(file),
        None => std::env::current_dir()
            .map(|d| d.join(file))
            .unwrap_or_else(|_| file.to_path_buf()),
    }
}

/// File → ordered breakpoints table for one session.
#[derive(Debug, Clone, Default)]
pub struct BreakpointStore {
    by_file: HashMap<PathBuf, Vec<SessionBreakpoint>>,
}

impl BreakpointStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the breakpoint at `(file, line)`. At most one
    /// breakpoint exists per line; a second set-call replaces the existing
    /// record but keeps its running dump count and adapter id.
    pub fn upsert(&mut self, mut bp: SessionBreakpoint) {
        let line = bp.line;
        let list = self.by_file.entry(bp.file.clone()).or_default();
        match list.iter_mut().find(|existing| existing.line == line) {
            Some(existing) => {
                bp.dump_count = existing.dump_count;
                bp.id = existing.id;
                *existing = bp;
            }
            None => {
                list.push(bp);
                list.sort_by_key(|b| b.line);
            }
        }
    }

    /// Remove the breakpoint at `(file, line)`. Returns `true` when one
    /// existed.
    pub fn remove(&mut self, file: &Path, line: i64) -> bool {
        let Some(list) = self.by_file.get_mut(file) else {
            return false;
        };
        let before = list.len();
        list.retain(|bp| bp.line != line);
        let removed = list.len() != before;
        if list.is_empty() {
            self.by_file.remove(file);
        }
        removed
    }

    /// All files with at least one breakpoint.
    pub fn files(&self) -> Vec<PathBuf> {
        self.by_file.keys().cloned().collect()
    }

    /// Breakpoints for one file, ordered by line.
    pub fn for_file(&self, file: &Path) -> &[SessionBreakpoint] {
        self.by_file.get(file).map_or(&[], |v| v.as_slice())
    }

    /// The wire shapes for `setBreakpoints` on one file.
    pub fn source_breakpoints(&self, file: &Path) -> Vec<SourceBreakpoint> {
        self.for_file(file)
            .iter()
            .map(SessionBreakpoint::to_source_breakpoint)
            .collect()
    }

    /// Fold the adapter's `setBreakpoints` reply back into the table.
    /// Replies arrive in request order, i.e. line order.
    pub fn apply_ack(&mut self, file: &Path, acks: &[BreakpointResponse]) {
        let Some(list) = self.by_file.get_mut(file) else {
            return;
        };
        for (bp, ack) in list.iter_mut().zip(acks) {
            bp.verified = ack.verified;
            if ack.id.is_some() {
                bp.id = ack.id;
            }
            if let Some(line) = ack.line {
                bp.line = line;
            }
            bp.message = ack.message.clone();
        }
    }

    /// The breakpoint at an exact `(file, line)`, if any.
    pub fn at(&self, file: &Path, line: i64) -> Option<&SessionBreakpoint> {
        self.by_file.get(file)?.iter().find(|bp| bp.line == line)
    }

    /// Mutable access to a dump target at a stop location. Falls back to a
    /// basename match because adapters do not always echo the exact path
    /// the breakpoint was set with.
    pub fn dump_target_mut(
        &mut self,
        file: &Path,
        line: i64,
    ) -> Option<&mut SessionBreakpoint> {
        let exact = self
            .by_file
            .get(file)
            .is_some_and(|list| list.iter().any(|bp| bp.line == line && bp.is_dump_target()));
        if exact {
            return self
                .by_file
                .get_mut(file)?
                .iter_mut()
                .find(|bp| bp.line == line && bp.is_dump_target());
        }

        let name = file.file_name()?;
        self.by_file
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|bp| {
                bp.line == line && bp.is_dump_target() && bp.file.file_name() == Some(name)
            })
    }

    /// Lines with breakpoints in one file.
    pub fn lines_for_file(&self, file: &Path) -> Vec<i64> {
        self.for_file(file).iter().map(|bp| bp.line).collect()
    }

    /// All breakpoints across all files.
    pub fn all(&self) -> Vec<SessionBreakpoint> {
        let mut all: Vec<SessionBreakpoint> =
            self.by_file.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)));
        all
    }

    /// Total breakpoint count.
    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }
}

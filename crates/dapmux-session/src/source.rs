//! Source context windows around a stop location.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

/// Default number of lines shown on each side of the target line.
pub const DEFAULT_CONTEXT_LINES: usize = 5;

/// One annotated source line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLine {
    /// 1-based line number.
    pub number: i64,
    /// Line text without the trailing newline.
    pub text: String,
    /// Whether this is the requested/current line.
    pub is_current: bool,
    /// Whether the session has a breakpoint here.
    pub has_breakpoint: bool,
}

/// A window of source lines around a target line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    /// The file read.
    pub file: String,
    /// The target line.
    pub line: i64,
    /// The window, clipped to file bounds.
    pub lines: Vec<SourceLine>,
}

/// Read a window of `context` lines around `line`. Out-of-range targets
/// clip to the file bounds; unreadable files yield `None`.
pub async fn read_context(
    path: &Path,
    line: i64,
    context: usize,
    breakpoint_lines: &HashSet<i64>,
) -> Option<SourceContext> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let all: Vec<&str> = content.lines().collect();
    if all.is_empty() {
        return Some(SourceContext {
            file: path.to_string_lossy().into_owned(),
            line,
            lines: Vec::new(),
        });
    }

    let target = line.clamp(1, all.len() as i64);
    let first = (target - context as i64).max(1);
    let last = (target + context as i64).min(all.len() as i64);

    let lines = (first..=last)
        .map(|n| SourceLine {
            number: n,
            text: all[(n - 1) as usize].to_string(),
            is_current: n == target,
            has_breakpoint: breakpoint_lines.contains(&n),
        })
        .collect();

    Some(SourceContext {
        file: path.to_string_lossy().into_owned(),
        line: target,
        lines,
    })
}

//! Running stats and the bounded activity log.
//!
//! [`ActivityTracker`] folds the [`ActivityEvent`] sequence of one iteration
//! into a [`Stats`] record and a bounded [`ActivityLog`]. It never fails:
//! out-of-order or orphaned completions are clamped so that
//! `tools_completed + tools_errored <= tools_started` holds after every
//! event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::AddAssign;

use crate::stream::tools::{summarize_input, truncate_chars};
use crate::stream::{ActivityEvent, ToolCategory};

/// Default number of entries kept in the activity log.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Default number of trailing entries captured in a [`FailureContext`].
pub const DEFAULT_FAILURE_TRAIL: usize = 5;

/// Characters of tool input/output kept in a failure snapshot.
const FAILURE_EXCERPT_CHARS: usize = 300;

// ============================================================================
// Stats
// ============================================================================

/// Tool counters for one iteration, or summed across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub tools_started: u32,
    pub tools_completed: u32,
    pub tools_errored: u32,
    pub reads: u32,
    pub writes: u32,
    pub commands: u32,
    pub meta_ops: u32,
    /// Completions that could not be reconciled with a start.
    pub orphaned: u32,
    pub commits: u32,
}

impl Stats {
    /// Tools started but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.tools_started
            .saturating_sub(self.tools_completed + self.tools_errored)
    }

    fn record_start(&mut self, category: ToolCategory) {
        self.tools_started += 1;
        match category {
            ToolCategory::Read => self.reads += 1,
            ToolCategory::Write => self.writes += 1,
            ToolCategory::Command => self.commands += 1,
            ToolCategory::Meta => self.meta_ops += 1,
        }
    }

    fn record_completion(&mut self, is_error: bool, orphaned: bool) {
        if orphaned || self.in_flight() == 0 {
            self.orphaned += 1;
            return;
        }
        if is_error {
            self.tools_errored += 1;
        } else {
            self.tools_completed += 1;
        }
    }

    /// Compact one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} tools ({} read, {} write, {} cmd, {} meta), {} errors, {} commits",
            self.tools_started,
            self.reads,
            self.writes,
            self.commands,
            self.meta_ops,
            self.tools_errored,
            self.commits
        )
    }
}

impl AddAssign for Stats {
    fn add_assign(&mut self, rhs: Self) {
        self.tools_started += rhs.tools_started;
        self.tools_completed += rhs.tools_completed;
        self.tools_errored += rhs.tools_errored;
        self.reads += rhs.reads;
        self.writes += rhs.writes;
        self.commands += rhs.commands;
        self.meta_ops += rhs.meta_ops;
        self.orphaned += rhs.orphaned;
        self.commits += rhs.commits;
    }
}

// ============================================================================
// Activity Log
// ============================================================================

/// Kind of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Thought,
    ToolStart,
    ToolDone,
    ToolError,
    Commit,
    Result,
}

/// One line of human-readable activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub summary: String,
}

/// Fixed-capacity log; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: ActivityEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    /// The `n` most recent entries, newest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ActivityEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// The newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<&ActivityEntry> {
        self.entries.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

// ============================================================================
// Failure Context
// ============================================================================

/// Diagnostic snapshot captured when an iteration ends in error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub last_tool_name: Option<String>,
    pub last_tool_input: Option<String>,
    pub last_tool_output: Option<String>,
    /// Most recent activity, newest first.
    pub recent_activity: Vec<ActivityEntry>,
    /// Tail of the process's stderr, when any.
    pub stderr_tail: Vec<String>,
}

impl FailureContext {
    /// Render for humans and for the next iteration's prompt.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.last_tool_name {
            out.push_str(&format!("Last tool: {name}\n"));
        }
        if let Some(input) = &self.last_tool_input {
            out.push_str(&format!("Last input: {input}\n"));
        }
        if let Some(output) = &self.last_tool_output {
            out.push_str(&format!("Last output: {output}\n"));
        }
        if !self.recent_activity.is_empty() {
            out.push_str("Recent activity (newest first):\n");
            for entry in &self.recent_activity {
                out.push_str(&format!("  - {}\n", entry.summary));
            }
        }
        if !self.stderr_tail.is_empty() {
            out.push_str("stderr:\n");
            for line in &self.stderr_tail {
                out.push_str(&format!("  {line}\n"));
            }
        }
        out
    }
}

// ============================================================================
// Activity Tracker
// ============================================================================

#[derive(Debug, Clone, Default)]
struct LastTool {
    id: String,
    name: String,
    input: String,
    output: Option<String>,
}

/// Folds activity events into stats and the activity log.
///
/// # Example
///
/// ```
/// use specloop::activity::ActivityTracker;
/// use specloop::stream::{ActivityEvent, ToolCategory};
///
/// let mut tracker = ActivityTracker::new(10);
/// tracker.record(&ActivityEvent::ToolStart {
///     id: "t1".into(),
///     name: "Read".into(),
///     category: ToolCategory::Read,
///     input: serde_json::json!({"file_path": "SPEC.md"}),
/// });
/// assert_eq!(tracker.stats().tools_started, 1);
/// assert_eq!(tracker.stats().reads, 1);
/// ```
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    stats: Stats,
    log: ActivityLog,
    last_tool: Option<LastTool>,
}

impl ActivityTracker {
    /// Create a tracker whose log keeps `log_capacity` entries.
    #[must_use]
    pub fn new(log_capacity: usize) -> Self {
        Self {
            stats: Stats::default(),
            log: ActivityLog::new(log_capacity),
            last_tool: None,
        }
    }

    /// Reset for a new iteration.
    pub fn reset(&mut self) {
        self.stats = Stats::default();
        self.log = ActivityLog::new(self.log.capacity());
        self.last_tool = None;
    }

    /// Fold one event.
    pub fn record(&mut self, event: &ActivityEvent) {
        let now = Utc::now();
        match event {
            ActivityEvent::Thought { text } => {
                self.push(now, ActivityKind::Thought, truncate_chars(text, 120));
            }
            ActivityEvent::ToolStart {
                id,
                name,
                category,
                input,
            } => {
                self.stats.record_start(*category);
                let summary = summarize_input(name, input);
                self.last_tool = Some(LastTool {
                    id: id.clone(),
                    name: name.clone(),
                    input: truncate_chars(&input.to_string(), FAILURE_EXCERPT_CHARS),
                    output: None,
                });
                self.push(now, ActivityKind::ToolStart, summary);
            }
            ActivityEvent::ToolComplete {
                id,
                name,
                duration_ms,
                output,
                is_error,
            } => {
                self.stats.record_completion(*is_error, name.is_none());
                if let Some(last) = self.last_tool.as_mut().filter(|last| &last.id == id) {
                    last.output = Some(truncate_chars(output, FAILURE_EXCERPT_CHARS));
                }
                let label = name.as_deref().unwrap_or("unknown tool");
                let timing = duration_ms.map(|ms| format!(" ({ms}ms)")).unwrap_or_default();
                let (kind, summary) = if *is_error {
                    (
                        ActivityKind::ToolError,
                        format!("{label} failed{timing}: {}", truncate_chars(output, 80)),
                    )
                } else {
                    (ActivityKind::ToolDone, format!("{label} done{timing}"))
                };
                self.push(now, kind, summary);
            }
            ActivityEvent::Commit { hash, message } => {
                self.stats.commits += 1;
                self.push(now, ActivityKind::Commit, format!("commit {hash} {message}"));
            }
            ActivityEvent::Result(summary) => {
                let text = if summary.is_error {
                    "assistant reported an error".to_string()
                } else {
                    "assistant finished".to_string()
                };
                self.push(now, ActivityKind::Result, text);
            }
        }
    }

    fn push(&mut self, at: DateTime<Utc>, kind: ActivityKind, summary: String) {
        self.log.push(ActivityEntry { at, kind, summary });
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[must_use]
    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// Capture a failure snapshot with the `trail` most recent entries.
    #[must_use]
    pub fn failure_context(&self, trail: usize) -> FailureContext {
        FailureContext {
            last_tool_name: self.last_tool.as_ref().map(|t| t.name.clone()),
            last_tool_input: self.last_tool.as_ref().map(|t| t.input.clone()),
            last_tool_output: self.last_tool.as_ref().and_then(|t| t.output.clone()),
            recent_activity: self.log.recent(trail),
            stderr_tail: Vec::new(),
        }
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

//! Task spec snapshots.
//!
//! The spec file on disk is owned by the assistant: it updates task status
//! as a side effect of its work. The loop only ever reads snapshots of it
//! and diffs them across iterations.
//!
//! - [`markdown`] - Lenient reader for the markdown spec format
//! - [`selection`] - Greedy budget-based task batch selection

pub mod markdown;
pub mod selection;

pub use markdown::MarkdownSpecSource;
pub use selection::{select_tasks, TaskBatch};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

// ============================================================================
// Task Size
// ============================================================================

/// Size weight of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl TaskSize {
    /// Budget points consumed by a task of this size.
    ///
    /// ```
    /// use specloop::spec::TaskSize;
    ///
    /// assert_eq!(TaskSize::Small.points(), 1);
    /// assert_eq!(TaskSize::Medium.points(), 2);
    /// assert_eq!(TaskSize::Large.points(), 4);
    /// ```
    #[must_use]
    pub fn points(&self) -> u32 {
        match self {
            Self::Small => 1,
            Self::Medium => 2,
            Self::Large => 4,
        }
    }

    /// Parse `S`/`M`/`L` or `small`/`medium`/`large`, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s" | "small" => Some(Self::Small),
            "m" | "medium" => Some(Self::Medium),
            "l" | "large" => Some(Self::Large),
            _ => None,
        }
    }

    /// Single-letter label.
    #[must_use]
    pub fn letter(&self) -> char {
        match self {
            Self::Small => 'S',
            Self::Medium => 'M',
            Self::Large => 'L',
        }
    }
}

// ============================================================================
// Task Status
// ============================================================================

/// Status of a spec task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Passed,
    Failed,
}

impl TaskStatus {
    /// Whether no further work is expected on the task.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    /// Parse a status string, accepting common spellings.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "pending" | "todo" => Some(Self::Pending),
            "in_progress" | "wip" => Some(Self::InProgress),
            "passed" | "done" | "complete" | "completed" => Some(Self::Passed),
            "failed" | "blocked" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Spec Task & Snapshot
// ============================================================================

/// One task entry of the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecTask {
    /// Stable identifier, e.g. `T001`.
    pub id: String,
    pub title: String,
    pub size: TaskSize,
    pub status: TaskStatus,
    /// Checked checklist items under the task.
    #[serde(default)]
    pub completed_items: Vec<String>,
}

impl SpecTask {
    /// Create a pending task.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, size: TaskSize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            size,
            status: TaskStatus::Pending,
            completed_items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_completed_item(mut self, item: impl Into<String>) -> Self {
        self.completed_items.push(item.into());
        self
    }

    /// `T001 (M) Title`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({}) {}", self.id, self.size.letter(), self.title)
    }
}

/// Point-in-time view of every task in the spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecSnapshot {
    pub tasks: Vec<SpecTask>,
    /// md5 of the raw spec content, for diagnostics.
    #[serde(default)]
    pub fingerprint: String,
}

impl SpecSnapshot {
    #[must_use]
    pub fn new(tasks: Vec<SpecTask>) -> Self {
        Self {
            tasks,
            fingerprint: String::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `(id, status)` pairs in spec order.
    #[must_use]
    pub fn statuses(&self) -> Vec<(String, TaskStatus)> {
        self.tasks
            .iter()
            .map(|t| (t.id.clone(), t.status))
            .collect()
    }

    /// Status of a task by id.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.id == id).map(|t| t.status)
    }

    /// Completed item texts, prefixed with their task id for dedup.
    #[must_use]
    pub fn completed_texts(&self) -> Vec<String> {
        self.tasks
            .iter()
            .flat_map(|t| {
                t.completed_items
                    .iter()
                    .map(move |item| format!("{}: {}", t.id, item))
            })
            .collect()
    }

    /// Tasks not yet in a terminal state, in spec order.
    pub fn pending(&self) -> impl Iterator<Item = &SpecTask> {
        self.tasks.iter().filter(|t| !t.status.is_terminal())
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.tasks.len() - self.pending_count()
    }

    /// True when there is at least one task and every task is terminal.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Tasks that are terminal here but were not terminal in `previous`.
    #[must_use]
    pub fn newly_terminal(&self, previous: &SpecSnapshot) -> Vec<&SpecTask> {
        self.tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .filter(|t| previous.status_of(&t.id).is_some_and(|s| !s.is_terminal()))
            .collect()
    }

    /// Ids present in `previous` that this snapshot no longer lists.
    ///
    /// Tasks are never removed during a run, so a non-empty result means
    /// the file was read mid-write or is otherwise truncated.
    #[must_use]
    pub fn dropped_ids<'a>(&self, previous: &'a SpecSnapshot) -> Vec<&'a str> {
        previous
            .tasks
            .iter()
            .filter(|t| self.status_of(&t.id).is_none())
            .map(|t| t.id.as_str())
            .collect()
    }
}

/// Source of spec snapshots.
///
/// `Ok(None)` means the spec could not be located or contains no tasks;
/// the loop then runs without task awareness.
pub trait SpecSource: Send + Sync {
    /// Read a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec exists but could not be read.
    fn load(&self) -> Result<Option<SpecSnapshot>>;

    /// Human-readable location, for prompts and logs.
    fn location(&self) -> String;
}

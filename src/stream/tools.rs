//! Tool classification and commit detection.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Semantic category of a tool, used for stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// File reads.
    Read,
    /// File writes and edits.
    Write,
    /// Shell execution.
    Command,
    /// Everything else: search, planning, sub-agents.
    Meta,
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Command => write!(f, "command"),
            Self::Meta => write!(f, "meta"),
        }
    }
}

/// Map a tool name to its category.
///
/// Total: unknown names are [`ToolCategory::Meta`].
///
/// # Example
///
/// ```
/// use specloop::stream::{classify_tool, ToolCategory};
///
/// assert_eq!(classify_tool("Read"), ToolCategory::Read);
/// assert_eq!(classify_tool("Edit"), ToolCategory::Write);
/// assert_eq!(classify_tool("Bash"), ToolCategory::Command);
/// assert_eq!(classify_tool("SomethingNew"), ToolCategory::Meta);
/// ```
#[must_use]
pub fn classify_tool(name: &str) -> ToolCategory {
    match name {
        "Read" | "read" | "read_file" | "NotebookRead" => ToolCategory::Read,
        "Write" | "Edit" | "MultiEdit" | "NotebookEdit" | "write" | "edit" | "write_file"
        | "apply_patch" => ToolCategory::Write,
        "Bash" | "bash" | "shell" | "exec_command" => ToolCategory::Command,
        _ => ToolCategory::Meta,
    }
}

/// A commit recognised in `git commit` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
}

fn git_commit_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bgit\s+(?:-[^\s]+\s+(?:[^\s-][^\s]*\s+)?)*commit\b").ok())
        .as_ref()
}

fn commit_summary_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // "[main abc1234] msg" or "[main (root-commit) abc1234] msg"
    RE.get_or_init(|| Regex::new(r"(?m)^\[[^\]\s]+(?: \([^)]*\))? ([0-9a-f]{7,40})\] (.+)$").ok())
        .as_ref()
}

/// Whether a shell command invokes `git commit`.
#[must_use]
pub fn is_git_commit(command: &str) -> bool {
    git_commit_re().is_some_and(|re| re.is_match(command))
}

/// Extract the short hash and subject from `git commit` output.
///
/// Returns `None` when the output does not contain the summary line.
///
/// # Example
///
/// ```
/// use specloop::stream::parse_commit_output;
///
/// let commit = parse_commit_output("[main 1a2b3c4] Add parser\n 1 file changed").unwrap();
/// assert_eq!(commit.hash, "1a2b3c4");
/// assert_eq!(commit.message, "Add parser");
/// ```
#[must_use]
pub fn parse_commit_output(output: &str) -> Option<CommitInfo> {
    let caps = commit_summary_re()?.captures(output)?;
    Some(CommitInfo {
        hash: caps.get(1)?.as_str().to_string(),
        message: caps.get(2)?.as_str().trim().to_string(),
    })
}

/// One-line human summary of a tool input, for the activity log.
#[must_use]
pub fn summarize_input(name: &str, input: &serde_json::Value) -> String {
    const KEYS: &[&str] = &[
        "file_path",
        "path",
        "command",
        "pattern",
        "description",
        "url",
        "query",
    ];

    let detail = KEYS
        .iter()
        .find_map(|key| input.get(*key).and_then(|v| v.as_str()))
        .map(|s| truncate_chars(s.lines().next().unwrap_or_default(), 80));

    match detail {
        Some(detail) if !detail.is_empty() => format!("{name} {detail}"),
        _ => name.to_string(),
    }
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

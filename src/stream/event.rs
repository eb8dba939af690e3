//! Typed domain events produced from the assistant stream.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

use super::tools::ToolCategory;

/// A single parsed unit of assistant output.
///
/// # Example
///
/// ```
/// use specloop::stream::ActivityEvent;
///
/// let event = ActivityEvent::Thought { text: "Reading the spec".into() };
/// assert_eq!(event.kind(), "thought");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// Free text from the assistant.
    Thought { text: String },
    /// A tool invocation was requested.
    ToolStart {
        id: String,
        name: String,
        category: ToolCategory,
        input: serde_json::Value,
    },
    /// A tool result arrived.
    ///
    /// `name` and `duration_ms` are `None` when the id never appeared in a
    /// `ToolStart` of this iteration (an orphaned completion).
    ToolComplete {
        id: String,
        name: Option<String>,
        duration_ms: Option<u64>,
        output: String,
        is_error: bool,
    },
    /// A `git commit` ran and its output was recognised.
    Commit { hash: String, message: String },
    /// The assistant finished its turn.
    Result(ResultSummary),
}

impl ActivityEvent {
    /// Short name of the variant, matching the serialised `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolComplete { .. } => "tool_complete",
            Self::Commit { .. } => "commit",
            Self::Result(_) => "result",
        }
    }

    /// True for a completion that could not be matched to a start.
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        matches!(self, Self::ToolComplete { name: None, .. })
    }
}

/// Terminal summary of one assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Whether the assistant reported an error.
    pub is_error: bool,
    /// Wall time reported by the assistant.
    pub duration_ms: Option<u64>,
    /// Total cost in USD, when reported.
    pub cost_usd: Option<f64>,
    /// Token usage, when reported.
    pub usage: Option<Usage>,
    /// Final text, when present.
    pub text: Option<String>,
}

impl ResultSummary {
    /// Whether the turn succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.is_error
    }
}

/// Token counts for one turn, or summed across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Total tokens in both directions.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

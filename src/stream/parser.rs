//! Stateful line parser for the assistant stream.
//!
//! Events must be fed in the order they were received: tool results are
//! correlated with the tool invocations seen earlier through the open-call
//! map, and commit detection needs the command recorded at invocation time.

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use super::event::{ActivityEvent, ResultSummary, Usage};
use super::message::{ContentBlock, MessageContent, StreamMessage};
use super::tools::{classify_tool, is_git_commit, parse_commit_output, truncate_chars};

/// Maximum characters of tool output kept in a `ToolComplete` event.
pub const OUTPUT_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone)]
struct OpenTool {
    name: String,
    started: Instant,
    git_commit: bool,
}

/// Converts raw stream lines into [`ActivityEvent`]s.
///
/// One parser is used per iteration; [`StreamParser::reset`] clears all
/// correlation state so the same instance can be reused.
///
/// # Example
///
/// ```
/// use specloop::stream::{ActivityEvent, StreamParser};
///
/// let mut parser = StreamParser::new();
/// let events = parser.parse_line(
///     r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Looking around"}]}}"#,
/// );
/// assert_eq!(events, vec![ActivityEvent::Thought { text: "Looking around".into() }]);
///
/// // Garbage is skipped, never fatal.
/// assert!(parser.parse_line("{oops").is_empty());
/// ```
#[derive(Debug, Default)]
pub struct StreamParser {
    open_tools: HashMap<String, OpenTool>,
    session_id: Option<String>,
    model: Option<String>,
    result: Option<ResultSummary>,
    lines_parsed: u64,
    lines_skipped: u64,
}

impl StreamParser {
    /// Create a parser with empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all state for a new iteration.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Parse one line using the current time for durations.
    pub fn parse_line(&mut self, line: &str) -> Vec<ActivityEvent> {
        self.parse_line_at(line, Instant::now())
    }

    /// Parse one line, using `now` as the receive time.
    ///
    /// Blank, malformed and unknown lines produce no events and leave the
    /// correlation state untouched.
    pub fn parse_line_at(&mut self, line: &str, now: Instant) -> Vec<ActivityEvent> {
        let Some(message) = StreamMessage::parse(line) else {
            if !line.trim().is_empty() {
                self.lines_skipped += 1;
            }
            return Vec::new();
        };
        self.lines_parsed += 1;

        match message {
            StreamMessage::System(system) => {
                if let Some(id) = system.session_id {
                    debug!(session_id = %id, "assistant session started");
                    self.session_id = Some(id);
                }
                if system.model.is_some() {
                    self.model = system.model;
                }
                Vec::new()
            }
            StreamMessage::Assistant(msg) => self.assistant_content(msg.message.content, now),
            StreamMessage::User(msg) => self.user_content(msg.message.content, now),
            StreamMessage::Result(res) => {
                if self.session_id.is_none() {
                    self.session_id = res.session_id.clone();
                }
                let summary = ResultSummary {
                    is_error: res.is_error,
                    duration_ms: res.duration_ms,
                    cost_usd: res.total_cost_usd,
                    usage: res.usage.map(|u| Usage {
                        input_tokens: u.input_tokens,
                        output_tokens: u.output_tokens,
                    }),
                    text: res.result,
                };
                self.result = Some(summary.clone());
                vec![ActivityEvent::Result(summary)]
            }
            StreamMessage::Unknown => Vec::new(),
        }
    }

    /// Lazily parse a sequence of lines in order.
    pub fn parse_lines<'a, I>(&'a mut self, lines: I) -> impl Iterator<Item = ActivityEvent> + 'a
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: 'a,
    {
        lines.into_iter().flat_map(move |line| self.parse_line(line))
    }

    fn assistant_content(&mut self, content: MessageContent, now: Instant) -> Vec<ActivityEvent> {
        let blocks = match content {
            MessageContent::Text(text) => return thought(text).into_iter().collect(),
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut events = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text { text } | ContentBlock::Thinking { thinking: text } => {
                    events.extend(thought(text));
                }
                ContentBlock::ToolUse { id, name, input } => {
                    let git_commit = classify_tool(&name) == super::ToolCategory::Command
                        && input
                            .get("command")
                            .and_then(|c| c.as_str())
                            .is_some_and(is_git_commit);
                    if self.open_tools.contains_key(&id) {
                        debug!(tool_id = %id, "duplicate tool id, restarting its clock");
                    }
                    self.open_tools.insert(
                        id.clone(),
                        OpenTool {
                            name: name.clone(),
                            started: now,
                            git_commit,
                        },
                    );
                    events.push(ActivityEvent::ToolStart {
                        id,
                        category: classify_tool(&name),
                        name,
                        input,
                    });
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
            }
        }
        events
    }

    fn user_content(&mut self, content: MessageContent, now: Instant) -> Vec<ActivityEvent> {
        let MessageContent::Blocks(blocks) = content else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for block in blocks {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            else {
                continue;
            };

            let output = content.to_text();
            let open = self.open_tools.remove(&tool_use_id);
            if open.is_none() {
                debug!(tool_id = %tool_use_id, "tool result without matching invocation");
            }

            let commit = open
                .as_ref()
                .filter(|tool| tool.git_commit && !is_error)
                .and_then(|_| parse_commit_output(&output));

            events.push(ActivityEvent::ToolComplete {
                id: tool_use_id,
                duration_ms: open.as_ref().map(|tool| {
                    u64::try_from(now.saturating_duration_since(tool.started).as_millis())
                        .unwrap_or(u64::MAX)
                }),
                name: open.map(|tool| tool.name),
                output: truncate_chars(&output, OUTPUT_EXCERPT_CHARS),
                is_error,
            });

            if let Some(commit) = commit {
                events.push(ActivityEvent::Commit {
                    hash: commit.hash,
                    message: commit.message,
                });
            }
        }
        events
    }

    /// Session id announced by the assistant, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Model announced by the assistant, if any.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// The terminal result, once seen.
    #[must_use]
    pub fn result(&self) -> Option<&ResultSummary> {
        self.result.as_ref()
    }

    /// Whether a terminal `result` message has been seen.
    #[must_use]
    pub fn result_seen(&self) -> bool {
        self.result.is_some()
    }

    /// Number of tool calls still waiting for a result.
    #[must_use]
    pub fn open_tool_count(&self) -> usize {
        self.open_tools.len()
    }

    /// Number of non-blank lines that could not be parsed.
    #[must_use]
    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped
    }

    /// Number of lines parsed as protocol messages.
    #[must_use]
    pub fn lines_parsed(&self) -> u64 {
        self.lines_parsed
    }
}

fn thought(text: String) -> Option<ActivityEvent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(ActivityEvent::Thought {
            text: trimmed.to_string(),
        })
    }
}

//! Assistant output stream parsing.
//!
//! The harness writes newline-delimited JSON on stdout. This module turns
//! that stream into typed [`ActivityEvent`]s:
//!
//! - [`message`] - Raw wire shapes, one variant per `type` discriminator
//! - [`tools`] - Tool classification and `git commit` output detection
//! - [`parser`] - The stateful line parser correlating tool calls and results
//!
//! ```text
//! stdout line ──> StreamMessage ──> StreamParser ──> ActivityEvent*
//!                 (serde, lenient)   (open tool map)
//! ```
//!
//! Malformed or unknown lines never fail the stream: they are skipped and
//! counted.

pub mod event;
pub mod message;
pub mod parser;
pub mod tools;

pub use event::{ActivityEvent, ResultSummary, Usage};
pub use message::StreamMessage;
pub use parser::StreamParser;
pub use tools::{classify_tool, parse_commit_output, CommitInfo, ToolCategory};

//! Reusable test data.
//!
//! Stream lines in the harness wire format, plus spec documents and
//! snapshots. Compiled into the library so integration tests and benches
//! can share them.

use serde_json::{json, Value};

use crate::spec::{SpecSnapshot, SpecTask, TaskSize, TaskStatus};

/// Builders for single harness stdout lines.
///
/// # Example
///
/// ```
/// use specloop::stream::StreamParser;
/// use specloop::testing::StreamScript;
///
/// let mut parser = StreamParser::new();
/// parser.parse_line(&StreamScript::result(false, Some(0.1), 10, 5));
/// assert!(parser.result_seen());
/// ```
pub struct StreamScript;

impl StreamScript {
    /// `system` init line.
    #[must_use]
    pub fn system(session_id: &str) -> String {
        json!({
            "type": "system",
            "subtype": "init",
            "session_id": session_id,
            "model": "claude-opus",
        })
        .to_string()
    }

    /// Assistant text block.
    #[must_use]
    pub fn thought(text: &str) -> String {
        json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": text}]},
        })
        .to_string()
    }

    /// Assistant tool invocation.
    #[must_use]
    pub fn tool_use(id: &str, name: &str, input: Value) -> String {
        json!({
            "type": "assistant",
            "message": {"content": [{"type": "tool_use", "id": id, "name": name, "input": input}]},
        })
        .to_string()
    }

    /// User-role tool result.
    #[must_use]
    pub fn tool_result(id: &str, content: &str, is_error: bool) -> String {
        json!({
            "type": "user",
            "message": {"content": [{
                "type": "tool_result",
                "tool_use_id": id,
                "content": content,
                "is_error": is_error,
            }]},
        })
        .to_string()
    }

    /// Terminal `result` line.
    #[must_use]
    pub fn result(is_error: bool, cost: Option<f64>, input_tokens: u64, output_tokens: u64) -> String {
        let mut value = json!({
            "type": "result",
            "subtype": if is_error { "error_during_execution" } else { "success" },
            "is_error": is_error,
            "duration_ms": 1200,
            "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
            "result": "done",
        });
        if let (Some(cost), Some(map)) = (cost, value.as_object_mut()) {
            map.insert("total_cost_usd".into(), json!(cost));
        }
        value.to_string()
    }

    /// A complete, successful turn: init, a read, an edit, and a result.
    #[must_use]
    pub fn successful_turn(session_id: &str) -> Vec<String> {
        vec![
            Self::system(session_id),
            Self::thought("Reading the spec"),
            Self::tool_use("r1", "Read", json!({"file_path": "SPEC.md"})),
            Self::tool_result("r1", "### T001: ...", false),
            Self::tool_use("w1", "Edit", json!({"file_path": "src/lib.rs"})),
            Self::tool_result("w1", "ok", false),
            Self::result(false, Some(0.05), 1000, 200),
        ]
    }

    /// A turn that runs `git commit` and reports the given summary line.
    #[must_use]
    pub fn commit_turn(hash: &str, message: &str) -> Vec<String> {
        vec![
            Self::tool_use(
                "g1",
                "Bash",
                json!({"command": format!("git commit -am \"{message}\"")}),
            ),
            Self::tool_result(
                "g1",
                &format!("[main {hash}] {message}\n 1 file changed, 2 insertions(+)"),
                false,
            ),
            Self::result(false, Some(0.01), 10, 10),
        ]
    }
}

/// Render tasks in the markdown spec format.
#[must_use]
pub fn spec_markdown(tasks: &[SpecTask]) -> String {
    let mut out = String::from("# Spec\n\n## Tasks\n");
    for task in tasks {
        out.push_str(&format!(
            "\n### {}: {}\nSize: {}\nStatus: {}\n",
            task.id,
            task.title,
            task.size.letter(),
            task.status
        ));
        for item in &task.completed_items {
            out.push_str(&format!("- [x] {item}\n"));
        }
    }
    out
}

/// Three pending tasks sized S, M and L.
#[must_use]
pub fn sml_snapshot() -> SpecSnapshot {
    SpecSnapshot::new(vec![
        SpecTask::new("T1", "Small task", TaskSize::Small),
        SpecTask::new("T2", "Medium task", TaskSize::Medium),
        SpecTask::new("T3", "Large task", TaskSize::Large),
    ])
}

/// Snapshot with one task per given status, all small.
#[must_use]
pub fn snapshot_with(statuses: &[TaskStatus]) -> SpecSnapshot {
    SpecSnapshot::new(
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                SpecTask::new(format!("T{}", i + 1), format!("Task {}", i + 1), TaskSize::Small)
                    .with_status(*status)
            })
            .collect(),
    )
}

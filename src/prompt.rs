//! Per-iteration prompt assembly.
//!
//! The prompt tells the assistant which tasks to work on, where the spec
//! lives and how to report status, plus any warning or failure context from
//! the loop.

use crate::activity::FailureContext;
use crate::spec::{SpecTask, TaskBatch};

/// Inputs for one iteration's prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub iteration: u32,
    pub max_iterations: Option<u32>,
    /// Where the spec lives.
    pub spec_location: String,
    /// `None` when the spec is unavailable.
    pub batch: Option<TaskBatch>,
    /// Failure of the previous iteration, when the run continued past it.
    pub previous_failure: Option<(String, FailureContext)>,
}

impl PromptContext {
    #[must_use]
    pub fn new(iteration: u32, spec_location: impl Into<String>) -> Self {
        Self {
            iteration,
            spec_location: spec_location.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max: Option<u32>) -> Self {
        self.max_iterations = max;
        self
    }

    #[must_use]
    pub fn with_batch(mut self, batch: TaskBatch) -> Self {
        self.batch = Some(batch);
        self
    }

    #[must_use]
    pub fn with_previous_failure(mut self, message: impl Into<String>, context: FailureContext) -> Self {
        self.previous_failure = Some((message.into(), context));
        self
    }
}

/// Build the full prompt text.
///
/// # Example
///
/// ```
/// use specloop::prompt::{build_prompt, PromptContext};
/// use specloop::spec::{select_tasks, SpecSnapshot, SpecTask, TaskSize};
///
/// let snap = SpecSnapshot::new(vec![SpecTask::new("T001", "Parse events", TaskSize::Small)]);
/// let prompt = build_prompt(&PromptContext::new(1, "SPEC.md").with_batch(select_tasks(&snap, 4)));
/// assert!(prompt.contains("T001"));
/// assert!(prompt.contains("SPEC.md"));
/// ```
#[must_use]
pub fn build_prompt(context: &PromptContext) -> String {
    let mut sections = vec![header_section(context)];

    match &context.batch {
        Some(batch) if batch.is_degraded() => {
            sections.push(degraded_section(batch));
        }
        Some(batch) => sections.push(tasks_section(&batch.tasks, batch.points, batch.budget)),
        None => sections.push(no_spec_section(&context.spec_location)),
    }

    if let Some((message, failure)) = &context.previous_failure {
        sections.push(failure_section(message, failure));
    }

    sections.push(rules_section(&context.spec_location));
    sections.join("\n")
}

fn header_section(context: &PromptContext) -> String {
    let progress = match context.max_iterations {
        Some(max) => format!("{}/{}", context.iteration, max),
        None => context.iteration.to_string(),
    };
    format!(
        "# Iteration {progress}\n\nYou are working through the task spec at `{}`.\n",
        context.spec_location
    )
}

fn tasks_section(tasks: &[SpecTask], points: u32, budget: u32) -> String {
    let mut lines = vec![
        "## Tasks for this iteration".to_string(),
        String::new(),
        format!("**Budget:** {points}/{budget} points"),
        String::new(),
    ];
    for task in tasks {
        lines.push(format!(
            "- **{}** ({}, {}): {}",
            task.id,
            task.size.letter(),
            task.status,
            task.title
        ));
    }
    lines.push(String::new());
    lines.push("Work on these tasks in order and nothing else.".to_string());
    lines.push(String::new());
    lines.join("\n")
}

fn degraded_section(batch: &TaskBatch) -> String {
    let mut lines = vec![
        "## \u{26a0}\u{fe0f} No task fits the budget".to_string(),
        String::new(),
        format!(
            "No pending task fits the per-iteration budget of {} points.",
            batch.budget
        ),
    ];
    if let Some(task) = &batch.oversized {
        lines.push(format!(
            "Make as much progress as you can on **{}** ({}): {}. Split it into smaller steps and tick them off as you go.",
            task.id,
            task.size.letter(),
            task.title
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn no_spec_section(location: &str) -> String {
    format!(
        "## Spec unavailable\n\nThe spec at `{location}` could not be read. Inspect the project and continue the work in progress.\n"
    )
}

fn failure_section(message: &str, failure: &FailureContext) -> String {
    let mut lines = vec![
        "## Previous iteration failed".to_string(),
        String::new(),
        format!("**Error:** {message}"),
    ];
    let rendered = failure.render();
    if !rendered.is_empty() {
        lines.push(String::new());
        lines.push("```".to_string());
        lines.push(rendered.trim_end().to_string());
        lines.push("```".to_string());
    }
    lines.push(String::new());
    lines.join("\n")
}

fn rules_section(location: &str) -> String {
    [
        "## Reporting".to_string(),
        String::new(),
        format!("- When a task is done, set its `Status:` line in `{location}` to `passed`."),
        "- If a task cannot be completed, set it to `failed` and explain why under the task."
            .to_string(),
        "- Tick finished checklist items (`- [x]`).".to_string(),
        "- Commit your work with git after each task.".to_string(),
        String::new(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{select_tasks, SpecSnapshot, TaskSize, TaskStatus};

    fn snap() -> SpecSnapshot {
        SpecSnapshot::new(vec![
            SpecTask::new("T1", "Small", TaskSize::Small),
            SpecTask::new("T2", "Huge", TaskSize::Large),
        ])
    }

    #[test]
    fn test_prompt_lists_selected_tasks() {
        let prompt = build_prompt(
            &PromptContext::new(2, "SPEC.md")
                .with_max_iterations(Some(5))
                .with_batch(select_tasks(&snap(), 1)),
        );
        assert!(prompt.contains("# Iteration 2/5"));
        assert!(prompt.contains("**T1** (S, pending): Small"));
        assert!(!prompt.contains("**T2**"));
        assert!(prompt.contains("**Budget:** 1/1 points"));
    }

    #[test]
    fn test_prompt_warns_when_degraded() {
        let mut s = snap();
        s.tasks[0].status = TaskStatus::Passed;
        let prompt = build_prompt(&PromptContext::new(1, "SPEC.md").with_batch(select_tasks(&s, 2)));
        assert!(prompt.contains("No pending task fits"));
        assert!(prompt.contains("**T2** (L)"));
    }

    #[test]
    fn test_prompt_without_spec() {
        let prompt = build_prompt(&PromptContext::new(1, "missing/SPEC.md"));
        assert!(prompt.contains("Spec unavailable"));
        assert!(prompt.contains("# Iteration 1\n"));
    }

    #[test]
    fn test_prompt_carries_previous_failure() {
        let context = FailureContext {
            last_tool_name: Some("Bash".into()),
            ..FailureContext::default()
        };
        let prompt = build_prompt(
            &PromptContext::new(3, "SPEC.md").with_previous_failure("idle for 120s", context),
        );
        assert!(prompt.contains("## Previous iteration failed"));
        assert!(prompt.contains("idle for 120s"));
        assert!(prompt.contains("Last tool: Bash"));
    }
}

//! One iteration: spawn, stream, fold.
//!
//! Output lines are handled strictly in arrival order on a single task. The
//! parser's open-call map and the activity tracker are owned here and reset
//! with every new iteration.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::outcome::{IterationFailure, IterationResult};
use super::state::IterationPhase;
use crate::activity::ActivityTracker;
use crate::error::LoopError;
use crate::process::{AgentProcess, IterationRequest, OutputLine, ProcessExit};
use crate::sink::{EventSink, LoopEvent};
use crate::spec::TaskBatch;
use crate::stream::tools::summarize_input;
use crate::stream::{ActivityEvent, CommitInfo, StreamParser};

/// Stderr lines kept for failure diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// What an iteration produced.
#[derive(Debug)]
pub struct IterationRun {
    pub result: IterationResult,
    /// Iteration-fatal error or interrupt, when the iteration did not end
    /// normally.
    pub error: Option<LoopError>,
}

/// State of one in-flight iteration.
#[derive(Debug)]
pub struct Iteration {
    number: u32,
    max_iterations: Option<u32>,
    batch: Option<TaskBatch>,
    phase: IterationPhase,
    started_at: DateTime<Utc>,
    parser: StreamParser,
    tracker: ActivityTracker,
    stderr_tail: VecDeque<String>,
    commits: Vec<CommitInfo>,
}

impl Iteration {
    #[must_use]
    pub fn new(
        number: u32,
        max_iterations: Option<u32>,
        batch: Option<TaskBatch>,
        log_capacity: usize,
    ) -> Self {
        Self {
            number,
            max_iterations,
            batch,
            phase: IterationPhase::Idle,
            started_at: Utc::now(),
            parser: StreamParser::new(),
            tracker: ActivityTracker::new(log_capacity),
            stderr_tail: VecDeque::with_capacity(STDERR_TAIL_LINES),
            commits: Vec::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> IterationPhase {
        self.phase
    }

    #[must_use]
    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    fn set_phase(&mut self, next: IterationPhase) {
        debug_assert!(self.phase.can_transition_to(next));
        debug!(iteration = self.number, from = %self.phase, to = %next, "iteration phase");
        self.phase = next;
    }

    /// Fold one output line and forward resulting events.
    pub fn handle_line(&mut self, line: OutputLine<'_>, sink: &mut dyn EventSink) {
        match line {
            OutputLine::Stdout(text) => {
                for event in self.parser.parse_line(text) {
                    self.tracker.record(&event);
                    if let Some(loop_event) = self.to_loop_event(&event) {
                        sink.emit(&loop_event);
                    }
                    if let ActivityEvent::Commit { hash, message } = event {
                        self.commits.push(CommitInfo { hash, message });
                    }
                }
            }
            OutputLine::Stderr(text) => {
                debug!(iteration = self.number, stderr = text, "assistant stderr");
                if self.stderr_tail.len() == STDERR_TAIL_LINES {
                    self.stderr_tail.pop_front();
                }
                self.stderr_tail.push_back(text.to_string());
            }
        }
    }

    fn to_loop_event(&self, event: &ActivityEvent) -> Option<LoopEvent> {
        let iteration = self.number;
        match event {
            ActivityEvent::Thought { text } => Some(LoopEvent::Thought {
                iteration,
                text: text.clone(),
            }),
            ActivityEvent::ToolStart {
                id,
                name,
                category,
                input,
            } => Some(LoopEvent::ToolStarted {
                iteration,
                id: id.clone(),
                name: name.clone(),
                category: *category,
                summary: summarize_input(name, input),
            }),
            ActivityEvent::ToolComplete {
                id,
                name,
                duration_ms,
                is_error,
                ..
            } => Some(LoopEvent::ToolCompleted {
                iteration,
                id: id.clone(),
                name: name.clone(),
                duration_ms: *duration_ms,
                is_error: *is_error,
            }),
            ActivityEvent::Commit { hash, message } => Some(LoopEvent::Commit {
                iteration,
                hash: hash.clone(),
                message: message.clone(),
            }),
            ActivityEvent::Result(_) => None,
        }
    }

    /// Run the iteration to `done`.
    pub async fn run(
        mut self,
        process: &dyn AgentProcess,
        request: &IterationRequest,
        cancel: &CancellationToken,
        sink: &mut dyn EventSink,
        failure_trail: usize,
    ) -> IterationRun {
        let clock = Instant::now();
        self.set_phase(IterationPhase::Running);

        let outcome = process
            .run_iteration(request, cancel, &mut |line: OutputLine<'_>| {
                self.handle_line(line, &mut *sink);
            })
            .await;

        let (exit, error) = match outcome {
            Ok(exit) => {
                let error = self.classify_exit(&exit).err();
                (Some(exit), error)
            }
            Err(e) => (None, Some(e)),
        };
        self.set_phase(IterationPhase::Done);

        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        match error {
            Some(err) => {
                if err.is_cancelled() {
                    info!(iteration = self.number, "iteration interrupted");
                } else {
                    error!(iteration = self.number, error = %err, "iteration failed");
                }
                let mut context = self.tracker.failure_context(failure_trail);
                context.stderr_tail = self.stderr_tail.iter().cloned().collect();
                let failure = IterationFailure::new(&err, self.number, context);
                let result = self.into_result(duration_ms, exit, Some(failure));
                IterationRun {
                    result,
                    error: Some(err),
                }
            }
            None => {
                let result = self.into_result(duration_ms, exit, None);
                info!(
                    iteration = result.iteration,
                    success = result.success,
                    stats = %result.stats.summary(),
                    "iteration done"
                );
                IterationRun {
                    result,
                    error: None,
                }
            }
        }
    }

    /// Decide whether a process exit counts as a normal completion.
    fn classify_exit(&self, exit: &ProcessExit) -> Result<(), LoopError> {
        if let Some(signal) = exit.signal {
            return Err(LoopError::Signaled { signal });
        }
        if !self.parser.result_seen() {
            return Err(LoopError::NoResult {
                exit_code: exit.code,
            });
        }
        if !exit.success() {
            debug!(iteration = self.number, code = ?exit.code, "non-zero exit after result");
        }
        Ok(())
    }

    fn into_result(
        self,
        duration_ms: u64,
        exit: Option<ProcessExit>,
        failure: Option<IterationFailure>,
    ) -> IterationResult {
        let summary = if failure.is_none() {
            self.parser.result().cloned()
        } else {
            None
        };
        let (tasks, degraded) = match &self.batch {
            Some(batch) => (batch.ids(), batch.is_degraded()),
            None => (Vec::new(), false),
        };

        IterationResult {
            iteration: self.number,
            max_iterations: self.max_iterations,
            started_at: self.started_at,
            duration_ms,
            tasks,
            degraded,
            stats: *self.tracker.stats(),
            success: summary.as_ref().is_some_and(|s| s.success()),
            cost_usd: summary.as_ref().and_then(|s| s.cost_usd),
            usage: summary.as_ref().and_then(|s| s.usage),
            session_id: self.parser.session_id().map(str::to_string),
            commits: self.commits,
            completed_tasks: Vec::new(),
            exit,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{MockAgentProcess, MockOutcome, RecordingSink, ScriptedIteration, StreamScript};
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn request() -> IterationRequest {
        IterationRequest {
            iteration: 1,
            prompt: "work".to_string(),
            working_dir: PathBuf::from("."),
            model: "opus".to_string(),
            idle_timeout: Duration::from_secs(5),
        }
    }

    async fn run_script(step: ScriptedIteration) -> (IterationRun, RecordingSink) {
        let agent = MockAgentProcess::new(vec![step]);
        let mut sink = RecordingSink::new();
        let run = Iteration::new(1, Some(3), None, 50)
            .run(&agent, &request(), &CancellationToken::new(), &mut sink, 5)
            .await;
        (run, sink)
    }

    #[tokio::test]
    async fn test_successful_turn_folds_stats_and_cost() {
        let (run, sink) = run_script(ScriptedIteration::lines(StreamScript::successful_turn("s-1"))).await;

        assert!(run.error.is_none());
        let result = run.result;
        assert!(result.success);
        assert_eq!(result.stats.tools_started, 2);
        assert_eq!(result.stats.tools_completed, 2);
        assert_eq!(result.cost_usd, Some(0.05));
        assert_eq!(result.usage.map(|u| u.total()), Some(1200));
        assert_eq!(result.session_id.as_deref(), Some("s-1"));
        assert_eq!(result.exit, Some(ProcessExit::code(0)));
        assert_eq!(sink.count("tool_started"), 2);
        assert_eq!(sink.count("tool_completed"), 2);
        assert_eq!(sink.count("thought"), 1);
    }

    #[tokio::test]
    async fn test_commit_is_recorded_and_emitted() {
        let (run, sink) = run_script(ScriptedIteration::lines(StreamScript::commit_turn("abc1234", "Add parser"))).await;

        assert_eq!(run.result.commits.len(), 1);
        assert_eq!(run.result.commits[0].hash, "abc1234");
        assert_eq!(sink.count("commit"), 1);
    }

    #[tokio::test]
    async fn test_exit_without_result_is_fatal() {
        let step = ScriptedIteration::lines(vec![StreamScript::tool_use(
            "b1",
            "Bash",
            json!({"command": "cargo test"}),
        )])
        .with_stderr("panic: out of memory");
        let (run, _) = run_script(step).await;

        let err = run.error.expect("missing result must fail the iteration");
        assert!(matches!(err, LoopError::NoResult { exit_code: Some(0) }));
        let failure = run.result.failure.expect("failure recorded");
        assert_eq!(failure.kind, FailureKind::NoResult);
        assert_eq!(failure.context.last_tool_name.as_deref(), Some("Bash"));
        assert_eq!(failure.context.stderr_tail, vec!["panic: out of memory"]);
        assert!(!run.result.success);
        assert_eq!(run.result.cost_usd, None);
    }

    #[tokio::test]
    async fn test_signal_exit_is_fatal_even_after_result() {
        let step = ScriptedIteration::idle_turn().ending(MockOutcome::Exit(ProcessExit::signaled(9)));
        let (run, _) = run_script(step).await;
        assert!(matches!(run.error, Some(LoopError::Signaled { signal: 9 })));
    }

    #[tokio::test]
    async fn test_error_result_is_unsuccessful_but_not_fatal() {
        let step = ScriptedIteration::lines(vec![StreamScript::result(true, None, 0, 0)]);
        let (run, _) = run_script(step).await;
        assert!(run.error.is_none());
        assert!(!run.result.success);
    }

    #[tokio::test]
    async fn test_idle_timeout_keeps_partial_stats() {
        let step = ScriptedIteration::lines(vec![StreamScript::tool_use(
            "r1",
            "Read",
            json!({"file_path": "a.rs"}),
        )])
        .ending(MockOutcome::IdleTimeout { secs: 5 });
        let (run, _) = run_script(step).await;

        assert!(matches!(run.error, Some(LoopError::IdleTimeout { secs: 5 })));
        assert_eq!(run.result.stats.tools_started, 1);
        assert_eq!(run.result.stats.in_flight(), 1);
        assert_eq!(run.result.exit, None);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let mut iteration = Iteration::new(1, None, None, 10);
        let mut sink = RecordingSink::new();
        for i in 0..(STDERR_TAIL_LINES + 5) {
            iteration.handle_line(OutputLine::Stderr(&format!("line {i}")), &mut sink);
        }
        assert_eq!(iteration.stderr_tail.len(), STDERR_TAIL_LINES);
        assert_eq!(iteration.stderr_tail.front().map(String::as_str), Some("line 5"));
        assert!(sink.events().is_empty());
    }
}

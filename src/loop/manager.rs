//! Run-level loop manager.
//!
//! The `LoopManager` drives the run state machine:
//!
//! ```text
//! selecting-task ──> iterating ──> complete | stuck | max-iterations | error
//!       ^                │
//!       └────────────────┘
//! ```
//!
//! After every iteration it re-reads the spec, reports newly finished tasks,
//! asks the progress detector for a verdict and decides whether to stop.
//! Collaborators are injected as trait objects so the whole state machine
//! can be exercised with the mocks in [`crate::testing`].
//!
//! # Example
//!
//! ```rust,ignore
//! use specloop::config::LoopConfig;
//! use specloop::r#loop::LoopManager;
//!
//! let mut manager = LoopManager::new(config, process, spec, sink, cancel);
//! let result = manager.run().await?;
//! std::process::exit(result.exit_code);
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::iteration::{Iteration, IterationRun};
use super::outcome::{ExitReason, IterationFailure, IterationResult, RunResult};
use super::state::{LoopState, RunPhase};
use crate::config::LoopConfig;
use crate::error::Result;
use crate::process::{AgentProcess, IterationRequest};
use crate::progress::{ProgressDetector, ProgressVerdict};
use crate::prompt::{build_prompt, PromptContext};
use crate::sink::{EventSink, LoopEvent};
use crate::spec::{select_tasks, SpecSnapshot, SpecSource, TaskBatch};

/// Orchestrates iterations until the run reaches a terminal phase.
pub struct LoopManager {
    config: LoopConfig,
    process: Arc<dyn AgentProcess>,
    spec: Arc<dyn SpecSource>,
    sink: Box<dyn EventSink>,
    cancel: CancellationToken,
    state: LoopState,
    detector: ProgressDetector,
}

impl std::fmt::Debug for LoopManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopManager")
            .field("process", &self.process.name())
            .field("spec", &self.spec.location())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Bookkeeping for one run, separate from the manager's collaborators.
struct RunContext {
    started_at: chrono::DateTime<Utc>,
    max_iterations: Option<u32>,
    /// Last snapshot that could be read.
    snapshot: Option<SpecSnapshot>,
    /// Whether the most recent read succeeded.
    spec_readable: bool,
    iterations: Vec<IterationResult>,
    previous_failure: Option<IterationFailure>,
}

impl RunContext {
    fn pending_ids(&self) -> Vec<String> {
        self.snapshot
            .as_ref()
            .map(|s| s.pending().map(|t| t.id.clone()).collect())
            .unwrap_or_default()
    }

    fn current_batch(&self, budget: u32) -> Option<TaskBatch> {
        if !self.spec_readable {
            return None;
        }
        self.snapshot.as_ref().map(|s| select_tasks(s, budget))
    }

    fn all_terminal(&self) -> bool {
        self.spec_readable && self.snapshot.as_ref().is_some_and(SpecSnapshot::all_terminal)
    }
}

impl LoopManager {
    /// Create a manager for one run.
    #[must_use]
    pub fn new(
        config: LoopConfig,
        process: Arc<dyn AgentProcess>,
        spec: Arc<dyn SpecSource>,
        sink: Box<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Self {
        let detector = ProgressDetector::new(config.stuck_threshold);
        Self {
            config,
            process,
            spec,
            sink,
            cancel,
            state: LoopState::new(),
            detector,
        }
    }

    #[must_use]
    pub fn state(&self) -> &LoopState {
        &self.state
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    fn emit(&mut self, event: LoopEvent) {
        debug!(event = event.kind(), "emit");
        self.sink.emit(&event);
    }

    /// Read the spec, degrading read errors to "unavailable".
    fn load_spec(&self) -> Option<SpecSnapshot> {
        match self.spec.load() {
            Ok(snapshot) => {
                if snapshot.is_none() {
                    debug!(spec = %self.spec.location(), "spec unavailable");
                }
                snapshot
            }
            Err(e) => {
                warn!(spec = %self.spec.location(), error = %e, "spec unreadable, continuing without task context");
                None
            }
        }
    }

    /// Re-read the spec after an iteration.
    ///
    /// A read that lost tasks known from the last good snapshot is treated
    /// like an unreadable spec: the old snapshot is kept and the progress
    /// check is bypassed for this iteration.
    fn reload_spec(&mut self, ctx: &RunContext, iteration: u32) -> Option<SpecSnapshot> {
        let current = self.load_spec()?;
        let Some(previous) = &ctx.snapshot else {
            return Some(current);
        };

        let dropped = current.dropped_ids(previous);
        if dropped.is_empty() && current.len() >= previous.len() {
            return Some(current);
        }

        warn!(
            iteration,
            spec = %self.spec.location(),
            previous_tasks = previous.len(),
            current_tasks = current.len(),
            dropped = ?dropped,
            "spec lost tasks since last read, treating it as unavailable"
        );
        let message = format!(
            "Spec read after iteration {iteration} is missing {} task(s) ({}); ignoring it",
            dropped.len(),
            dropped.join(", ")
        );
        self.emit(LoopEvent::Warning { message });
        None
    }

    /// Run iterations until a terminal phase is reached.
    ///
    /// # Errors
    ///
    /// Returns an error only when the configuration is invalid. Iteration
    /// failures are reported through the returned [`RunResult`].
    pub async fn run(&mut self) -> Result<RunResult> {
        self.config.validate()?;

        let snapshot = self.load_spec();
        let mut ctx = RunContext {
            started_at: Utc::now(),
            max_iterations: self.config.effective_max_iterations(snapshot.is_some()),
            spec_readable: snapshot.is_some(),
            snapshot,
            iterations: Vec::new(),
            previous_failure: None,
        };
        self.detector.prime(ctx.snapshot.clone());

        info!(
            session_id = %self.state.session_id,
            harness = %self.process.name(),
            spec = %self.spec.location(),
            tasks = ctx.snapshot.as_ref().map(SpecSnapshot::len),
            max_iterations = ?ctx.max_iterations,
            "run started"
        );
        self.emit(LoopEvent::RunStarted {
            session_id: self.state.session_id.clone(),
            harness: self.process.name(),
            spec: self.spec.location(),
            total_tasks: ctx.snapshot.as_ref().map(SpecSnapshot::len),
            pending_tasks: ctx.snapshot.as_ref().map(SpecSnapshot::pending_count),
            max_iterations: ctx.max_iterations,
        });

        if ctx.all_terminal() {
            info!("all tasks already terminal");
            return Ok(self.complete(ctx));
        }

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.interrupted(ctx));
            }

            let batch = ctx.current_batch(self.config.task_budget);
            self.state.begin_iteration();
            let number = self.state.iteration;

            let IterationRun { mut result, error } = self.run_iteration(&ctx, batch).await;

            if let Some(err) = &error {
                if err.is_cancelled() {
                    return Ok(self.interrupted(ctx));
                }
                self.state.record_error();
                if self.config.error_policy.should_stop(self.state.consecutive_errors) {
                    return Ok(self.failed(ctx, result));
                }
                warn!(
                    iteration = number,
                    consecutive_errors = self.state.consecutive_errors,
                    transient = err.is_transient(),
                    error = %err,
                    "iteration failed, continuing"
                );
                ctx.previous_failure.clone_from(&result.failure);
            } else {
                self.state.clear_errors();
                ctx.previous_failure = None;
            }

            let current = self.reload_spec(&ctx, number);
            ctx.spec_readable = current.is_some();
            if let (Some(previous), Some(current)) = (&ctx.snapshot, &current) {
                for task in current.newly_terminal(previous) {
                    info!(iteration = number, task = %task.id, status = %task.status, "task finished");
                    result.completed_tasks.push(task.id.clone());
                    self.sink.emit(&LoopEvent::TaskCompleted {
                        iteration: number,
                        id: task.id.clone(),
                        status: task.status,
                    });
                }
            }
            let verdict = self.detector.observe(current.as_ref(), number);
            if current.is_some() {
                ctx.snapshot = current;
            }

            self.emit(LoopEvent::IterationDone {
                iteration: number,
                result: Box::new(result.clone()),
            });
            ctx.iterations.push(result);

            if ctx.all_terminal() {
                return Ok(self.complete(ctx));
            }

            match verdict {
                ProgressVerdict::Stuck { consecutive } => {
                    return Ok(self.stuck(ctx, consecutive));
                }
                ProgressVerdict::NoProgress { consecutive } => {
                    debug!(iteration = number, consecutive, "no progress");
                }
                ProgressVerdict::Bypassed => {
                    debug!(iteration = number, "progress check bypassed, spec unavailable");
                }
                ProgressVerdict::Progress { .. } => {}
            }

            if self.state.at_limit(ctx.max_iterations) {
                return Ok(self.max_iterations(ctx));
            }

            self.state.next_selection();
        }
    }

    async fn run_iteration(&mut self, ctx: &RunContext, batch: Option<TaskBatch>) -> IterationRun {
        let number = self.state.iteration;

        let mut prompt_ctx = PromptContext::new(number, self.spec.location())
            .with_max_iterations(ctx.max_iterations);
        if let Some(batch) = &batch {
            prompt_ctx = prompt_ctx.with_batch(batch.clone());
        }
        if let Some(failure) = &ctx.previous_failure {
            prompt_ctx = prompt_ctx.with_previous_failure(failure.message.clone(), failure.context.clone());
        }
        let prompt = build_prompt(&prompt_ctx);

        let (tasks, points, degraded) = batch
            .as_ref()
            .map(|b| (b.ids(), b.points, b.is_degraded()))
            .unwrap_or_default();
        info!(
            iteration = number,
            max_iterations = ?ctx.max_iterations,
            tasks = ?tasks,
            points,
            "iteration started"
        );
        self.emit(LoopEvent::IterationStarted {
            iteration: number,
            max_iterations: ctx.max_iterations,
            tasks,
            points,
            degraded,
        });
        if let Some(task) = batch.as_ref().and_then(|b| b.oversized.as_ref()) {
            let message = format!(
                "No pending task fits the budget of {} points; {} ({} points) runs degraded",
                self.config.task_budget,
                task.id,
                task.size.points()
            );
            warn!(iteration = number, task = %task.id, "degraded iteration");
            self.emit(LoopEvent::Warning { message });
        }

        let request = IterationRequest {
            iteration: number,
            prompt,
            working_dir: self.config.project_dir.clone(),
            model: self.config.model.clone(),
            idle_timeout: self.config.idle_timeout,
        };
        let iteration = Iteration::new(
            number,
            ctx.max_iterations,
            batch,
            self.config.activity_log_capacity,
        );
        iteration
            .run(
                self.process.as_ref(),
                &request,
                &self.cancel,
                self.sink.as_mut(),
                self.config.failure_trail_len,
            )
            .await
    }

    // =========================================================================
    // Terminal transitions
    // =========================================================================

    fn finish(&mut self, ctx: RunContext, reason: ExitReason) -> RunResult {
        let phase = match reason {
            ExitReason::Complete => RunPhase::Complete,
            ExitReason::Stuck => RunPhase::Stuck,
            ExitReason::MaxIterations => RunPhase::MaxIterations,
            ExitReason::Error => RunPhase::Error,
            ExitReason::Interrupted => RunPhase::Interrupted,
        };
        self.state.transition(phase);
        let pending = ctx.pending_ids();
        let result = RunResult::new(
            self.state.session_id.clone(),
            reason,
            ctx.started_at,
            ctx.iterations,
            pending,
        );
        info!(
            reason = %reason,
            iterations = result.iteration_count(),
            cost_usd = result.total_cost_usd,
            "run finished"
        );
        result
    }

    fn complete(&mut self, ctx: RunContext) -> RunResult {
        self.emit(LoopEvent::RunComplete {
            iterations: self.state.iteration,
        });
        self.finish(ctx, ExitReason::Complete)
    }

    fn stuck(&mut self, ctx: RunContext, consecutive: u32) -> RunResult {
        warn!(
            consecutive,
            threshold = self.detector.threshold(),
            "no progress, stopping"
        );
        self.emit(LoopEvent::Stuck {
            iterations_without_progress: consecutive,
            pending: ctx.pending_ids(),
        });
        self.finish(ctx, ExitReason::Stuck)
    }

    fn max_iterations(&mut self, ctx: RunContext) -> RunResult {
        self.emit(LoopEvent::MaxIterations {
            iterations: self.state.iteration,
            pending: ctx.pending_ids(),
        });
        self.finish(ctx, ExitReason::MaxIterations)
    }

    fn failed(&mut self, mut ctx: RunContext, result: IterationResult) -> RunResult {
        let failure = result.failure.clone();
        self.emit(LoopEvent::IterationDone {
            iteration: result.iteration,
            result: Box::new(result.clone()),
        });
        ctx.iterations.push(result);
        if let Some(failure) = failure {
            self.emit(LoopEvent::RunFailed { failure });
        }
        self.finish(ctx, ExitReason::Error)
    }

    fn interrupted(&mut self, ctx: RunContext) -> RunResult {
        warn!(iteration = self.state.iteration, "run interrupted");
        self.emit(LoopEvent::Interrupted {
            iteration: self.state.iteration,
        });
        self.finish(ctx, ExitReason::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorPolicy;
    use crate::spec::TaskStatus;
    use crate::testing::{
        assert_events_in_order, assert_exit_reason, assert_iteration_count, sml_snapshot,
        MockAgentProcess, MockOutcome, MockSpecSource, RecordingSink, ScriptedIteration,
    };

    fn manager(
        config: LoopConfig,
        agent: MockAgentProcess,
        spec: &MockSpecSource,
    ) -> (LoopManager, RecordingSink, Arc<MockAgentProcess>) {
        let sink = RecordingSink::new();
        let agent = Arc::new(agent);
        let manager = LoopManager::new(
            config,
            agent.clone(),
            Arc::new(spec.clone()),
            Box::new(sink.clone()),
            CancellationToken::new(),
        );
        (manager, sink, agent)
    }

    fn config() -> LoopConfig {
        LoopConfig::new(".")
    }

    #[tokio::test]
    async fn test_already_complete_spec_runs_no_iterations() {
        let spec = MockSpecSource::new(Some(crate::testing::snapshot_with(&[
            TaskStatus::Passed,
            TaskStatus::Failed,
        ])));
        let (mut manager, sink, agent) = manager(config(), MockAgentProcess::default(), &spec);

        let result = manager.run().await.unwrap();

        assert_exit_reason(&result, ExitReason::Complete);
        assert_iteration_count(&result, 0);
        assert_eq!(agent.call_count(), 0);
        assert_eq!(sink.kinds(), vec!["run_started", "run_complete"]);
        assert_eq!(manager.state().phase, RunPhase::Complete);
    }

    #[tokio::test]
    async fn test_completes_when_all_tasks_terminal() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let agent = MockAgentProcess::new(vec![
            ScriptedIteration::idle_turn().marking(&[("T1", TaskStatus::Passed), ("T2", TaskStatus::Passed)]),
            ScriptedIteration::idle_turn().marking(&[("T3", TaskStatus::Failed)]),
        ])
        .with_spec(spec.clone());
        let (mut manager, sink, _) = manager(config(), agent, &spec);

        let result = manager.run().await.unwrap();

        assert_exit_reason(&result, ExitReason::Complete);
        assert_iteration_count(&result, 2);
        assert_eq!(result.iterations[0].tasks, vec!["T1", "T2"]);
        assert_eq!(result.iterations[0].completed_tasks, vec!["T1", "T2"]);
        assert_eq!(result.iterations[1].tasks, vec!["T3"]);
        assert!(result.pending_tasks.is_empty());
        assert_eq!(sink.count("task_completed"), 3);
        assert_events_in_order(
            &sink.kinds(),
            &["run_started", "iteration_started", "task_completed", "iteration_done", "run_complete"],
        );
    }

    #[tokio::test]
    async fn test_stuck_after_threshold() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let agent = MockAgentProcess::default().with_spec(spec.clone());
        let (mut manager, sink, agent) =
            manager(config().with_stuck_threshold(3).with_max_iterations(Some(10)), agent, &spec);

        let result = manager.run().await.unwrap();

        assert_exit_reason(&result, ExitReason::Stuck);
        assert_iteration_count(&result, 3);
        assert_eq!(agent.call_count(), 3);
        assert_eq!(result.pending_tasks, vec!["T1", "T2", "T3"]);
        match sink.last() {
            Some(LoopEvent::Stuck {
                iterations_without_progress,
                ..
            }) => assert_eq!(iterations_without_progress, 3),
            other => panic!("expected stuck event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_iterations_reached() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let agent = MockAgentProcess::new(vec![
            ScriptedIteration::idle_turn().marking(&[("T1", TaskStatus::Passed)]),
            ScriptedIteration::idle_turn().marking(&[("T2", TaskStatus::Passed)]),
        ])
        .with_spec(spec.clone());
        let (mut manager, sink, _) = manager(config().with_max_iterations(Some(2)), agent, &spec);

        let result = manager.run().await.unwrap();

        assert_exit_reason(&result, ExitReason::MaxIterations);
        assert_eq!(result.pending_tasks, vec!["T3"]);
        assert_eq!(sink.count("max_iterations"), 1);
    }

    #[tokio::test]
    async fn test_iteration_error_stops_run_by_default() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let agent = MockAgentProcess::new(vec![
            ScriptedIteration::idle_turn().ending(MockOutcome::IdleTimeout { secs: 120 }),
        ]);
        let (mut manager, sink, agent) = manager(config(), agent, &spec);

        let result = manager.run().await.unwrap();

        assert_exit_reason(&result, ExitReason::Error);
        assert_iteration_count(&result, 1);
        assert_eq!(agent.call_count(), 1);
        let failure = result.failure.expect("failure recorded");
        assert!(failure.message.contains("120s"));
        assert_events_in_order(&sink.kinds(), &["iteration_done", "run_failed"]);
        assert_eq!(sink.count("run_complete"), 0);
    }

    #[tokio::test]
    async fn test_continue_policy_tolerates_errors_and_forwards_context() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let agent = MockAgentProcess::new(vec![
            ScriptedIteration::idle_turn().ending(MockOutcome::IdleTimeout { secs: 5 }),
            ScriptedIteration::idle_turn().marking(&[
                ("T1", TaskStatus::Passed),
                ("T2", TaskStatus::Passed),
                ("T3", TaskStatus::Passed),
            ]),
        ])
        .with_spec(spec.clone());
        let policy = ErrorPolicy::Continue {
            max_consecutive_errors: 2,
        };
        let (mut manager, _, agent) = manager(config().with_error_policy(policy), agent, &spec);

        let result = manager.run().await.unwrap();

        assert_exit_reason(&result, ExitReason::Complete);
        assert_iteration_count(&result, 2);
        let requests = agent.requests();
        assert!(requests[1].prompt.contains("Previous iteration failed"));
        assert!(!requests[0].prompt.contains("Previous iteration failed"));
    }

    #[tokio::test]
    async fn test_continue_policy_stops_at_limit() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let agent = MockAgentProcess::default()
            .with_fallback(ScriptedIteration::idle_turn().ending(MockOutcome::HarnessNotFound));
        let policy = ErrorPolicy::Continue {
            max_consecutive_errors: 2,
        };
        let (mut manager, _, _) = manager(config().with_error_policy(policy), agent, &spec);

        let result = manager.run().await.unwrap();

        assert_exit_reason(&result, ExitReason::Error);
        assert_iteration_count(&result, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_running() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let (mut manager, sink, agent) =
            manager(config().with_task_budget(0), MockAgentProcess::default(), &spec);

        assert!(manager.run().await.is_err());
        assert_eq!(agent.call_count(), 0);
        assert!(sink.events().is_empty());
    }
}

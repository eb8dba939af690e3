//! Controllable test doubles for the loop's collaborators.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::error::{LoopError, Result};
use crate::process::{AgentProcess, IterationRequest, OutputLine, ProcessExit};
use crate::sink::{EventSink, LoopEvent};
use crate::spec::{SpecSnapshot, SpecSource, TaskStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Spec source
// ============================================================================

/// In-memory spec shared between the test, the mock process and the loop.
///
/// Clones share state, so a scripted process can "edit" the spec the way
/// a real assistant edits the file.
#[derive(Debug, Clone, Default)]
pub struct MockSpecSource {
    snapshot: Arc<Mutex<Option<SpecSnapshot>>>,
    loads: Arc<AtomicU32>,
}

impl MockSpecSource {
    #[must_use]
    pub fn new(snapshot: Option<SpecSnapshot>) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(snapshot)),
            loads: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Replace the whole snapshot.
    pub fn set(&self, snapshot: Option<SpecSnapshot>) {
        *lock(&self.snapshot) = snapshot;
    }

    /// Set task statuses by id; unknown ids are ignored.
    pub fn mark(&self, updates: &[(&str, TaskStatus)]) {
        if let Some(snapshot) = lock(&self.snapshot).as_mut() {
            for (id, status) in updates {
                if let Some(task) = snapshot.tasks.iter_mut().find(|t| t.id == *id) {
                    task.status = *status;
                }
            }
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<SpecSnapshot> {
        lock(&self.snapshot).clone()
    }

    /// Number of times the loop read the spec.
    #[must_use]
    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

impl SpecSource for MockSpecSource {
    fn load(&self) -> Result<Option<SpecSnapshot>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.current())
    }

    fn location(&self) -> String {
        "memory://spec".to_string()
    }
}

// ============================================================================
// Agent process
// ============================================================================

/// How a scripted iteration ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Exit(ProcessExit),
    IdleTimeout { secs: u64 },
    HarnessNotFound,
    /// Block until the run is cancelled.
    HangUntilCancelled,
}

/// Spec edit applied before the scripted iteration ends.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecEdit {
    Mark(Vec<(String, TaskStatus)>),
    Replace(Option<SpecSnapshot>),
}

/// One scripted iteration of [`MockAgentProcess`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedIteration {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub spec_edit: Option<SpecEdit>,
    pub outcome: MockOutcome,
}

impl ScriptedIteration {
    /// Exit 0 after emitting `stdout`.
    #[must_use]
    pub fn lines(stdout: Vec<String>) -> Self {
        Self {
            stdout,
            stderr: Vec::new(),
            spec_edit: None,
            outcome: MockOutcome::Exit(ProcessExit::code(0)),
        }
    }

    /// A successful turn that changes nothing.
    #[must_use]
    pub fn idle_turn() -> Self {
        Self::lines(vec![super::StreamScript::result(false, Some(0.01), 10, 10)])
    }

    #[must_use]
    pub fn marking(mut self, updates: &[(&str, TaskStatus)]) -> Self {
        self.spec_edit = Some(SpecEdit::Mark(
            updates.iter().map(|(id, s)| ((*id).to_string(), *s)).collect(),
        ));
        self
    }

    #[must_use]
    pub fn replacing_spec(mut self, snapshot: Option<SpecSnapshot>) -> Self {
        self.spec_edit = Some(SpecEdit::Replace(snapshot));
        self
    }

    #[must_use]
    pub fn with_stderr(mut self, line: &str) -> Self {
        self.stderr.push(line.to_string());
        self
    }

    #[must_use]
    pub fn ending(mut self, outcome: MockOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Agent process that replays scripted iterations.
///
/// When the script runs out, `fallback` is replayed.
///
/// # Example
///
/// ```rust,ignore
/// let spec = MockSpecSource::new(Some(sml_snapshot()));
/// let agent = MockAgentProcess::new(vec![
///     ScriptedIteration::idle_turn().marking(&[("T1", TaskStatus::Passed)]),
/// ])
/// .with_spec(spec.clone());
/// ```
#[derive(Debug)]
pub struct MockAgentProcess {
    script: Mutex<VecDeque<ScriptedIteration>>,
    fallback: ScriptedIteration,
    spec: Option<MockSpecSource>,
    requests: Mutex<Vec<IterationRequest>>,
    call_count: AtomicU32,
}

impl Default for MockAgentProcess {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockAgentProcess {
    #[must_use]
    pub fn new(script: Vec<ScriptedIteration>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: ScriptedIteration::idle_turn(),
            spec: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Spec the scripted edits apply to.
    #[must_use]
    pub fn with_spec(mut self, spec: MockSpecSource) -> Self {
        self.spec = Some(spec);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: ScriptedIteration) -> Self {
        self.fallback = fallback;
        self
    }

    /// Number of iterations run.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received, in order.
    pub fn requests(&self) -> Vec<IterationRequest> {
        lock(&self.requests).clone()
    }

    fn next_step(&self) -> ScriptedIteration {
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn apply(&self, edit: &SpecEdit) {
        let Some(spec) = &self.spec else {
            return;
        };
        match edit {
            SpecEdit::Mark(updates) => {
                let updates: Vec<(&str, TaskStatus)> =
                    updates.iter().map(|(id, s)| (id.as_str(), *s)).collect();
                spec.mark(&updates);
            }
            SpecEdit::Replace(snapshot) => spec.set(snapshot.clone()),
        }
    }
}

#[async_trait]
impl AgentProcess for MockAgentProcess {
    async fn run_iteration(
        &self,
        request: &IterationRequest,
        cancel: &CancellationToken,
        on_output: &mut (dyn for<'a> FnMut(OutputLine<'a>) + Send),
    ) -> Result<ProcessExit> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        let step = self.next_step();

        for line in &step.stderr {
            on_output(OutputLine::Stderr(line));
        }
        for line in &step.stdout {
            if cancel.is_cancelled() {
                return Err(LoopError::Cancelled);
            }
            on_output(OutputLine::Stdout(line));
        }
        if let Some(edit) = &step.spec_edit {
            self.apply(edit);
        }

        match step.outcome {
            MockOutcome::Exit(exit) => Ok(exit),
            MockOutcome::IdleTimeout { secs } => Err(LoopError::IdleTimeout { secs }),
            MockOutcome::HarnessNotFound => Err(LoopError::HarnessNotFound {
                program: "mock".to_string(),
            }),
            MockOutcome::HangUntilCancelled => {
                cancel.cancelled().await;
                Err(LoopError::Cancelled)
            }
        }
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

// ============================================================================
// Event sink
// ============================================================================

/// Sink that records every event; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<LoopEvent>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<LoopEvent> {
        lock(&self.events).clone()
    }

    /// Event type tags in emission order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(LoopEvent::kind).collect()
    }

    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        lock(&self.events).iter().filter(|e| e.kind() == kind).count()
    }

    #[must_use]
    pub fn last(&self) -> Option<LoopEvent> {
        lock(&self.events).last().cloned()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &LoopEvent) {
        lock(&self.events).push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::sml_snapshot;
    use std::path::PathBuf;
    use std::time::Duration;

    fn request() -> IterationRequest {
        IterationRequest {
            iteration: 1,
            prompt: "p".into(),
            working_dir: PathBuf::from("."),
            model: "opus".into(),
            idle_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_spec_source_shares_state() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let clone = spec.clone();
        clone.mark(&[("T1", TaskStatus::Passed)]);

        let snap = spec.load().unwrap().unwrap();
        assert_eq!(snap.status_of("T1"), Some(TaskStatus::Passed));
        assert_eq!(clone.load_count(), 1);
    }

    #[tokio::test]
    async fn test_agent_replays_script_then_fallback() {
        let spec = MockSpecSource::new(Some(sml_snapshot()));
        let agent = MockAgentProcess::new(vec![ScriptedIteration::lines(vec!["a".into(), "b".into()])
            .with_stderr("warn")
            .marking(&[("T2", TaskStatus::Failed)])])
        .with_spec(spec.clone());

        let mut seen = Vec::new();
        let exit = agent
            .run_iteration(&request(), &CancellationToken::new(), &mut |line| {
                seen.push(format!("{line:?}"));
            })
            .await
            .unwrap();
        assert!(exit.success());
        assert_eq!(seen.len(), 3);
        assert_eq!(spec.current().unwrap().status_of("T2"), Some(TaskStatus::Failed));

        let mut count = 0;
        agent
            .run_iteration(&request(), &CancellationToken::new(), &mut |_| count += 1)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(agent.call_count(), 2);
        assert_eq!(agent.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_agent_hang_returns_on_cancel() {
        let agent = MockAgentProcess::new(vec![
            ScriptedIteration::lines(vec![]).ending(MockOutcome::HangUntilCancelled)
        ]);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = agent
            .run_iteration(&request(), &token, &mut |_| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_recording_sink_clones_share_events() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer.emit(&LoopEvent::RunComplete { iterations: 1 });
        assert_eq!(sink.kinds(), vec!["run_complete"]);
        assert_eq!(sink.count("run_complete"), 1);
        assert!(sink.last().is_some());
    }
}

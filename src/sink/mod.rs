//! Lifecycle notifications and their renderers.
//!
//! The loop emits [`LoopEvent`]s into an [`EventSink`] and never knows how
//! they are shown:
//!
//! - [`headless`] - One JSON object per line for scripts and CI
//! - [`console`] - Interactive view with a live spinner

pub mod console;
pub mod headless;

pub use console::ConsoleSink;
pub use headless::{EventEnvelope, HeadlessSink, SCHEMA_VERSION};

use serde::{Deserialize, Serialize};

use crate::r#loop::{IterationFailure, IterationResult};
use crate::spec::TaskStatus;
use crate::stream::ToolCategory;

/// Notification emitted by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    RunStarted {
        session_id: String,
        harness: String,
        spec: String,
        /// `None` when the spec is unavailable.
        total_tasks: Option<usize>,
        pending_tasks: Option<usize>,
        max_iterations: Option<u32>,
    },
    IterationStarted {
        iteration: u32,
        max_iterations: Option<u32>,
        tasks: Vec<String>,
        points: u32,
        degraded: bool,
    },
    ToolStarted {
        iteration: u32,
        id: String,
        name: String,
        category: ToolCategory,
        summary: String,
    },
    ToolCompleted {
        iteration: u32,
        id: String,
        name: Option<String>,
        duration_ms: Option<u64>,
        is_error: bool,
    },
    Thought {
        iteration: u32,
        text: String,
    },
    Commit {
        iteration: u32,
        hash: String,
        message: String,
    },
    IterationDone {
        iteration: u32,
        result: Box<IterationResult>,
    },
    TaskCompleted {
        iteration: u32,
        id: String,
        status: TaskStatus,
    },
    Warning {
        message: String,
    },
    Stuck {
        iterations_without_progress: u32,
        pending: Vec<String>,
    },
    MaxIterations {
        iterations: u32,
        pending: Vec<String>,
    },
    RunComplete {
        iterations: u32,
    },
    RunFailed {
        failure: IterationFailure,
    },
    Interrupted {
        iteration: u32,
    },
}

impl LoopEvent {
    /// Serialised `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::IterationStarted { .. } => "iteration_started",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolCompleted { .. } => "tool_completed",
            Self::Thought { .. } => "thought",
            Self::Commit { .. } => "commit",
            Self::IterationDone { .. } => "iteration_done",
            Self::TaskCompleted { .. } => "task_completed",
            Self::Warning { .. } => "warning",
            Self::Stuck { .. } => "stuck",
            Self::MaxIterations { .. } => "max_iterations",
            Self::RunComplete { .. } => "run_complete",
            Self::RunFailed { .. } => "run_failed",
            Self::Interrupted { .. } => "interrupted",
        }
    }

    /// Whether this event ends the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stuck { .. }
                | Self::MaxIterations { .. }
                | Self::RunComplete { .. }
                | Self::RunFailed { .. }
                | Self::Interrupted { .. }
        )
    }
}

/// Receives loop events. Rendering failures must not fail the run.
pub trait EventSink: Send {
    fn emit(&mut self, event: &LoopEvent);
}

/// Forwards every event to several sinks in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventSink for FanoutSink {
    fn emit(&mut self, event: &LoopEvent) {
        for sink in &mut self.sinks {
            sink.emit(event);
        }
    }
}

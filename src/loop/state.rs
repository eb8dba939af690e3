//! Loop state types and transitions.
//!
//! Two layers: the per-iteration phase (`idle → running → done`) and the
//! run-level phase (`selecting_task → iterating → terminal`).

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Phase of a single iteration.
///
/// # Example
///
/// ```
/// use specloop::r#loop::state::IterationPhase;
///
/// assert!(IterationPhase::Idle.can_transition_to(IterationPhase::Running));
/// assert!(!IterationPhase::Done.can_transition_to(IterationPhase::Running));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPhase {
    /// Not yet started.
    #[default]
    Idle,
    /// Process active, output streaming.
    Running,
    /// Finished, with success or error.
    Done,
}

impl IterationPhase {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running) | (Self::Running, Self::Done) | (Self::Idle, Self::Done)
        )
    }
}

impl std::fmt::Display for IterationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Phase of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Choosing the next task batch.
    #[default]
    SelectingTask,
    /// An iteration is in flight.
    Iterating,
    Complete,
    Stuck,
    MaxIterations,
    Error,
    Interrupted,
}

impl RunPhase {
    /// Whether the run has stopped.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::SelectingTask | Self::Iterating)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::SelectingTask => matches!(
                next,
                Self::Iterating | Self::Complete | Self::MaxIterations | Self::Interrupted
            ),
            Self::Iterating => next != Self::Iterating,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SelectingTask => "selecting_task",
            Self::Iterating => "iterating",
            Self::Complete => "complete",
            Self::Stuck => "stuck",
            Self::MaxIterations => "max_iterations",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

/// Mutable state of a run.
///
/// # Example
///
/// ```
/// use specloop::r#loop::state::{LoopState, RunPhase};
///
/// let mut state = LoopState::new();
/// assert_eq!(state.iteration, 0);
/// state.begin_iteration();
/// assert_eq!(state.iteration, 1);
/// assert_eq!(state.phase, RunPhase::Iterating);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    /// Current iteration number (1-indexed once the first one starts)
    pub iteration: u32,
    pub phase: RunPhase,
    /// Iteration-fatal errors in a row
    pub consecutive_errors: u32,
    pub session_id: String,
}

impl LoopState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            iteration: 0,
            phase: RunPhase::SelectingTask,
            consecutive_errors: 0,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Move to `next`, logging transitions the state machine does not allow.
    pub fn transition(&mut self, next: RunPhase) {
        if !self.phase.can_transition_to(next) {
            debug!(from = %self.phase, to = %next, "unexpected run phase transition");
        }
        debug!(iteration = self.iteration, from = %self.phase, to = %next, "run phase");
        self.phase = next;
    }

    /// Enter the next iteration.
    pub fn begin_iteration(&mut self) {
        self.iteration += 1;
        self.transition(RunPhase::Iterating);
    }

    /// Back to selection after a non-terminal iteration.
    pub fn next_selection(&mut self) {
        self.transition(RunPhase::SelectingTask);
    }

    pub fn record_error(&mut self) {
        self.consecutive_errors += 1;
    }

    pub fn clear_errors(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Whether the iteration limit has been reached.
    #[must_use]
    pub fn at_limit(&self, max_iterations: Option<u32>) -> bool {
        max_iterations.is_some_and(|max| self.iteration >= max)
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

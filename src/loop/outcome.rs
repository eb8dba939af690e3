//! Iteration and run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{FailureContext, Stats};
use crate::error::{FailureKind, LoopError};
use crate::process::ProcessExit;
use crate::stream::{CommitInfo, Usage};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Every task is terminal.
    Complete,
    /// No progress within the threshold.
    Stuck,
    /// Iteration limit reached with work remaining.
    MaxIterations,
    /// An iteration-fatal error stopped the run.
    Error,
    /// The user interrupted the run.
    Interrupted,
}

impl ExitReason {
    /// Process exit code.
    ///
    /// ```
    /// use specloop::r#loop::ExitReason;
    ///
    /// assert_eq!(ExitReason::Complete.exit_code(), 0);
    /// assert_eq!(ExitReason::Stuck.exit_code(), 1);
    /// assert_eq!(ExitReason::MaxIterations.exit_code(), 2);
    /// assert_eq!(ExitReason::Error.exit_code(), 3);
    /// ```
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Stuck => 1,
            Self::MaxIterations => 2,
            Self::Error => 3,
            Self::Interrupted => 130,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Stuck => "stuck",
            Self::MaxIterations => "max_iterations",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialisable record of an iteration-fatal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationFailure {
    pub kind: FailureKind,
    pub message: String,
    pub iteration: u32,
    pub context: FailureContext,
}

impl IterationFailure {
    #[must_use]
    pub fn new(error: &LoopError, iteration: u32, context: FailureContext) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            iteration,
            context,
        }
    }
}

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    /// 1-indexed.
    pub iteration: u32,
    /// Planned total, `None` when running until done.
    pub max_iterations: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Ids of the tasks selected for this iteration.
    pub tasks: Vec<String>,
    /// No task fit the budget.
    pub degraded: bool,
    pub stats: Stats,
    /// Process ended normally with a successful result message.
    pub success: bool,
    /// Only populated when a result message arrived.
    pub cost_usd: Option<f64>,
    pub usage: Option<Usage>,
    pub session_id: Option<String>,
    pub commits: Vec<CommitInfo>,
    /// Tasks that became terminal during this iteration.
    pub completed_tasks: Vec<String>,
    pub exit: Option<ProcessExit>,
    pub failure: Option<IterationFailure>,
}

impl IterationResult {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Terminal output of a run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub session_id: String,
    pub exit_reason: ExitReason,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub iterations: Vec<IterationResult>,
    /// Stats summed across iterations.
    pub total_stats: Stats,
    pub total_usage: Usage,
    pub total_cost_usd: f64,
    /// Ids of tasks still non-terminal at the end, when the spec was readable.
    pub pending_tasks: Vec<String>,
    /// Failure that stopped the run, or the last one tolerated.
    pub failure: Option<IterationFailure>,
}

impl RunResult {
    /// Fold finished iterations into a run result.
    #[must_use]
    pub fn new(
        session_id: String,
        exit_reason: ExitReason,
        started_at: DateTime<Utc>,
        iterations: Vec<IterationResult>,
        pending_tasks: Vec<String>,
    ) -> Self {
        let mut total_stats = Stats::default();
        let mut total_usage = Usage::default();
        let mut total_cost_usd = 0.0;
        for it in &iterations {
            total_stats += it.stats;
            if let Some(usage) = it.usage {
                total_usage += usage;
            }
            total_cost_usd += it.cost_usd.unwrap_or(0.0);
        }
        let failure = iterations.iter().rev().find_map(|it| it.failure.clone());

        Self {
            session_id,
            exit_reason,
            exit_code: exit_reason.exit_code(),
            started_at,
            finished_at: Utc::now(),
            iterations,
            total_stats,
            total_usage,
            total_cost_usd,
            pending_tasks,
            failure,
        }
    }

    #[must_use]
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    #[must_use]
    pub fn commits(&self) -> Vec<&CommitInfo> {
        self.iterations.iter().flat_map(|it| &it.commits).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iteration(n: u32, cost: Option<f64>, failure: Option<IterationFailure>) -> IterationResult {
        IterationResult {
            iteration: n,
            max_iterations: Some(3),
            started_at: Utc::now(),
            duration_ms: 10,
            tasks: vec![],
            degraded: false,
            stats: Stats {
                tools_started: 2,
                tools_completed: 2,
                ..Stats::default()
            },
            success: failure.is_none(),
            cost_usd: cost,
            usage: cost.map(|_| Usage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            session_id: None,
            commits: vec![CommitInfo {
                hash: format!("abc{n}def"),
                message: "m".into(),
            }],
            completed_tasks: vec![],
            exit: None,
            failure,
        }
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes: std::collections::HashSet<_> = [
            ExitReason::Complete,
            ExitReason::Stuck,
            ExitReason::MaxIterations,
            ExitReason::Error,
            ExitReason::Interrupted,
        ]
        .iter()
        .map(|r| r.exit_code())
        .collect();
        assert_eq!(codes.len(), 5);
        assert_eq!(ExitReason::Interrupted.exit_code(), 130);
    }

    #[test]
    fn test_run_result_totals() {
        let failure = IterationFailure::new(
            &LoopError::IdleTimeout { secs: 5 },
            2,
            FailureContext::default(),
        );
        let result = RunResult::new(
            "s".into(),
            ExitReason::Error,
            Utc::now(),
            vec![iteration(1, Some(0.5), None), iteration(2, None, Some(failure))],
            vec!["T3".into()],
        );

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.iteration_count(), 2);
        assert_eq!(result.total_stats.tools_started, 4);
        assert_eq!(result.total_usage.total(), 15);
        assert!((result.total_cost_usd - 0.5).abs() < f64::EPSILON);
        assert_eq!(result.failure.as_ref().map(|f| f.kind), Some(FailureKind::IdleTimeout));
        assert_eq!(result.commits().len(), 2);
    }

    #[test]
    fn test_run_result_serializes() {
        let result = RunResult::new("s".into(), ExitReason::Complete, Utc::now(), vec![], vec![]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["exit_reason"], "complete");
        assert_eq!(json["exit_code"], 0);
    }
}

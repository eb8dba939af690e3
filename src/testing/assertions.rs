//! Custom assertions for domain-specific testing.

use crate::activity::Stats;
use crate::r#loop::{ExitReason, RunResult};

/// Assert a run stopped for the expected reason.
///
/// # Panics
///
/// Panics with the failure (if any) when the reason differs.
pub fn assert_exit_reason(result: &RunResult, expected: ExitReason) {
    assert_eq!(
        result.exit_reason,
        expected,
        "Expected run to end with {expected}, got {} after {} iteration(s).\nFailure: {:?}",
        result.exit_reason,
        result.iterations.len(),
        result.failure.as_ref().map(|f| &f.message)
    );
    assert_eq!(result.exit_code, expected.exit_code());
}

/// Assert the number of iterations a run went through.
///
/// # Panics
///
/// Panics if the count differs.
pub fn assert_iteration_count(result: &RunResult, expected: usize) {
    assert_eq!(
        result.iterations.len(),
        expected,
        "Expected {expected} iteration(s), got {}",
        result.iterations.len()
    );
}

/// Assert finished tool calls never outnumber started ones.
///
/// # Panics
///
/// Panics if `tools_completed + tools_errored > tools_started`.
pub fn assert_stats_consistent(stats: &Stats) {
    assert!(
        stats.tools_completed + stats.tools_errored <= stats.tools_started,
        "Completed ({}) + errored ({}) exceeds started ({})",
        stats.tools_completed,
        stats.tools_errored,
        stats.tools_started
    );
}

/// Assert `expected` appears in `kinds` as an ordered subsequence.
///
/// # Panics
///
/// Panics naming the first expected kind that was not found in order.
pub fn assert_events_in_order(kinds: &[&str], expected: &[&str]) {
    let mut remaining = kinds.iter();
    for want in expected {
        assert!(
            remaining.any(|k| k == want),
            "Event '{want}' missing or out of order in {kinds:?}"
        );
    }
}

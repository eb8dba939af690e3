//! Stuck/progress detection across iterations.
//!
//! Progress means at least one task moved from a non-terminal to a terminal
//! status, or the number of completed item texts grew. The detector counts
//! consecutive iterations without progress and reports stuck once the count
//! reaches the threshold. It never reports stuck on iteration 1, and it is
//! bypassed entirely while the spec is unavailable.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::spec::SpecSnapshot;

/// Outcome of one progress check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProgressVerdict {
    /// Something moved; the counter was reset.
    Progress {
        /// Tasks that became terminal since the last check.
        newly_terminal: Vec<String>,
    },
    /// Nothing moved, threshold not reached yet.
    NoProgress { consecutive: u32 },
    /// Threshold reached.
    Stuck { consecutive: u32 },
    /// No spec snapshot to compare.
    Bypassed,
}

impl ProgressVerdict {
    #[must_use]
    pub fn is_stuck(&self) -> bool {
        matches!(self, Self::Stuck { .. })
    }

    #[must_use]
    pub fn made_progress(&self) -> bool {
        matches!(self, Self::Progress { .. })
    }
}

/// Whether `current` shows progress relative to `previous`.
#[must_use]
pub fn made_progress(previous: &SpecSnapshot, current: &SpecSnapshot) -> bool {
    !current.newly_terminal(previous).is_empty()
        || current.completed_texts().len() > previous.completed_texts().len()
}

/// Tracks consecutive iterations without progress.
#[derive(Debug, Clone)]
pub struct ProgressDetector {
    threshold: u32,
    consecutive: u32,
    previous: Option<SpecSnapshot>,
}

impl ProgressDetector {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            previous: None,
        }
    }

    /// Seed the baseline with the snapshot taken before the first iteration.
    pub fn prime(&mut self, snapshot: Option<SpecSnapshot>) {
        self.previous = snapshot;
        self.consecutive = 0;
    }

    /// Compare `current` against the last observed snapshot.
    ///
    /// An unavailable spec leaves the counter and baseline untouched.
    pub fn observe(&mut self, current: Option<&SpecSnapshot>, iteration: u32) -> ProgressVerdict {
        let Some(current) = current else {
            debug!(iteration, "spec unavailable, progress detection bypassed");
            return ProgressVerdict::Bypassed;
        };

        let verdict = match self.previous.as_ref() {
            // No baseline: vacuous progress
            None => ProgressVerdict::Progress {
                newly_terminal: Vec::new(),
            },
            Some(previous) if made_progress(previous, current) => ProgressVerdict::Progress {
                newly_terminal: current
                    .newly_terminal(previous)
                    .iter()
                    .map(|t| t.id.clone())
                    .collect(),
            },
            Some(_) => {
                self.consecutive += 1;
                if self.consecutive >= self.threshold && iteration > 1 {
                    ProgressVerdict::Stuck {
                        consecutive: self.consecutive,
                    }
                } else {
                    ProgressVerdict::NoProgress {
                        consecutive: self.consecutive,
                    }
                }
            }
        };

        if verdict.made_progress() {
            self.consecutive = 0;
        }
        debug!(iteration, consecutive = self.consecutive, ?verdict, "progress check");

        self.previous = Some(current.clone());
        verdict
    }

    /// Consecutive iterations without progress so far.
    #[must_use]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Last snapshot observed.
    #[must_use]
    pub fn baseline(&self) -> Option<&SpecSnapshot> {
        self.previous.as_ref()
    }
}

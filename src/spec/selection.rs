//! Budget-based task selection.
//!
//! Pending tasks are taken in spec order while their summed points fit the
//! budget. Selection stops at the first task that does not fit, so a large
//! task is never skipped in favour of smaller ones behind it.

use serde::{Deserialize, Serialize};

use super::{SpecSnapshot, SpecTask};

/// Tasks chosen for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBatch {
    pub tasks: Vec<SpecTask>,
    /// Sum of the selected tasks' points.
    pub points: u32,
    pub budget: u32,
    /// First pending task when it alone exceeds the budget.
    pub oversized: Option<SpecTask>,
}

impl TaskBatch {
    /// No task fit the budget although pending work remains.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.tasks.is_empty() && self.oversized.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Tasks the prompt should steer toward: the batch, or the oversized
    /// task when nothing fit.
    #[must_use]
    pub fn focus(&self) -> Vec<&SpecTask> {
        if self.tasks.is_empty() {
            self.oversized.iter().collect()
        } else {
            self.tasks.iter().collect()
        }
    }
}

/// Select the next batch of pending tasks within `budget` points.
///
/// # Example
///
/// ```
/// use specloop::spec::{select_tasks, SpecSnapshot, SpecTask, TaskSize};
///
/// let snap = SpecSnapshot::new(vec![
///     SpecTask::new("T1", "a", TaskSize::Small),
///     SpecTask::new("T2", "b", TaskSize::Medium),
///     SpecTask::new("T3", "c", TaskSize::Large),
/// ]);
/// assert_eq!(select_tasks(&snap, 4).ids(), vec!["T1", "T2"]);
/// ```
#[must_use]
pub fn select_tasks(snapshot: &SpecSnapshot, budget: u32) -> TaskBatch {
    let mut batch = TaskBatch {
        budget,
        ..TaskBatch::default()
    };

    for task in snapshot.pending() {
        let points = task.size.points();
        if batch.points + points > budget {
            if batch.tasks.is_empty() {
                batch.oversized = Some(task.clone());
            }
            break;
        }
        batch.points += points;
        batch.tasks.push(task.clone());
    }

    batch
}

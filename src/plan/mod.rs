//! Plan model and markdown parsing.
//!
//! A plan lives as one issue's body. The parsed form is derived state:
//! updates always patch the raw body textually and write that back, so any
//! human edits outside the structured fields survive every engine write.

mod parser;
mod task;

pub use parser::{parse, patch_task_status, render, render_task_line};
pub use task::{Task, TaskStatus};

use serde::{Deserialize, Serialize};

/// Structured view of one plan issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub goal: String,
    pub context: String,
    pub tasks: Vec<Task>,
    pub verification_steps: Vec<String>,
    /// The body text this plan was parsed from; the authority for writes.
    pub raw_body: String,
}

impl Plan {
    pub fn find_task(&self, number: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.number == number)
    }

    /// A task is claimable iff it is pending, unassigned, and every
    /// dependency is completed. A dependency on a missing task never
    /// satisfies.
    pub fn is_claimable(&self, task: &Task) -> bool {
        task.status == TaskStatus::Pending
            && task.assignee.is_none()
            && task.dependencies.iter().all(|dep| {
                self.find_task(*dep)
                    .is_some_and(|t| t.status == TaskStatus::Completed)
            })
    }

    /// First claimable task in plan order.
    pub fn next_claimable(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| self.is_claimable(t))
    }

    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty()
            && self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// Tasks currently held (claimed or in progress).
    pub fn held_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.status.is_held())
    }
}

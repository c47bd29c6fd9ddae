//! Optimistic task claiming.
//!
//! The tracker offers no conditional write, so a claim is: re-read the plan
//! as late as possible, patch the one task line, write the body back, then
//! re-read once more and check the assignee actually stuck. Losing that
//! race is a normal outcome, not an error.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::plan::{self, TaskStatus};
use crate::store::{IssueStore, RepoRef};

/// Tagged result of a claim attempt, so callers can distinguish "I won"
/// from "someone else won" and react accordingly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub claimed: bool,
    /// Whoever holds the task after the attempt, if anyone.
    pub claimed_by: Option<String>,
}

impl ClaimOutcome {
    fn won(claimant: &str) -> Self {
        Self {
            claimed: true,
            claimed_by: Some(claimant.to_string()),
        }
    }

    fn lost(holder: Option<String>) -> Self {
        Self {
            claimed: false,
            claimed_by: holder,
        }
    }
}

pub struct ClaimCoordinator {
    store: Arc<dyn IssueStore>,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn IssueStore>) -> Self {
        Self { store }
    }

    /// Attempt to claim `task_number` of the plan in `plan_issue`.
    ///
    /// Never trusts a cached plan: the body is fetched fresh immediately
    /// before the write, and verified again after it. A post-write mismatch
    /// means a concurrent claimant's write landed last; this attempt aborts
    /// and reports the observed winner.
    pub async fn claim(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        task_number: u32,
        claimant: &str,
    ) -> Result<ClaimOutcome> {
        let issue = self.store.get_issue(repo, plan_issue).await?;
        let Some(current) = plan::parse(&issue.title, &issue.body) else {
            debug!(repo = %repo, issue = plan_issue, "Body no longer parses as a plan");
            return Ok(ClaimOutcome::lost(None));
        };

        let Some(task) = current.find_task(task_number) else {
            return Ok(ClaimOutcome::lost(None));
        };

        // Idempotent re-claim: no second write, the body already says so.
        if task.status.is_held() && task.assignee.as_deref() == Some(claimant) {
            return Ok(ClaimOutcome::won(claimant));
        }

        if !current.is_claimable(task) {
            debug!(
                repo = %repo,
                issue = plan_issue,
                task = task_number,
                holder = task.assignee.as_deref().unwrap_or("<none>"),
                status = %task.status,
                "Task not claimable"
            );
            return Ok(ClaimOutcome::lost(task.assignee.clone()));
        }

        let Some(patched) = plan::patch_task_status(
            &current.raw_body,
            task_number,
            TaskStatus::Claimed,
            Some(claimant),
            Some(Utc::now()),
        ) else {
            return Ok(ClaimOutcome::lost(None));
        };

        self.store
            .update_issue_body(repo, plan_issue, &patched)
            .await?;

        // Post-claim verification: whichever write landed last owns the
        // task. Re-read and compare before doing any work.
        let winner = self.verify_claim(repo, plan_issue, task_number).await?;
        match winner {
            Some(holder) if holder == claimant => {
                info!(repo = %repo, issue = plan_issue, task = task_number, "Claim verified");
                Ok(ClaimOutcome::won(claimant))
            }
            holder => {
                warn!(
                    repo = %repo,
                    issue = plan_issue,
                    task = task_number,
                    winner = holder.as_deref().unwrap_or("<none>"),
                    "Lost claim race, aborting"
                );
                Ok(ClaimOutcome::lost(holder))
            }
        }
    }

    /// Advance a verified claim to in-progress before execution starts.
    pub async fn mark_in_progress(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        task_number: u32,
        claimant: &str,
    ) -> Result<bool> {
        let issue = self.store.get_issue(repo, plan_issue).await?;
        let Some(current) = plan::parse(&issue.title, &issue.body) else {
            return Ok(false);
        };
        let Some(task) = current.find_task(task_number) else {
            return Ok(false);
        };
        if task.assignee.as_deref() != Some(claimant) {
            return Ok(false);
        }
        if task.status == TaskStatus::InProgress {
            return Ok(true);
        }

        let Some(patched) = plan::patch_task_status(
            &current.raw_body,
            task_number,
            TaskStatus::InProgress,
            Some(claimant),
            task.claimed_at,
        ) else {
            return Ok(false);
        };
        self.store
            .update_issue_body(repo, plan_issue, &patched)
            .await?;
        Ok(true)
    }

    async fn verify_claim(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        task_number: u32,
    ) -> Result<Option<String>> {
        let issue = self.store.get_issue(repo, plan_issue).await?;
        let holder = plan::parse(&issue.title, &issue.body)
            .and_then(|p| p.find_task(task_number).cloned())
            .and_then(|t| t.assignee);
        Ok(holder)
    }
}

//! Pull-request lifecycle: review gating, merge-gated completion, and the
//! bounded recovery strategies for stuck pull requests and stale claims.

mod assessment;

pub use assessment::{assess, is_bare_approval, ReviewAssessment};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{ClaimConfig, ReviewConfig};
use crate::error::{Result, StoreError};
use crate::git::parse_task_branch;
use crate::plan::{self, TaskStatus};
use crate::store::{IssueState, IssueStore, PullRequest, RepoRef};

/// Why a pull request (or claim) was forcibly recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    /// Merge failed on conflicts.
    MergeConflict,
    /// Every reviewer rejected and the rejection timeout elapsed.
    StuckRejected,
    /// No reviews at all past the (longer) unreviewed timeout.
    StuckUnreviewed,
    /// Held task with no open pull request past the staleness window.
    StaleClaim,
}

impl std::fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MergeConflict => write!(f, "merge conflict"),
            Self::StuckRejected => write!(f, "stuck rejected"),
            Self::StuckUnreviewed => write!(f, "stuck unreviewed"),
            Self::StaleClaim => write!(f, "stale claim"),
        }
    }
}

/// What one review pass over a plan's pull requests did.
#[derive(Debug, Default)]
pub struct ReviewCycleReport {
    pub merged_tasks: Vec<u32>,
    pub recovered_tasks: Vec<u32>,
    pub plan_completed: bool,
}

pub struct PrLifecycleManager {
    store: Arc<dyn IssueStore>,
    review: ReviewConfig,
    claim: ClaimConfig,
    feedback_label: String,
}

impl PrLifecycleManager {
    pub fn new(
        store: Arc<dyn IssueStore>,
        review: ReviewConfig,
        claim: ClaimConfig,
        feedback_label: impl Into<String>,
    ) -> Self {
        Self {
            store,
            review,
            claim,
            feedback_label: feedback_label.into(),
        }
    }

    /// Drive every open task pull request of one plan forward: merge what
    /// is fully approved, recover what is stuck, and sweep stale claims.
    ///
    /// Failures on one pull request never abort the others.
    pub async fn process_plan(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        now: DateTime<Utc>,
    ) -> Result<ReviewCycleReport> {
        let mut report = ReviewCycleReport::default();

        let issue = self.store.get_issue(repo, plan_issue).await?;
        let Some(current) = plan::parse(&issue.title, &issue.body) else {
            return Ok(report);
        };

        let open_pulls = self.store.list_pulls(repo, IssueState::Open).await?;
        let task_pulls: Vec<(u32, &PullRequest)> = open_pulls
            .iter()
            .filter(|pr| !pr.draft)
            .filter_map(|pr| parse_task_branch(&pr.head_branch).map(|n| (n, pr)))
            .filter(|(n, _)| current.find_task(*n).is_some())
            .collect();

        for (task_number, pull) in task_pulls {
            match self.process_pull(repo, plan_issue, pull, task_number, now).await {
                Ok(Some(PullDisposition::Merged)) => report.merged_tasks.push(task_number),
                Ok(Some(PullDisposition::Recovered(kind))) => {
                    info!(repo = %repo, pr = pull.number, task = task_number, kind = %kind, "Recovered pull request");
                    report.recovered_tasks.push(task_number);
                }
                Ok(None) => {}
                Err(e) => {
                    // Isolation boundary: one stuck pull request must not
                    // block the rest of the plan.
                    warn!(repo = %repo, pr = pull.number, error = %e, "Pull request processing failed");
                }
            }
        }

        if let Err(e) = self
            .sweep_stale_claims(repo, plan_issue, now, &open_pulls, &mut report)
            .await
        {
            warn!(repo = %repo, issue = plan_issue, error = %e, "Stale claim sweep failed");
        }

        // Re-read after merges: completion is judged from the final
        // written state, not from what this process thinks it did.
        if !report.merged_tasks.is_empty() {
            let issue = self.store.get_issue(repo, plan_issue).await?;
            if let Some(current) = plan::parse(&issue.title, &issue.body) {
                if current.is_complete() {
                    info!(repo = %repo, issue = plan_issue, "All tasks completed, closing plan");
                    self.store.close_issue(repo, plan_issue).await?;
                    report.plan_completed = true;
                }
            }
        }

        Ok(report)
    }

    async fn process_pull(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        pull: &PullRequest,
        task_number: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<PullDisposition>> {
        let reviews = self.store.list_reviews(repo, pull.number).await?;
        let assessment = assess(pull, &reviews);
        let age_secs = now.signed_duration_since(pull.created_at).num_seconds();

        debug!(
            repo = %repo,
            pr = pull.number,
            approvals = assessment.approvals,
            rejections = assessment.rejections,
            pending = assessment.pending_reviewers.len(),
            age_secs,
            "Assessed pull request"
        );

        if assessment.is_mergeable() {
            return match self
                .store
                .merge_pull(repo, pull.number, &self.review.merge_method)
                .await
            {
                Ok(()) => {
                    self.finish_merged_task(repo, plan_issue, pull, task_number, &reviews)
                        .await?;
                    Ok(Some(PullDisposition::Merged))
                }
                Err(StoreError::MergeConflict(detail)) => {
                    warn!(repo = %repo, pr = pull.number, detail = %detail, "Merge conflict");
                    self.recover(repo, plan_issue, pull, task_number, RecoveryKind::MergeConflict)
                        .await?;
                    Ok(Some(PullDisposition::Recovered(RecoveryKind::MergeConflict)))
                }
                Err(e) => Err(e.into()),
            };
        }

        // Recovery B: unanimous rejection past the rejection timeout.
        // Persistent disagreement must not block forward progress forever.
        if assessment.rejections > 0
            && assessment.approvals == 0
            && assessment.pending_reviewers.is_empty()
            && age_secs >= self.review.rejection_timeout_secs as i64
        {
            self.recover(repo, plan_issue, pull, task_number, RecoveryKind::StuckRejected)
                .await?;
            return Ok(Some(PullDisposition::Recovered(RecoveryKind::StuckRejected)));
        }

        // Recovery C: nobody reviewed at all past the longer timeout.
        if assessment.reviewed == 0
            && !assessment.pending_reviewers.is_empty()
            && age_secs >= self.review.unreviewed_timeout_secs as i64
        {
            self.recover(repo, plan_issue, pull, task_number, RecoveryKind::StuckUnreviewed)
                .await?;
            return Ok(Some(PullDisposition::Recovered(RecoveryKind::StuckUnreviewed)));
        }

        Ok(None)
    }

    /// Merge-gated completion: this is the only place a task ever becomes
    /// completed, and it runs strictly after a successful merge.
    async fn finish_merged_task(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        pull: &PullRequest,
        task_number: u32,
        reviews: &[crate::store::Review],
    ) -> Result<()> {
        self.store
            .delete_remote_branch(repo, &pull.head_branch)
            .await?;

        // Review prose is never silently discarded: anything beyond a bare
        // approval phrase becomes a follow-up issue.
        let feedback: Vec<String> = reviews
            .iter()
            .filter(|r| !r.body.trim().is_empty() && !is_bare_approval(&r.body))
            .map(|r| format!("From @{} on #{}: {}", r.reviewer, pull.number, r.body.trim()))
            .collect();
        if !feedback.is_empty() {
            let title = format!("Review feedback from task {} (#{})", task_number, pull.number);
            let body = feedback.join("\n\n");
            self.store
                .create_issue(repo, &title, &body, &[self.feedback_label.clone()])
                .await?;
        }

        self.patch_task(repo, plan_issue, task_number, TaskStatus::Completed)
            .await?;
        info!(repo = %repo, issue = plan_issue, task = task_number, pr = pull.number, "Task completed at merge");
        Ok(())
    }

    /// Shared close/delete/reset remediation for all recovery strategies.
    async fn recover(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        pull: &PullRequest,
        task_number: u32,
        kind: RecoveryKind,
    ) -> Result<()> {
        self.store.close_pull(repo, pull.number).await?;
        self.store
            .delete_remote_branch(repo, &pull.head_branch)
            .await?;
        self.patch_task(repo, plan_issue, task_number, TaskStatus::Pending)
            .await?;
        let note = format!(
            "Recovered task {} ({}): closed #{} and reset the task for any agent to reclaim from a fresh base.",
            task_number, kind, pull.number
        );
        self.store.post_comment(repo, plan_issue, &note).await?;
        Ok(())
    }

    /// A held task whose claim has outlived the staleness window with no
    /// open pull request is reset by whichever process notices, not just
    /// the original claimant; ownership is re-derived from the plan body.
    async fn sweep_stale_claims(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        now: DateTime<Utc>,
        open_pulls: &[PullRequest],
        report: &mut ReviewCycleReport,
    ) -> Result<()> {
        let issue = self.store.get_issue(repo, plan_issue).await?;
        let Some(current) = plan::parse(&issue.title, &issue.body) else {
            return Ok(());
        };

        let stale: Vec<u32> = current
            .held_tasks()
            .filter(|t| t.claim_is_stale(now, self.claim.staleness_secs))
            .filter(|t| {
                !open_pulls
                    .iter()
                    .any(|pr| parse_task_branch(&pr.head_branch) == Some(t.number))
            })
            .map(|t| t.number)
            .collect();

        for task_number in stale {
            info!(repo = %repo, issue = plan_issue, task = task_number, "Resetting stale claim");
            self.patch_task(repo, plan_issue, task_number, TaskStatus::Pending)
                .await?;
            let note = format!(
                "Recovered task {} ({}): claim went stale with no open pull request; task reset.",
                task_number,
                RecoveryKind::StaleClaim
            );
            self.store.post_comment(repo, plan_issue, &note).await?;
            report.recovered_tasks.push(task_number);
        }
        Ok(())
    }

    /// Re-read the body immediately before patching; the patch is a no-op
    /// when the task already holds the target state (idempotent re-issue).
    async fn patch_task(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        task_number: u32,
        status: TaskStatus,
    ) -> Result<()> {
        let issue = self.store.get_issue(repo, plan_issue).await?;
        let Some(current) = plan::parse(&issue.title, &issue.body) else {
            return Ok(());
        };
        let Some(task) = current.find_task(task_number) else {
            return Ok(());
        };
        if task.status == TaskStatus::Completed {
            // Completed never transitions again.
            return Ok(());
        }
        if task.status == status && task.assignee.is_none() {
            return Ok(());
        }
        if let Some(patched) =
            plan::patch_task_status(&current.raw_body, task_number, status, None, None)
        {
            self.store
                .update_issue_body(repo, plan_issue, &patched)
                .await?;
        }
        Ok(())
    }
}

enum PullDisposition {
    Merged,
    Recovered(RecoveryKind),
}

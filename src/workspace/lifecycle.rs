use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::WorkspaceConfig;
use crate::error::{Result, StoreError};
use crate::plan;
use crate::review::is_bare_approval;
use crate::store::{Issue, IssueState, IssueStore, RepoRef};

use super::WorkspaceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspacePhase {
    /// Open plans or work exist, or the synthesis cooldown is running.
    Active,
    /// Zero active plans and the cooldown elapsed; a new plan is wanted.
    NeedsSynthesis,
    /// A finished sentinel is open; all new work is blocked.
    Finished,
}

/// Result of a synthesis pass.
#[derive(Debug)]
pub enum SynthesisOutcome {
    /// Actionable inputs exist; plan authoring is the external planner's
    /// job, so the engine hands these off and stamps the attempt.
    PlanNeeded(Vec<Issue>),
    /// Nothing to act on: a finished sentinel was created so the workspace
    /// is never left silently idle and invisible.
    SentinelCreated(u64),
}

pub struct LifecycleController {
    store: Arc<dyn IssueStore>,
    config: WorkspaceConfig,
    agent_handle: String,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn IssueStore>,
        config: WorkspaceConfig,
        agent_handle: impl Into<String>,
    ) -> Self {
        Self {
            store,
            config,
            agent_handle: agent_handle.into(),
        }
    }

    /// Reconcile cached workspace state against the store and decide the
    /// phase for this poll cycle. Mutates the record; the caller persists.
    pub async fn reconcile(
        &self,
        record: &mut WorkspaceRecord,
        now: DateTime<Utc>,
    ) -> Result<WorkspacePhase> {
        let repo = record.repo_ref();
        let open_issues = self.store.list_issues(&repo, IssueState::Open).await?;
        record.last_polled = Some(now);

        record.active_plan_issues = open_issues
            .iter()
            .filter(|i| i.has_label(&self.config.plan_label))
            .filter(|i| plan::parse(&i.title, &i.body).is_some())
            .map(|i| i.number)
            .collect();

        let sentinel = open_issues
            .iter()
            .find(|i| i.has_label(&self.config.finished_label));

        if let Some(sentinel) = sentinel {
            record.finished_sentinel = Some(sentinel.number);
            return self.reconcile_open_sentinel(&repo, record, sentinel).await;
        }

        if let Some(prev) = record.finished_sentinel {
            let phase = self
                .reconcile_closed_sentinel(&repo, record, prev, &open_issues)
                .await?;
            if let Some(phase) = phase {
                return Ok(phase);
            }
        }

        if !record.active_plan_issues.is_empty() {
            return Ok(WorkspacePhase::Active);
        }

        if record.synthesis_cooldown_elapsed(now, self.config.synthesis_cooldown_secs) {
            Ok(WorkspacePhase::NeedsSynthesis)
        } else {
            // Cooldown still running; prevents synthesis storms.
            Ok(WorkspacePhase::Active)
        }
    }

    /// The sentinel protocol, creator side: only the agent that opened the
    /// sentinel may close it, and only after extracting feedback into a
    /// fresh issue. Everyone else just observes `Finished`.
    async fn reconcile_open_sentinel(
        &self,
        repo: &RepoRef,
        record: &mut WorkspaceRecord,
        sentinel: &Issue,
    ) -> Result<WorkspacePhase> {
        if sentinel.author != self.agent_handle {
            return Ok(WorkspacePhase::Finished);
        }

        let comments = self.store.list_comments(repo, sentinel.number).await?;
        let requests: Vec<String> = comments
            .iter()
            .filter(|c| c.author != self.agent_handle)
            .filter(|c| is_work_request(&c.body))
            .map(|c| format!("From @{}: {}", c.author, c.body.trim()))
            .collect();

        if requests.is_empty() {
            return Ok(WorkspacePhase::Finished);
        }

        info!(
            repo = %repo,
            sentinel = sentinel.number,
            requests = requests.len(),
            "Sentinel received work requests, reactivating workspace"
        );
        let body = format!(
            "Work requested while this workspace was finished (#{}).\n\n{}",
            sentinel.number,
            requests.join("\n\n")
        );
        self.store
            .create_issue(repo, "Requested follow-up work", &body, &[])
            .await?;
        self.store.close_issue(repo, sentinel.number).await?;
        record.finished_sentinel = None;
        Ok(WorkspacePhase::Active)
    }

    /// The record says a sentinel exists but none is open. A non-creator
    /// that observes this without corresponding new open work reopens it;
    /// the creator treats it as legitimately cleared.
    ///
    /// Returns `Some(phase)` to short-circuit, `None` to fall through to
    /// the normal phase decision.
    async fn reconcile_closed_sentinel(
        &self,
        repo: &RepoRef,
        record: &mut WorkspaceRecord,
        sentinel_number: u64,
        open_issues: &[Issue],
    ) -> Result<Option<WorkspacePhase>> {
        let sentinel = match self.store.get_issue(repo, sentinel_number).await {
            Ok(issue) => issue,
            Err(StoreError::NotFound(_)) => {
                record.finished_sentinel = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if sentinel.state == IssueState::Open {
            // Listing lagged behind; trust the direct read.
            return Ok(Some(WorkspacePhase::Finished));
        }

        if sentinel.author == self.agent_handle {
            record.finished_sentinel = None;
            return Ok(None);
        }

        let has_new_work = !open_issues.is_empty() || !record.active_plan_issues.is_empty();
        if has_new_work {
            record.finished_sentinel = None;
            return Ok(None);
        }

        warn!(
            repo = %repo,
            sentinel = sentinel_number,
            "Sentinel closed without new work by someone else, reopening"
        );
        self.store.reopen_issue(repo, sentinel_number).await?;
        Ok(Some(WorkspacePhase::Finished))
    }

    /// Synthesis step for a `NeedsSynthesis` workspace. Plan authoring is
    /// external; this either hands off the actionable inputs or, when
    /// nothing is actionable and no minimal project documentation exists,
    /// creates the finished sentinel. The fallback keeps the workspace out
    /// of the invisible zero-issues/zero-plans/no-sentinel state.
    pub async fn synthesize_or_finish(
        &self,
        record: &mut WorkspaceRecord,
        has_project_docs: bool,
        now: DateTime<Utc>,
    ) -> Result<SynthesisOutcome> {
        let repo = record.repo_ref();
        record.last_plan_synthesis_attempt = Some(now);

        let open_issues = self.store.list_issues(&repo, IssueState::Open).await?;
        let actionable: Vec<Issue> = open_issues
            .into_iter()
            .filter(|i| {
                !i.has_label(&self.config.plan_label)
                    && !i.has_label(&self.config.finished_label)
                    && !i.has_label(&self.config.memo_label)
            })
            .collect();

        if !actionable.is_empty() || has_project_docs {
            debug!(
                repo = %repo,
                actionable = actionable.len(),
                has_project_docs,
                "Synthesis has inputs, deferring to planner"
            );
            return Ok(SynthesisOutcome::PlanNeeded(actionable));
        }

        info!(repo = %repo, "Nothing actionable, creating finished sentinel");
        let sentinel = self
            .store
            .create_issue(
                &repo,
                "Workspace finished: no actionable work",
                "No open issues, no plans, and no project documentation to plan from. \
                 Comment with a concrete work request to reactivate this workspace.",
                &[self.config.finished_label.clone()],
            )
            .await?;
        record.finished_sentinel = Some(sentinel.number);
        Ok(SynthesisOutcome::SentinelCreated(sentinel.number))
    }
}

/// Whether a comment asks for actual work, as opposed to bare agreement.
/// This is a fixed-cue check, deliberately not language classification.
pub fn is_work_request(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || is_bare_approval(trimmed) {
        return false;
    }
    let lower = trimmed.to_lowercase();
    const CUES: [&str; 16] = [
        "please ",
        "can you",
        "could you",
        "add ",
        "fix ",
        "implement",
        "support ",
        "should ",
        "need ",
        "needs ",
        "broken",
        "doesn't work",
        "does not work",
        "fails",
        "error",
        "feature request",
    ];
    CUES.iter().any(|cue| lower.contains(cue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_not_a_work_request() {
        assert!(!is_work_request("sounds good"));
        assert!(!is_work_request("LGTM"));
        assert!(!is_work_request("+1"));
        assert!(!is_work_request(""));
    }

    #[test]
    fn requests_are_detected() {
        assert!(is_work_request("Please add pagination to the issue list"));
        assert!(is_work_request("the exporter fails on empty input"));
        assert!(is_work_request("Can you implement retry for the webhook?"));
    }
}

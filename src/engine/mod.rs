//! The poll cycle: one full pass over every watched workspace.
//!
//! Multiple independent processes run this same logic against the same
//! external state with no coordination channel; correctness comes from the
//! optimistic claim protocol, merge-gated completion, and bounded recovery
//! timeouts, not from anything in-process. One workspace's failure never
//! aborts the others, and nothing here is allowed to panic the host.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::claim::ClaimCoordinator;
use crate::config::{HiveConfig, HivePaths};
use crate::error::Result;
use crate::gates::{GatePipeline, TaskExecutor};
use crate::git::{task_branch, GitRunner};
use crate::plan;
use crate::queue::{ActionQueue, CommitmentQueue};
use crate::review::PrLifecycleManager;
use crate::store::{IssueStore, RepoRef};
use crate::workspace::{
    LifecycleController, SynthesisOutcome, WorkspacePhase, WorkspaceRecord, WorkspaceRegistry,
};

/// Counters for one poll cycle, for status output and logs.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub workspaces_polled: usize,
    pub workspaces_failed: usize,
    pub tasks_attempted: usize,
    pub tasks_published: usize,
    pub tasks_merged: usize,
    pub tasks_recovered: usize,
    pub sentinels_created: usize,
    pub actions_sent: usize,
    pub actions_deferred: usize,
    pub commitments_abandoned: usize,
    pub commitments_reset: usize,
}

pub struct Engine {
    config: HiveConfig,
    paths: HivePaths,
    store: Arc<dyn IssueStore>,
    executor: Arc<dyn TaskExecutor>,
    registry: WorkspaceRegistry,
    actions: ActionQueue,
    commitments: CommitmentQueue,
    claims: ClaimCoordinator,
    lifecycle: LifecycleController,
    reviews: PrLifecycleManager,
}

impl Engine {
    pub async fn new(
        config: HiveConfig,
        paths: HivePaths,
        store: Arc<dyn IssueStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let registry = WorkspaceRegistry::open(&paths.registry_path).await?;
        let actions = ActionQueue::open(&paths.actions_path, config.queue.clone()).await?;
        let commitments =
            CommitmentQueue::open(&paths.commitments_path, config.queue.clone()).await?;

        let claims = ClaimCoordinator::new(Arc::clone(&store));
        let lifecycle = LifecycleController::new(
            Arc::clone(&store),
            config.workspace.clone(),
            config.agent.handle.clone(),
        );
        let reviews = PrLifecycleManager::new(
            Arc::clone(&store),
            config.review.clone(),
            config.claim.clone(),
            config.workspace.discussion_label.clone(),
        );

        Ok(Self {
            config,
            paths,
            store,
            executor,
            registry,
            actions,
            commitments,
            claims,
            lifecycle,
            reviews,
        })
    }

    pub fn registry(&self) -> &WorkspaceRegistry {
        &self.registry
    }

    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    pub fn commitments(&self) -> &CommitmentQueue {
        &self.commitments
    }

    /// Run one full poll cycle across all watched workspaces.
    pub async fn poll_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let now = Utc::now();

        match self.commitments.sweep(now).await {
            Ok(sweep) => {
                report.commitments_abandoned = sweep.abandoned;
                report.commitments_reset = sweep.reset;
            }
            Err(e) => warn!(error = %e, "Commitment sweep failed"),
        }

        for record in self.registry.all() {
            let slug = record.slug();
            report.workspaces_polled += 1;
            // Isolation boundary: a failure in one workspace must never
            // abort the rest of the cycle.
            if let Err(e) = self.poll_workspace(record, &mut report).await {
                report.workspaces_failed += 1;
                warn!(workspace = %slug, error = %e, "Workspace poll failed");
            }
        }

        self.drain_actions(&mut report).await;

        info!(
            polled = report.workspaces_polled,
            failed = report.workspaces_failed,
            attempted = report.tasks_attempted,
            merged = report.tasks_merged,
            recovered = report.tasks_recovered,
            "Poll cycle finished"
        );
        Ok(report)
    }

    async fn poll_workspace(
        &self,
        mut record: WorkspaceRecord,
        report: &mut CycleReport,
    ) -> Result<()> {
        let slug = record.slug();
        let now = Utc::now();
        let phase = self.lifecycle.reconcile(&mut record, now).await?;
        debug!(workspace = %slug, ?phase, plans = record.active_plan_issues.len(), "Reconciled workspace");

        match phase {
            WorkspacePhase::Finished => {}
            WorkspacePhase::NeedsSynthesis => {
                let has_docs = self.has_project_docs(&record.repo_ref()).await;
                match self
                    .lifecycle
                    .synthesize_or_finish(&mut record, has_docs, now)
                    .await?
                {
                    SynthesisOutcome::SentinelCreated(number) => {
                        report.sentinels_created += 1;
                        info!(workspace = %slug, sentinel = number, "Workspace finished");
                    }
                    SynthesisOutcome::PlanNeeded(inputs) => {
                        // Plan authoring is the external planner's job; the
                        // attempt timestamp was stamped so the cooldown holds.
                        info!(
                            workspace = %slug,
                            actionable = inputs.len(),
                            "Plan synthesis deferred to planner"
                        );
                    }
                }
            }
            WorkspacePhase::Active => {
                self.work_active_plans(&mut record, report).await;
            }
        }

        self.registry
            .update(&slug, move |stored| *stored = record)
            .await
    }

    async fn work_active_plans(&self, record: &mut WorkspaceRecord, report: &mut CycleReport) {
        let repo = record.repo_ref();
        let now = Utc::now();
        record.last_health_check_attempt = Some(now);

        for plan_issue in record.active_plan_issues.clone() {
            // Review pass first: merge what is approved, recover what is
            // stuck, free stale claims for this cycle's claim attempt.
            match self.reviews.process_plan(&repo, plan_issue, now).await {
                Ok(outcome) => {
                    report.tasks_merged += outcome.merged_tasks.len();
                    report.tasks_recovered += outcome.recovered_tasks.len();
                    if outcome.plan_completed {
                        record.active_plan_issues.remove(&plan_issue);
                        continue;
                    }
                }
                Err(e) => {
                    warn!(repo = %repo, issue = plan_issue, error = %e, "Review pass failed");
                    continue;
                }
            }

            if let Err(e) = self.attempt_next_task(&repo, plan_issue, report).await {
                warn!(repo = %repo, issue = plan_issue, error = %e, "Task attempt failed");
            }
        }
    }

    async fn attempt_next_task(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        report: &mut CycleReport,
    ) -> Result<()> {
        let issue = self.store.get_issue(repo, plan_issue).await?;
        let Some(current) = plan::parse(&issue.title, &issue.body) else {
            return Ok(());
        };
        let Some(task) = current.next_claimable().cloned() else {
            return Ok(());
        };

        let claimant = &self.config.agent.handle;
        let outcome = self
            .claims
            .claim(repo, plan_issue, task.number, claimant)
            .await?;
        if !outcome.claimed {
            // Losing the race is a normal outcome; look for other work.
            debug!(
                repo = %repo,
                task = task.number,
                holder = outcome.claimed_by.as_deref().unwrap_or("<none>"),
                "Task already taken"
            );
            return Ok(());
        }
        report.tasks_attempted += 1;

        let git = GitRunner::new(self.paths.checkout_dir(&repo.owner, &repo.repo));
        let remote = &self.config.git.remote;
        let base = &self.config.git.default_branch;
        git.ensure_checkout(&clone_url(repo), remote, base).await?;

        let branch = task_branch(task.number, &task.title);
        git.checkout_task_branch(&branch, remote, base).await?;

        self.claims
            .mark_in_progress(repo, plan_issue, task.number, claimant)
            .await?;

        let pipeline = GatePipeline::new(
            Arc::clone(&self.store),
            remote.clone(),
            base.clone(),
            self.config.review.reviewers.clone(),
        );

        match self
            .executor
            .execute(&task, git.working_dir(), &branch)
            .await
        {
            Ok(result) => {
                debug!(task = task.number, summary = %result.summary, "Execution finished");
            }
            Err(e) => {
                pipeline
                    .report_task_failed(repo, plan_issue, &task, &format!("execution failed: {}", e))
                    .await?;
                return Ok(());
            }
        }

        let verdict = pipeline.run(repo, &git, &task, &branch, plan_issue).await?;
        if verdict.passed() {
            report.tasks_published += 1;
            // The task stays in progress: completion is gated on the merge,
            // which a later cycle performs once reviews allow it.
        } else if let Some(failure) = verdict.first_failure() {
            pipeline
                .report_task_blocked(repo, plan_issue, &task, failure)
                .await?;
        }
        Ok(())
    }

    /// Pump the outbound reply queue: send what is due, defer what fails.
    async fn drain_actions(&self, report: &mut CycleReport) {
        let now = Utc::now();
        for action in self.actions.due(now) {
            let result = match parse_action_target(&action.target) {
                Some((repo, number)) => self.store.post_comment(&repo, number, &action.text).await,
                None => {
                    warn!(id = %action.id, target = %action.target, "Unsupported action target");
                    if let Err(e) = self
                        .actions
                        .abandon(action.id, "unsupported target reference")
                        .await
                    {
                        warn!(error = %e, "Failed to abandon action");
                    }
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    report.actions_sent += 1;
                    if let Err(e) = self.actions.mark_sent(action.id).await {
                        warn!(error = %e, "Failed to mark action sent");
                    }
                }
                Err(e) => {
                    report.actions_deferred += 1;
                    if let Err(e) = self.actions.defer(action.id, &e.to_string(), now).await {
                        warn!(error = %e, "Failed to defer action");
                    }
                }
            }
        }
    }

    /// Minimal project documentation check, used by the synthesis decision.
    async fn has_project_docs(&self, repo: &RepoRef) -> bool {
        let checkout = self.paths.checkout_dir(&repo.owner, &repo.repo);
        for candidate in ["README.md", "README", "docs"] {
            if checkout.join(candidate).exists() {
                return true;
            }
        }
        false
    }
}

fn clone_url(repo: &RepoRef) -> String {
    format!("https://github.com/{}.git", repo.slug())
}

/// Action targets are `owner/repo#issue` references.
fn parse_action_target(target: &str) -> Option<(RepoRef, u64)> {
    let (slug, number) = target.split_once('#')?;
    let repo = RepoRef::parse(slug)?;
    Some((repo, number.parse().ok()?))
}

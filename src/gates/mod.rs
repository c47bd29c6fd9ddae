//! Execution and the post-execution verification gates.
//!
//! Gates run strictly in order; the first failure aborts the attempt and
//! later gates are not tried. A failed attempt is reported against the
//! task without moving it off in-progress — re-opening the task is the
//! recovery path's decision, never a side effect here.

mod executor;

pub use executor::{CommandExecutor, ExecutionReport, TaskExecutor};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HiveError, Result};
use crate::git::GitRunner;
use crate::plan::Task;
use crate::store::{IssueStore, PullRequest, RepoRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// Working branch is still the task's branch and was not merged into.
    BranchHygiene,
    /// At least one commit and one changed file exist.
    ChangeExistence,
    /// Detected test suite passes; no suite is not a failure.
    Tests,
    /// Branch pushed and independently re-verified on the remote.
    Push,
    /// Pull request opened.
    Publish,
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BranchHygiene => write!(f, "branch hygiene"),
            Self::ChangeExistence => write!(f, "change existence"),
            Self::Tests => write!(f, "tests"),
            Self::Push => write!(f, "push"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub gate: Gate,
    pub passed: bool,
    pub detail: String,
}

impl GateReport {
    pub fn pass(gate: Gate, detail: impl Into<String>) -> Self {
        Self {
            gate,
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(gate: Gate, detail: impl Into<String>) -> Self {
        Self {
            gate,
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub reports: Vec<GateReport>,
    /// Present only when every gate, including publish, passed.
    pub pull_request: Option<PullRequest>,
}

impl PipelineOutcome {
    pub fn passed(&self) -> bool {
        self.pull_request.is_some() && self.reports.iter().all(|r| r.passed)
    }

    pub fn first_failure(&self) -> Option<&GateReport> {
        self.reports.iter().find(|r| !r.passed)
    }
}

pub struct GatePipeline {
    store: Arc<dyn IssueStore>,
    remote: String,
    base_branch: String,
    reviewers: Vec<String>,
}

impl GatePipeline {
    pub fn new(
        store: Arc<dyn IssueStore>,
        remote: impl Into<String>,
        base_branch: impl Into<String>,
        reviewers: Vec<String>,
    ) -> Self {
        Self {
            store,
            remote: remote.into(),
            base_branch: base_branch.into(),
            reviewers,
        }
    }

    /// Run all gates for a finished execution attempt on `branch`.
    pub async fn run(
        &self,
        repo: &RepoRef,
        git: &GitRunner,
        task: &Task,
        branch: &str,
        plan_issue: u64,
    ) -> Result<PipelineOutcome> {
        let mut reports = Vec::new();
        let remote_base = format!("{}/{}", self.remote, self.base_branch);

        // Gate 1: branch hygiene. Fails fast on contamination risk.
        let current = git.current_branch().await?;
        if current != branch {
            reports.push(GateReport::fail(
                Gate::BranchHygiene,
                format!("expected branch {}, working tree is on {}", branch, current),
            ));
            return Ok(PipelineOutcome {
                reports,
                pull_request: None,
            });
        }
        if !git.is_ancestor(&remote_base, branch).await? {
            reports.push(GateReport::fail(
                Gate::BranchHygiene,
                format!("{} no longer descends from {}", branch, remote_base),
            ));
            return Ok(PipelineOutcome {
                reports,
                pull_request: None,
            });
        }
        let commits = git.commit_count(&remote_base, branch).await?;
        if commits > 0 && git.is_ancestor(branch, &remote_base).await? {
            reports.push(GateReport::fail(
                Gate::BranchHygiene,
                format!("{} was already merged into {}", branch, remote_base),
            ));
            return Ok(PipelineOutcome {
                reports,
                pull_request: None,
            });
        }
        reports.push(GateReport::pass(Gate::BranchHygiene, format!("on {}", branch)));

        // Gate 2: change existence. An executor that exits cleanly but
        // produces nothing is a distinct failure, never silent success.
        let files = git.changed_files(&remote_base, branch).await?;
        if commits == 0 || files.is_empty() {
            reports.push(GateReport::fail(
                Gate::ChangeExistence,
                format!(
                    "executor finished but produced no reviewable change ({} commits, {} files)",
                    commits,
                    files.len()
                ),
            ));
            return Ok(PipelineOutcome {
                reports,
                pull_request: None,
            });
        }
        reports.push(GateReport::pass(
            Gate::ChangeExistence,
            format!("{} commits, {} files", commits, files.len()),
        ));

        // Gate 3: tests, when a suite is present.
        match git.detect_test_suite() {
            Some(suite) => {
                let (passed, output) = git.run_test_suite(suite).await?;
                if !passed {
                    reports.push(GateReport::fail(
                        Gate::Tests,
                        format!("{} failed:\n{}", suite, output),
                    ));
                    return Ok(PipelineOutcome {
                        reports,
                        pull_request: None,
                    });
                }
                reports.push(GateReport::pass(Gate::Tests, format!("{} passed", suite)));
            }
            None => {
                reports.push(GateReport::pass(Gate::Tests, "no test suite detected"));
            }
        }

        // Gate 4: push, then re-verify the remote actually has the branch.
        if let Err(e) = git.push(&self.remote, branch).await {
            reports.push(GateReport::fail(Gate::Push, format!("push failed: {}", e)));
            return Ok(PipelineOutcome {
                reports,
                pull_request: None,
            });
        }
        if !git.remote_branch_exists(&self.remote, branch).await? {
            reports.push(GateReport::fail(
                Gate::Push,
                "push acknowledged but branch absent on remote",
            ));
            return Ok(PipelineOutcome {
                reports,
                pull_request: None,
            });
        }
        reports.push(GateReport::pass(Gate::Push, "branch verified on remote"));

        // Gate 5: publish. Work exists on the remote by now, so a failure
        // here is reported distinctly from execution failure.
        let title = format!("Task {}: {}", task.number, task.title);
        let body = format!(
            "Implements task {} of plan #{}.\n\n{}",
            task.number, plan_issue, task.description
        );
        match self
            .store
            .create_pull(repo, &title, &body, branch, &self.base_branch, &self.reviewers)
            .await
        {
            Ok(pull) => {
                info!(repo = %repo, pr = pull.number, branch, "Published pull request");
                reports.push(GateReport::pass(
                    Gate::Publish,
                    format!("opened pull request #{}", pull.number),
                ));
                Ok(PipelineOutcome {
                    reports,
                    pull_request: Some(pull),
                })
            }
            Err(e) => {
                reports.push(GateReport::fail(
                    Gate::Publish,
                    format!("work pushed but pull request not created: {}", e),
                ));
                Ok(PipelineOutcome {
                    reports,
                    pull_request: None,
                })
            }
        }
    }

    /// Single funnel for every gate failure: record the reason against the
    /// task as a plan-issue comment. The task stays in-progress; only the
    /// recovery path may re-open it for other claimants.
    pub async fn report_task_blocked(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        task: &Task,
        report: &GateReport,
    ) -> Result<()> {
        let reason = format!("blocked at {} gate: {}", report.gate, report.detail);
        self.report_task_failed(repo, plan_issue, task, &reason).await
    }

    /// The same funnel for failures that never reach a gate (executor
    /// errors). Records the reason without touching the task status.
    pub async fn report_task_failed(
        &self,
        repo: &RepoRef,
        plan_issue: u64,
        task: &Task,
        reason: &str,
    ) -> Result<()> {
        let body = format!("Task {} attempt {}", task.number, reason);
        warn!(repo = %repo, issue = plan_issue, task = task.number, reason, "Task attempt failed");
        self.store
            .post_comment(repo, plan_issue, &body)
            .await
            .map_err(HiveError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_without_pull_is_failed() {
        let outcome = PipelineOutcome {
            reports: vec![GateReport::pass(Gate::BranchHygiene, "ok")],
            pull_request: None,
        };
        assert!(!outcome.passed());
    }

    #[test]
    fn first_failure_picks_earliest() {
        let outcome = PipelineOutcome {
            reports: vec![
                GateReport::pass(Gate::BranchHygiene, "ok"),
                GateReport::fail(Gate::ChangeExistence, "nothing"),
                GateReport::fail(Gate::Tests, "also bad"),
            ],
            pull_request: None,
        };
        assert_eq!(outcome.first_failure().unwrap().gate, Gate::ChangeExistence);
    }
}

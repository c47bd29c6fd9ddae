use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::StoreError;

use super::types::{
    Comment, Issue, IssueState, PullRequest, RepoRef, Review, ReviewDecision,
};
use super::{IssueStore, RateGate, StoreResult};

/// `IssueStore` backed by the `gh` CLI.
///
/// Every call goes through the rate gate and a bounded timeout. No
/// in-process lock is held across a request.
pub struct GhStore {
    rate: RateGate,
    request_timeout: Duration,
}

impl GhStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            rate: RateGate::new(config),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    async fn api(&self, args: &[&str], operation: &str) -> StoreResult<String> {
        self.rate.admit().await?;

        debug!(?args, "Running gh api");
        let mut cmd = Command::new("gh");
        cmd.arg("api").args(args);

        let output = tokio::time::timeout(self.request_timeout, cmd.output())
            .await
            .map_err(|_| StoreError::Timeout {
                operation: operation.to_string(),
                duration_secs: self.request_timeout.as_secs(),
            })?
            .map_err(|e| StoreError::Unavailable(format!("failed to spawn gh: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(operation, stderr = %stderr, "gh api call failed");
            let err = StoreError::from_gh_output(&stderr);
            if let StoreError::RateLimited { retry_after_secs } = &err {
                self.rate.record_backpressure(*retry_after_secs);
            }
            return Err(err);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Issue a write where "already gone" means the desired state holds.
    async fn api_idempotent(&self, args: &[&str], operation: &str) -> StoreResult<()> {
        match self.api(args, operation).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                debug!(operation, "Target already gone, treating as success");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: &str, operation: &str) -> StoreResult<T> {
        serde_json::from_str(raw)
            .map_err(|e| StoreError::Protocol(format!("{}: bad response: {}", operation, e)))
    }

    async fn head_sha(&self, repo: &RepoRef, number: u64) -> StoreResult<String> {
        let path = format!("repos/{}/pulls/{}", repo, number);
        let raw = self.api(&[&path], "get_pull").await?;
        let pull: RawPull = Self::decode(&raw, "get_pull")?;
        Ok(pull.head.sha)
    }
}

#[async_trait]
impl IssueStore for GhStore {
    async fn whoami(&self) -> StoreResult<String> {
        let raw = self.api(&["user"], "whoami").await?;
        let user: RawUser = Self::decode(&raw, "whoami")?;
        Ok(user.login)
    }

    async fn list_issues(&self, repo: &RepoRef, state: IssueState) -> StoreResult<Vec<Issue>> {
        let path = format!(
            "repos/{}/issues?state={}&per_page=100",
            repo,
            state_param(state)
        );
        let raw = self.api(&[&path], "list_issues").await?;
        let rows: Vec<RawIssue> = Self::decode(&raw, "list_issues")?;
        // The issues endpoint also returns pull requests; drop them.
        Ok(rows
            .into_iter()
            .filter(|r| r.pull_request.is_none())
            .map(RawIssue::into_issue)
            .collect())
    }

    async fn get_issue(&self, repo: &RepoRef, number: u64) -> StoreResult<Issue> {
        let path = format!("repos/{}/issues/{}", repo, number);
        let raw = self.api(&[&path], "get_issue").await?;
        let row: RawIssue = Self::decode(&raw, "get_issue")?;
        Ok(row.into_issue())
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> StoreResult<Issue> {
        let path = format!("repos/{}/issues", repo);
        let title_arg = format!("title={}", title);
        let body_arg = format!("body={}", body);
        let mut args: Vec<String> = vec![
            path,
            "-f".into(),
            title_arg,
            "-f".into(),
            body_arg,
        ];
        for label in labels {
            args.push("-f".into());
            args.push(format!("labels[]={}", label));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let raw = self.api(&arg_refs, "create_issue").await?;
        let row: RawIssue = Self::decode(&raw, "create_issue")?;
        Ok(row.into_issue())
    }

    async fn update_issue_body(&self, repo: &RepoRef, number: u64, body: &str) -> StoreResult<()> {
        let path = format!("repos/{}/issues/{}", repo, number);
        let body_arg = format!("body={}", body);
        self.api_idempotent(
            &["-X", "PATCH", &path, "-f", &body_arg],
            "update_issue_body",
        )
        .await
    }

    async fn close_issue(&self, repo: &RepoRef, number: u64) -> StoreResult<()> {
        let path = format!("repos/{}/issues/{}", repo, number);
        self.api_idempotent(&["-X", "PATCH", &path, "-f", "state=closed"], "close_issue")
            .await
    }

    async fn reopen_issue(&self, repo: &RepoRef, number: u64) -> StoreResult<()> {
        let path = format!("repos/{}/issues/{}", repo, number);
        self.api_idempotent(&["-X", "PATCH", &path, "-f", "state=open"], "reopen_issue")
            .await
    }

    async fn list_comments(&self, repo: &RepoRef, number: u64) -> StoreResult<Vec<Comment>> {
        let path = format!("repos/{}/issues/{}/comments?per_page=100", repo, number);
        let raw = self.api(&[&path], "list_comments").await?;
        let rows: Vec<RawComment> = Self::decode(&raw, "list_comments")?;
        Ok(rows.into_iter().map(RawComment::into_comment).collect())
    }

    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> StoreResult<()> {
        let path = format!("repos/{}/issues/{}/comments", repo, number);
        let body_arg = format!("body={}", body);
        self.api(&[&path, "-f", &body_arg], "post_comment").await?;
        Ok(())
    }

    async fn list_pulls(&self, repo: &RepoRef, state: IssueState) -> StoreResult<Vec<PullRequest>> {
        let path = format!(
            "repos/{}/pulls?state={}&per_page=100",
            repo,
            state_param(state)
        );
        let raw = self.api(&[&path], "list_pulls").await?;
        let rows: Vec<RawPull> = Self::decode(&raw, "list_pulls")?;
        Ok(rows.into_iter().map(RawPull::into_pull).collect())
    }

    async fn get_pull(&self, repo: &RepoRef, number: u64) -> StoreResult<PullRequest> {
        let path = format!("repos/{}/pulls/{}", repo, number);
        let raw = self.api(&[&path], "get_pull").await?;
        let row: RawPull = Self::decode(&raw, "get_pull")?;
        Ok(row.into_pull())
    }

    async fn create_pull(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        reviewers: &[String],
    ) -> StoreResult<PullRequest> {
        let path = format!("repos/{}/pulls", repo);
        let title_arg = format!("title={}", title);
        let body_arg = format!("body={}", body);
        let head_arg = format!("head={}", head);
        let base_arg = format!("base={}", base);
        let raw = self
            .api(
                &[
                    &path, "-f", &title_arg, "-f", &body_arg, "-f", &head_arg, "-f", &base_arg,
                ],
                "create_pull",
            )
            .await?;
        let row: RawPull = Self::decode(&raw, "create_pull")?;
        let pull = row.into_pull();

        if !reviewers.is_empty() {
            let req_path = format!("repos/{}/pulls/{}/requested_reviewers", repo, pull.number);
            let mut args: Vec<String> = vec![req_path];
            for reviewer in reviewers {
                args.push("-f".into());
                args.push(format!("reviewers[]={}", reviewer));
            }
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            self.api(&arg_refs, "request_reviewers").await?;
        }

        Ok(pull)
    }

    async fn list_reviews(&self, repo: &RepoRef, number: u64) -> StoreResult<Vec<Review>> {
        let head = self.head_sha(repo, number).await?;
        let path = format!("repos/{}/pulls/{}/reviews?per_page=100", repo, number);
        let raw = self.api(&[&path], "list_reviews").await?;
        let rows: Vec<RawReview> = Self::decode(&raw, "list_reviews")?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.into_review(&head))
            .collect())
    }

    async fn merge_pull(&self, repo: &RepoRef, number: u64, method: &str) -> StoreResult<()> {
        let path = format!("repos/{}/pulls/{}/merge", repo, number);
        let method_arg = format!("merge_method={}", method);
        self.api(&["-X", "PUT", &path, "-f", &method_arg], "merge_pull")
            .await?;
        Ok(())
    }

    async fn close_pull(&self, repo: &RepoRef, number: u64) -> StoreResult<()> {
        let path = format!("repos/{}/pulls/{}", repo, number);
        self.api_idempotent(&["-X", "PATCH", &path, "-f", "state=closed"], "close_pull")
            .await
    }

    async fn delete_remote_branch(&self, repo: &RepoRef, branch: &str) -> StoreResult<()> {
        let path = format!("repos/{}/git/refs/heads/{}", repo, branch);
        self.api_idempotent(&["-X", "DELETE", &path], "delete_remote_branch")
            .await
    }
}

fn state_param(state: IssueState) -> &'static str {
    match state {
        IssueState::Open => "open",
        IssueState::Closed => "closed",
    }
}

#[derive(Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    labels: Vec<RawLabel>,
    user: RawUser,
    assignee: Option<RawUser>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pull_request: Option<serde_json::Value>,
}

impl RawIssue {
    fn into_issue(self) -> Issue {
        Issue {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            state: parse_state(&self.state),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            author: self.user.login,
            assignee: self.assignee.map(|u| u.login),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct RawComment {
    id: u64,
    user: RawUser,
    body: Option<String>,
    created_at: DateTime<Utc>,
}

impl RawComment {
    fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            author: self.user.login,
            body: self.body.unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

#[derive(Deserialize)]
struct RawBranchRef {
    #[serde(rename = "ref")]
    name: String,
    #[serde(default)]
    sha: String,
}

#[derive(Deserialize)]
struct RawPull {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    draft: bool,
    head: RawBranchRef,
    base: RawBranchRef,
    #[serde(default)]
    requested_reviewers: Vec<RawUser>,
    merged_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl RawPull {
    fn into_pull(self) -> PullRequest {
        PullRequest {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            state: parse_state(&self.state),
            draft: self.draft,
            head_branch: self.head.name,
            base_branch: self.base.name,
            requested_reviewers: self
                .requested_reviewers
                .into_iter()
                .map(|u| u.login)
                .collect(),
            merged: self.merged_at.is_some(),
            created_at: self.created_at,
        }
    }
}

#[derive(Deserialize)]
struct RawReview {
    user: RawUser,
    state: String,
    body: Option<String>,
    commit_id: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
}

impl RawReview {
    fn into_review(self, head_sha: &str) -> Option<Review> {
        let decision = match self.state.as_str() {
            "APPROVED" => ReviewDecision::Approved,
            "CHANGES_REQUESTED" => ReviewDecision::ChangesRequested,
            "COMMENTED" => ReviewDecision::Commented,
            // PENDING and DISMISSED reviews never gate anything
            _ => return None,
        };
        Some(Review {
            reviewer: self.user.login,
            decision,
            body: self.body.unwrap_or_default(),
            stale: self
                .commit_id
                .as_deref()
                .is_some_and(|sha| sha != head_sha),
            submitted_at: self.submitted_at?,
        })
    }
}

fn parse_state(raw: &str) -> IssueState {
    if raw.eq_ignore_ascii_case("closed") {
        IssueState::Closed
    } else {
        IssueState::Open
    }
}

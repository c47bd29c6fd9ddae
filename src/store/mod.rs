//! External issue-tracker interface.
//!
//! The tracker is the only shared, persistent state between worker
//! processes. Everything here is advisory and optimistic: no locks, no
//! transactions, no read-after-write guarantee beyond "usually visible
//! quickly". Callers compensate by re-reading immediately before any
//! state-dependent write.

mod gh;
mod rate;
mod types;

pub use gh::GhStore;
pub use rate::RateGate;
pub use types::{
    Comment, Issue, IssueState, PullRequest, RepoRef, Review, ReviewDecision,
};

use async_trait::async_trait;

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Capability contract against the hosted tracker.
///
/// Implementations must treat "already gone" on delete/close/update as
/// success: idempotent convergence, not literal operation success, is what
/// callers rely on.
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Identity this process acts as on the tracker.
    async fn whoami(&self) -> StoreResult<String>;

    async fn list_issues(&self, repo: &RepoRef, state: IssueState) -> StoreResult<Vec<Issue>>;
    async fn get_issue(&self, repo: &RepoRef, number: u64) -> StoreResult<Issue>;
    async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> StoreResult<Issue>;
    async fn update_issue_body(&self, repo: &RepoRef, number: u64, body: &str) -> StoreResult<()>;
    async fn close_issue(&self, repo: &RepoRef, number: u64) -> StoreResult<()>;
    async fn reopen_issue(&self, repo: &RepoRef, number: u64) -> StoreResult<()>;

    async fn list_comments(&self, repo: &RepoRef, number: u64) -> StoreResult<Vec<Comment>>;
    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> StoreResult<()>;

    async fn list_pulls(&self, repo: &RepoRef, state: IssueState) -> StoreResult<Vec<PullRequest>>;
    async fn get_pull(&self, repo: &RepoRef, number: u64) -> StoreResult<PullRequest>;
    async fn create_pull(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        reviewers: &[String],
    ) -> StoreResult<PullRequest>;
    async fn list_reviews(&self, repo: &RepoRef, number: u64) -> StoreResult<Vec<Review>>;
    async fn merge_pull(&self, repo: &RepoRef, number: u64, method: &str) -> StoreResult<()>;
    async fn close_pull(&self, repo: &RepoRef, number: u64) -> StoreResult<()>;

    async fn delete_remote_branch(&self, repo: &RepoRef, branch: &str) -> StoreResult<()>;
}

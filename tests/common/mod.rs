//! In-memory `IssueStore` fake for integration tests.
//!
//! Serves a single repository regardless of the `RepoRef` passed in, and
//! exposes hooks for simulating concurrent writers and merge conflicts.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use taskhive::error::StoreError;
use taskhive::store::{
    Comment, Issue, IssueState, IssueStore, PullRequest, RepoRef, Review, ReviewDecision,
    StoreResult,
};

#[derive(Default)]
struct State {
    identity: String,
    issues: BTreeMap<u64, Issue>,
    comments: BTreeMap<u64, Vec<Comment>>,
    pulls: BTreeMap<u64, PullRequest>,
    reviews: BTreeMap<u64, Vec<Review>>,
    next_issue: u64,
    next_comment: u64,
    update_count: u32,
    deleted_branches: Vec<String>,
    merged_pulls: Vec<u64>,
    conflicting_pulls: HashSet<u64>,
    /// One-shot: after the next body update of this issue, this body is
    /// written over it, simulating a concurrent claimant whose write lands
    /// last.
    racing_write: Option<(u64, String)>,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new(identity: &str) -> Self {
        Self {
            state: Mutex::new(State {
                identity: identity.to_string(),
                next_issue: 1,
                next_comment: 1,
                ..State::default()
            }),
        }
    }

    pub fn repo() -> RepoRef {
        RepoRef::new("octo", "widgets")
    }

    pub fn seed_issue(&self, title: &str, body: &str, labels: &[&str], author: &str) -> u64 {
        let mut state = self.state.lock();
        let number = state.next_issue;
        state.next_issue += 1;
        let now = Utc::now();
        state.issues.insert(
            number,
            Issue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                state: IssueState::Open,
                labels: labels.iter().map(|l| l.to_string()).collect(),
                author: author.to_string(),
                assignee: None,
                created_at: now,
                updated_at: now,
            },
        );
        number
    }

    pub fn seed_pull(
        &self,
        number: u64,
        head_branch: &str,
        requested_reviewers: &[&str],
        created_at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock();
        state.pulls.insert(
            number,
            PullRequest {
                number,
                title: format!("PR {}", number),
                body: String::new(),
                state: IssueState::Open,
                draft: false,
                head_branch: head_branch.to_string(),
                base_branch: String::from("main"),
                requested_reviewers: requested_reviewers.iter().map(|r| r.to_string()).collect(),
                merged: false,
                created_at,
            },
        );
    }

    pub fn add_review(
        &self,
        pull: u64,
        reviewer: &str,
        decision: ReviewDecision,
        body: &str,
        stale: bool,
    ) {
        let mut state = self.state.lock();
        state.reviews.entry(pull).or_default().push(Review {
            reviewer: reviewer.to_string(),
            decision,
            body: body.to_string(),
            stale,
            submitted_at: Utc::now(),
        });
    }

    pub fn set_merge_conflict(&self, pull: u64) {
        self.state.lock().conflicting_pulls.insert(pull);
    }

    pub fn inject_racing_write(&self, issue: u64, body: &str) {
        self.state.lock().racing_write = Some((issue, body.to_string()));
    }

    pub fn close_issue_directly(&self, number: u64) {
        if let Some(issue) = self.state.lock().issues.get_mut(&number) {
            issue.state = IssueState::Closed;
        }
    }

    pub fn issue_body(&self, number: u64) -> String {
        self.state.lock().issues[&number].body.clone()
    }

    pub fn issue_state(&self, number: u64) -> IssueState {
        self.state.lock().issues[&number].state
    }

    pub fn issue_count(&self) -> usize {
        self.state.lock().issues.len()
    }

    pub fn find_issue_by_title(&self, needle: &str) -> Option<Issue> {
        self.state
            .lock()
            .issues
            .values()
            .find(|i| i.title.contains(needle))
            .cloned()
    }

    pub fn pull_state(&self, number: u64) -> IssueState {
        self.state.lock().pulls[&number].state
    }

    pub fn merged_pulls(&self) -> Vec<u64> {
        self.state.lock().merged_pulls.clone()
    }

    pub fn deleted_branches(&self) -> Vec<String> {
        self.state.lock().deleted_branches.clone()
    }

    pub fn update_count(&self) -> u32 {
        self.state.lock().update_count
    }

    pub fn comments_on(&self, issue: u64) -> Vec<Comment> {
        self.state
            .lock()
            .comments
            .get(&issue)
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_comment(&self, issue: u64, author: &str, body: &str) {
        let mut state = self.state.lock();
        let id = state.next_comment;
        state.next_comment += 1;
        state.comments.entry(issue).or_default().push(Comment {
            id,
            author: author.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn whoami(&self) -> StoreResult<String> {
        Ok(self.state.lock().identity.clone())
    }

    async fn list_issues(&self, _repo: &RepoRef, state: IssueState) -> StoreResult<Vec<Issue>> {
        Ok(self
            .state
            .lock()
            .issues
            .values()
            .filter(|i| i.state == state)
            .cloned()
            .collect())
    }

    async fn get_issue(&self, _repo: &RepoRef, number: u64) -> StoreResult<Issue> {
        self.state
            .lock()
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("issue {}", number)))
    }

    async fn create_issue(
        &self,
        _repo: &RepoRef,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> StoreResult<Issue> {
        let mut state = self.state.lock();
        let number = state.next_issue;
        state.next_issue += 1;
        let now = Utc::now();
        let author = state.identity.clone();
        let issue = Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state: IssueState::Open,
            labels: labels.to_vec(),
            author,
            assignee: None,
            created_at: now,
            updated_at: now,
        };
        state.issues.insert(number, issue.clone());
        Ok(issue)
    }

    async fn update_issue_body(
        &self,
        _repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.update_count += 1;
        let issue = state
            .issues
            .get_mut(&number)
            .ok_or_else(|| StoreError::NotFound(format!("issue {}", number)))?;
        issue.body = body.to_string();
        issue.updated_at = Utc::now();

        if let Some((target, racing_body)) = state.racing_write.take() {
            if target == number {
                if let Some(issue) = state.issues.get_mut(&number) {
                    issue.body = racing_body;
                }
            } else {
                state.racing_write = Some((target, racing_body));
            }
        }
        Ok(())
    }

    async fn close_issue(&self, _repo: &RepoRef, number: u64) -> StoreResult<()> {
        // Already gone counts as closed.
        if let Some(issue) = self.state.lock().issues.get_mut(&number) {
            issue.state = IssueState::Closed;
        }
        Ok(())
    }

    async fn reopen_issue(&self, _repo: &RepoRef, number: u64) -> StoreResult<()> {
        let mut state = self.state.lock();
        let issue = state
            .issues
            .get_mut(&number)
            .ok_or_else(|| StoreError::NotFound(format!("issue {}", number)))?;
        issue.state = IssueState::Open;
        Ok(())
    }

    async fn list_comments(&self, _repo: &RepoRef, number: u64) -> StoreResult<Vec<Comment>> {
        Ok(self
            .state
            .lock()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn post_comment(&self, _repo: &RepoRef, number: u64, body: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        let id = state.next_comment;
        state.next_comment += 1;
        let author = state.identity.clone();
        state.comments.entry(number).or_default().push(Comment {
            id,
            author,
            body: body.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_pulls(
        &self,
        _repo: &RepoRef,
        state: IssueState,
    ) -> StoreResult<Vec<PullRequest>> {
        Ok(self
            .state
            .lock()
            .pulls
            .values()
            .filter(|p| p.state == state)
            .cloned()
            .collect())
    }

    async fn get_pull(&self, _repo: &RepoRef, number: u64) -> StoreResult<PullRequest> {
        self.state
            .lock()
            .pulls
            .get(&number)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pull {}", number)))
    }

    async fn create_pull(
        &self,
        _repo: &RepoRef,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        reviewers: &[String],
    ) -> StoreResult<PullRequest> {
        let mut state = self.state.lock();
        let number = state.next_issue;
        state.next_issue += 1;
        let pull = PullRequest {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state: IssueState::Open,
            draft: false,
            head_branch: head.to_string(),
            base_branch: base.to_string(),
            requested_reviewers: reviewers.to_vec(),
            merged: false,
            created_at: Utc::now(),
        };
        state.pulls.insert(number, pull.clone());
        Ok(pull)
    }

    async fn list_reviews(&self, _repo: &RepoRef, number: u64) -> StoreResult<Vec<Review>> {
        Ok(self
            .state
            .lock()
            .reviews
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn merge_pull(&self, _repo: &RepoRef, number: u64, _method: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.conflicting_pulls.contains(&number) {
            return Err(StoreError::MergeConflict(format!(
                "pull {} is not mergeable",
                number
            )));
        }
        let pull = state
            .pulls
            .get_mut(&number)
            .ok_or_else(|| StoreError::NotFound(format!("pull {}", number)))?;
        pull.merged = true;
        pull.state = IssueState::Closed;
        state.merged_pulls.push(number);
        Ok(())
    }

    async fn close_pull(&self, _repo: &RepoRef, number: u64) -> StoreResult<()> {
        if let Some(pull) = self.state.lock().pulls.get_mut(&number) {
            pull.state = IssueState::Closed;
        }
        Ok(())
    }

    async fn delete_remote_branch(&self, _repo: &RepoRef, branch: &str) -> StoreResult<()> {
        self.state.lock().deleted_branches.push(branch.to_string());
        Ok(())
    }
}

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::MemoryStore;
use taskhive::config::{ClaimConfig, ReviewConfig};
use taskhive::plan::{self, TaskStatus};
use taskhive::review::PrLifecycleManager;
use taskhive::store::{IssueState, ReviewDecision};

const PLAN_BODY: &str = "\
## Goal

Ship the exporter.

## Tasks

- [~] 1. Build the schema (assignee: @worker-a) (claimed-at: 2026-08-06T08:00:00Z)
- [ ] 2. Wire the endpoint (deps: 1)
";

fn manager(store: &Arc<MemoryStore>) -> PrLifecycleManager {
    PrLifecycleManager::new(
        store.clone(),
        ReviewConfig::default(),
        ClaimConfig::default(),
        "discussion",
    )
}

fn setup() -> (Arc<MemoryStore>, PrLifecycleManager, u64) {
    let store = Arc::new(MemoryStore::new("worker-a"));
    let issue = store.seed_issue("Exporter plan", PLAN_BODY, &["plan"], "owner");
    let mgr = manager(&store);
    (store, mgr, issue)
}

#[tokio::test]
async fn fully_approved_pull_merges_and_completes_task() {
    let (store, mgr, issue) = setup();
    store.seed_pull(100, "task-1-build-the-schema", &[], Utc::now());
    store.add_review(100, "alice", ReviewDecision::Approved, "LGTM", false);

    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.merged_tasks, vec![1]);
    assert_eq!(store.merged_pulls(), vec![100]);
    assert!(store
        .deleted_branches()
        .contains(&String::from("task-1-build-the-schema")));

    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    let task = parsed.find_task(1).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.assignee.is_none(), "claim hold released at merge");
}

#[tokio::test]
async fn pending_reviewer_blocks_completion() {
    let (store, mgr, issue) = setup();
    // 2 requested reviewers, 1 approval, 1 still pending: not mergeable.
    store.seed_pull(100, "task-1-build-the-schema", &["bob"], Utc::now());
    store.add_review(100, "alice", ReviewDecision::Approved, "", false);

    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert!(report.merged_tasks.is_empty());
    assert!(store.merged_pulls().is_empty());

    // Merge-gated completion: the task must still be in progress while its
    // pull request is open and unmerged.
    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    assert_eq!(parsed.find_task(1).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn unanimous_rejection_past_timeout_recovers() {
    let (store, mgr, issue) = setup();
    let age = Duration::seconds(ReviewConfig::default().rejection_timeout_secs as i64 + 60);
    store.seed_pull(100, "task-1-build-the-schema", &[], Utc::now() - age);
    store.add_review(
        100,
        "alice",
        ReviewDecision::ChangesRequested,
        "wrong approach",
        false,
    );

    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.recovered_tasks, vec![1]);
    assert_eq!(store.pull_state(100), IssueState::Closed);
    assert!(store
        .deleted_branches()
        .contains(&String::from("task-1-build-the-schema")));

    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    let task = parsed.find_task(1).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.assignee.is_none(), "any agent may reclaim");
}

#[tokio::test]
async fn rejection_before_timeout_is_left_alone() {
    let (store, mgr, issue) = setup();
    store.seed_pull(100, "task-1-build-the-schema", &[], Utc::now());
    store.add_review(100, "alice", ReviewDecision::ChangesRequested, "fix it", false);

    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert!(report.recovered_tasks.is_empty());
    assert_eq!(store.pull_state(100), IssueState::Open);
}

#[tokio::test]
async fn unreviewed_pull_past_timeout_recovers() {
    let (store, mgr, issue) = setup();
    let age = Duration::seconds(ReviewConfig::default().unreviewed_timeout_secs as i64 + 60);
    store.seed_pull(100, "task-1-build-the-schema", &["alice"], Utc::now() - age);

    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.recovered_tasks, vec![1]);
    assert_eq!(store.pull_state(100), IssueState::Closed);
    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    assert_eq!(parsed.find_task(1).unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn merge_conflict_recovers_for_fresh_reclaim() {
    let (store, mgr, issue) = setup();
    store.seed_pull(100, "task-1-build-the-schema", &[], Utc::now());
    store.add_review(100, "alice", ReviewDecision::Approved, "", false);
    store.set_merge_conflict(100);

    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert!(report.merged_tasks.is_empty());
    assert_eq!(report.recovered_tasks, vec![1]);
    assert_eq!(store.pull_state(100), IssueState::Closed);
    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    assert_eq!(parsed.find_task(1).unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn review_prose_becomes_follow_up_issue() {
    let (store, mgr, issue) = setup();
    store.seed_pull(100, "task-1-build-the-schema", &[], Utc::now());
    store.add_review(
        100,
        "alice",
        ReviewDecision::Approved,
        "Approving, but the retry loop should cap attempts",
        false,
    );

    mgr.process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    let follow_up = store
        .find_issue_by_title("Review feedback")
        .expect("feedback is never silently discarded");
    assert!(follow_up.body.contains("retry loop"));
    assert!(follow_up.labels.contains(&String::from("discussion")));
}

#[tokio::test]
async fn bare_approval_creates_no_follow_up() {
    let (store, mgr, issue) = setup();
    store.seed_pull(100, "task-1-build-the-schema", &[], Utc::now());
    store.add_review(100, "alice", ReviewDecision::Approved, "LGTM", false);

    mgr.process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert!(store.find_issue_by_title("Review feedback").is_none());
}

#[tokio::test]
async fn completing_last_task_closes_the_plan() {
    let store = Arc::new(MemoryStore::new("worker-a"));
    let body = "\
## Tasks

- [~] 1. Only task (assignee: @worker-a) (claimed-at: 2026-08-06T08:00:00Z)
";
    let issue = store.seed_issue("Tiny plan", body, &["plan"], "owner");
    store.seed_pull(100, "task-1-only-task", &[], Utc::now());
    store.add_review(100, "alice", ReviewDecision::Approved, "", false);

    let mgr = manager(&store);
    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert!(report.plan_completed);
    assert_eq!(store.issue_state(issue), IssueState::Closed);
}

#[tokio::test]
async fn stale_claim_without_pull_is_reset() {
    let store = Arc::new(MemoryStore::new("worker-a"));
    let stale_at = (Utc::now() - Duration::hours(10)).to_rfc3339();
    let body = format!(
        "## Tasks\n\n- [c] 1. Abandoned work (assignee: @worker-b) (claimed-at: {})\n",
        stale_at
    );
    let issue = store.seed_issue("Plan", &body, &["plan"], "owner");

    let mgr = manager(&store);
    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.recovered_tasks, vec![1]);
    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    let task = parsed.find_task(1).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.assignee.is_none());
}

#[tokio::test]
async fn fresh_claim_without_pull_is_kept() {
    let store = Arc::new(MemoryStore::new("worker-a"));
    let fresh_at = Utc::now().to_rfc3339();
    let body = format!(
        "## Tasks\n\n- [c] 1. Live work (assignee: @worker-b) (claimed-at: {})\n",
        fresh_at
    );
    let issue = store.seed_issue("Plan", &body, &["plan"], "owner");

    let mgr = manager(&store);
    let report = mgr
        .process_plan(&MemoryStore::repo(), issue, Utc::now())
        .await
        .unwrap();

    assert!(report.recovered_tasks.is_empty());
    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    assert_eq!(parsed.find_task(1).unwrap().status, TaskStatus::Claimed);
}

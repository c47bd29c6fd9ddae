mod common;

use std::sync::Arc;

use common::MemoryStore;
use taskhive::claim::ClaimCoordinator;
use taskhive::plan::{self, TaskStatus};
use taskhive::store::IssueStore;

const PLAN_BODY: &str = "\
## Goal

Ship the exporter.

## Tasks

- [ ] 1. Build the schema
- [ ] 2. Wire the endpoint (deps: 1)
";

fn setup() -> (Arc<MemoryStore>, ClaimCoordinator, u64) {
    let store = Arc::new(MemoryStore::new("worker-a"));
    let issue = store.seed_issue("Exporter plan", PLAN_BODY, &["plan"], "owner");
    let coordinator = ClaimCoordinator::new(store.clone());
    (store, coordinator, issue)
}

#[tokio::test]
async fn claim_wins_and_writes_assignee() {
    let (store, coordinator, issue) = setup();
    let repo = MemoryStore::repo();

    let outcome = coordinator.claim(&repo, issue, 1, "worker-a").await.unwrap();
    assert!(outcome.claimed);
    assert_eq!(outcome.claimed_by.as_deref(), Some("worker-a"));

    let body = store.issue_body(issue);
    let parsed = plan::parse("Exporter plan", &body).unwrap();
    let task = parsed.find_task(1).unwrap();
    assert_eq!(task.status, TaskStatus::Claimed);
    assert_eq!(task.assignee.as_deref(), Some("worker-a"));
    assert!(task.claimed_at.is_some(), "claim time is persisted in the body");
}

#[tokio::test]
async fn claim_is_idempotent_without_second_write() {
    let (store, coordinator, issue) = setup();
    let repo = MemoryStore::repo();

    coordinator.claim(&repo, issue, 1, "worker-a").await.unwrap();
    let writes_after_first = store.update_count();
    let body_after_first = store.issue_body(issue);

    let again = coordinator.claim(&repo, issue, 1, "worker-a").await.unwrap();
    assert!(again.claimed);
    assert_eq!(store.update_count(), writes_after_first, "no second write");
    assert_eq!(store.issue_body(issue), body_after_first);
}

#[tokio::test]
async fn second_claimant_loses() {
    let (_store, coordinator, issue) = setup();
    let repo = MemoryStore::repo();

    let first = coordinator.claim(&repo, issue, 1, "worker-a").await.unwrap();
    assert!(first.claimed);

    let second = coordinator.claim(&repo, issue, 1, "worker-b").await.unwrap();
    assert!(!second.claimed);
    assert_eq!(second.claimed_by.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn lost_race_is_detected_by_post_claim_verification() {
    let (store, coordinator, issue) = setup();
    let repo = MemoryStore::repo();

    // A rival's claim lands immediately after our write: the body we
    // re-read during verification names them, not us.
    let rival_body = plan::patch_task_status(
        PLAN_BODY,
        1,
        TaskStatus::Claimed,
        Some("worker-b"),
        Some(chrono::Utc::now()),
    )
    .unwrap();
    store.inject_racing_write(issue, &rival_body);

    let outcome = coordinator.claim(&repo, issue, 1, "worker-a").await.unwrap();
    assert!(!outcome.claimed, "loser must abort before executing");
    assert_eq!(outcome.claimed_by.as_deref(), Some("worker-b"));
}

#[tokio::test]
async fn dependency_gates_claimability() {
    let (store, coordinator, issue) = setup();
    let repo = MemoryStore::repo();

    let blocked = coordinator.claim(&repo, issue, 2, "worker-a").await.unwrap();
    assert!(!blocked.claimed, "task 2 depends on pending task 1");

    // Complete task 1 directly in the store; task 2 becomes claimable.
    let completed =
        plan::patch_task_status(PLAN_BODY, 1, TaskStatus::Completed, None, None).unwrap();
    store
        .update_issue_body(&repo, issue, &completed)
        .await
        .unwrap();

    let outcome = coordinator.claim(&repo, issue, 2, "worker-a").await.unwrap();
    assert!(outcome.claimed);
}

#[tokio::test]
async fn claiming_a_non_plan_issue_loses_cleanly() {
    let store = Arc::new(MemoryStore::new("worker-a"));
    let issue = store.seed_issue("Not a plan", "free-form text", &[], "owner");
    let coordinator = ClaimCoordinator::new(store.clone());

    let outcome = coordinator
        .claim(&MemoryStore::repo(), issue, 1, "worker-a")
        .await
        .unwrap();
    assert!(!outcome.claimed);
    assert!(outcome.claimed_by.is_none());
}

#[tokio::test]
async fn mark_in_progress_requires_ownership() {
    let (store, coordinator, issue) = setup();
    let repo = MemoryStore::repo();

    coordinator.claim(&repo, issue, 1, "worker-a").await.unwrap();

    assert!(
        !coordinator
            .mark_in_progress(&repo, issue, 1, "worker-b")
            .await
            .unwrap(),
        "only the holder may advance the task"
    );

    assert!(
        coordinator
            .mark_in_progress(&repo, issue, 1, "worker-a")
            .await
            .unwrap()
    );
    let parsed = plan::parse("p", &store.issue_body(issue)).unwrap();
    assert_eq!(parsed.find_task(1).unwrap().status, TaskStatus::InProgress);
}

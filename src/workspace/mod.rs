//! Workspace tracking: the persisted registry of watched repositories and
//! the lifecycle controller that moves each one between active,
//! needs-synthesis, and finished.

mod lifecycle;
mod registry;

pub use lifecycle::{is_work_request, LifecycleController, SynthesisOutcome, WorkspacePhase};
pub use registry::WorkspaceRegistry;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::RepoRef;

/// One tracked repository. Created on first discovery, mutated by every
/// poll cycle, never deleted — only unwatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub owner: String,
    pub repo: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_polled: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_plan_issues: BTreeSet<u64>,
    #[serde(default)]
    pub last_plan_synthesis_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_health_check_attempt: Option<DateTime<Utc>>,
    /// Issue number of the open "finished" sentinel, when one exists.
    /// While set, no new plan or task work may start here.
    #[serde(default)]
    pub finished_sentinel: Option<u64>,
}

impl WorkspaceRecord {
    pub fn new(repo: &RepoRef, now: DateTime<Utc>) -> Self {
        Self {
            owner: repo.owner.clone(),
            repo: repo.repo.clone(),
            discovered_at: now,
            last_polled: None,
            active_plan_issues: BTreeSet::new(),
            last_plan_synthesis_attempt: None,
            last_health_check_attempt: None,
            finished_sentinel: None,
        }
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(self.owner.clone(), self.repo.clone())
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn synthesis_cooldown_elapsed(&self, now: DateTime<Utc>, cooldown_secs: u64) -> bool {
        match self.last_plan_synthesis_attempt {
            Some(at) => now.signed_duration_since(at).num_seconds() >= cooldown_secs as i64,
            None => true,
        }
    }
}

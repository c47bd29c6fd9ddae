use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{HiveError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub agent: AgentConfig,
    pub claim: ClaimConfig,
    pub review: ReviewConfig,
    pub queue: QueueConfig,
    pub workspace: WorkspaceConfig,
    pub store: StoreConfig,
    pub git: GitConfig,
}

impl HiveConfig {
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = data_dir.join("config.toml");
        let content = toml::to_string_pretty(self).map_err(|e| HiveError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.agent.handle.is_empty() {
            errors.push("agent handle must not be empty");
        }

        if self.claim.staleness_secs == 0 {
            errors.push("claim staleness_secs must be greater than 0");
        }

        if self.review.rejection_timeout_secs == 0 {
            errors.push("review rejection_timeout_secs must be greater than 0");
        }
        if self.review.unreviewed_timeout_secs <= self.review.rejection_timeout_secs {
            errors.push("unreviewed_timeout_secs must exceed rejection_timeout_secs");
        }

        if self.queue.max_attempts == 0 {
            errors.push("queue max_attempts must be greater than 0");
        }
        if self.queue.backoff_base_secs == 0 {
            errors.push("queue backoff_base_secs must be greater than 0");
        }
        if self.queue.backoff_cap_secs < self.queue.backoff_base_secs {
            errors.push("queue backoff_cap_secs must be >= backoff_base_secs");
        }
        if self.queue.commitment_in_progress_timeout_secs >= self.queue.commitment_max_age_secs {
            errors.push("commitment_in_progress_timeout_secs must be below commitment_max_age_secs");
        }

        if self.workspace.synthesis_cooldown_secs == 0 {
            errors.push("workspace synthesis_cooldown_secs must be greater than 0");
        }

        if self.store.request_timeout_secs == 0 {
            errors.push("store request_timeout_secs must be greater than 0");
        }
        if self.store.budget_per_hour == 0 {
            errors.push("store budget_per_hour must be greater than 0");
        }

        if self.git.default_branch.is_empty() {
            errors.push("git default_branch must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HiveError::Config(errors.join("; ")))
        }
    }
}

/// Identity and execution settings for this worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Handle written into claim tags; must match the tracker identity.
    pub handle: String,
    /// Command invoked to execute one task inside a checkout.
    pub executor_command: String,
    pub executor_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            handle: String::from("taskhive-agent"),
            executor_command: String::from("taskhive-executor"),
            executor_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// A claimed or in-progress task with no open pull request is reset to
    /// pending after this long, by whichever process notices first.
    pub staleness_secs: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 4 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub reviewers: Vec<String>,
    /// All reviewers rejected and the pull request is older than this.
    pub rejection_timeout_secs: u64,
    /// Zero reviews and reviewers still pending past this.
    pub unreviewed_timeout_secs: u64,
    pub merge_method: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            reviewers: Vec::new(),
            rejection_timeout_secs: 24 * 3600,
            unreviewed_timeout_secs: 72 * 3600,
            merge_method: String::from("squash"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Terminal entries older than this are pruned on load.
    pub retention_secs: u64,
    /// A commitment unresolved past this age is abandoned outright.
    pub commitment_max_age_secs: u64,
    /// A commitment stuck in progress past this is reset to failed.
    pub commitment_in_progress_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_secs: 60,
            backoff_cap_secs: 3600,
            retention_secs: 7 * 24 * 3600,
            commitment_max_age_secs: 3 * 24 * 3600,
            commitment_in_progress_timeout_secs: 2 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Minimum gap between plan-synthesis attempts per workspace.
    pub synthesis_cooldown_secs: u64,
    pub plan_label: String,
    pub finished_label: String,
    pub discussion_label: String,
    pub memo_label: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            synthesis_cooldown_secs: 6 * 3600,
            plan_label: String::from("plan"),
            finished_label: String::from("finished"),
            discussion_label: String::from("discussion"),
            memo_label: String::from("memo"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub request_timeout_secs: u64,
    /// Minimum spacing between consecutive store requests.
    pub min_request_interval_ms: u64,
    /// Process-local request budget per rolling hour.
    pub budget_per_hour: u32,
    /// Below this remaining fraction, reads get a synthetic unavailable
    /// response instead of spending the last of the budget.
    pub critical_budget_fraction: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            min_request_interval_ms: 250,
            budget_per_hour: 900,
            critical_budget_fraction: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub default_branch: String,
    pub remote: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_branch: String::from("main"),
            remote: String::from("origin"),
        }
    }
}

/// Layout of the private data directory.
#[derive(Debug, Clone)]
pub struct HivePaths {
    pub data_dir: PathBuf,
    pub checkouts_dir: PathBuf,
    pub registry_path: PathBuf,
    pub actions_path: PathBuf,
    pub commitments_path: PathBuf,
}

impl HivePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let data_dir = root.into().join(".taskhive");
        Self {
            checkouts_dir: data_dir.join("checkouts"),
            registry_path: data_dir.join("workspaces.yaml"),
            actions_path: data_dir.join("actions.jsonl"),
            commitments_path: data_dir.join("commitments.jsonl"),
            data_dir,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.data_dir.is_dir()
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.checkouts_dir).await?;
        Ok(())
    }

    pub fn checkout_dir(&self, owner: &str, repo: &str) -> PathBuf {
        self.checkouts_dir.join(owner).join(repo)
    }
}

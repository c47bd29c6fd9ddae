use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one task inside a plan.
///
/// Status is the single source of truth for ownership; the assignee tag
/// alone is never sufficient proof of a claim. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    InProgress,
    Blocked,
    Completed,
}

impl TaskStatus {
    /// Checklist marker used in the plan body.
    pub fn marker(self) -> char {
        match self {
            Self::Pending => ' ',
            Self::Claimed => 'c',
            Self::InProgress => '~',
            Self::Blocked => '!',
            Self::Completed => 'x',
        }
    }

    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ' ' => Some(Self::Pending),
            'c' => Some(Self::Claimed),
            '~' => Some(Self::InProgress),
            '!' => Some(Self::Blocked),
            'x' => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }

    /// States that represent a live hold by some claimant.
    pub fn is_held(self) -> bool {
        matches!(self, Self::Claimed | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Claimed => write!(f, "claimed"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Blocked => write!(f, "blocked"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One unit of work inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable ordinal, unique within the plan.
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee: Option<String>,
    /// When the current claim was written, persisted in the plan body so
    /// staleness is re-derivable by any process.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub estimate: Option<String>,
}

impl Task {
    pub fn new(number: u32, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            assignee: None,
            claimed_at: None,
            dependencies: Vec::new(),
            files: Vec::new(),
            estimate: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<u32>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_estimate(mut self, estimate: impl Into<String>) -> Self {
        self.estimate = Some(estimate.into());
        self
    }

    /// Whether the current claim has outlived the staleness window.
    pub fn claim_is_stale(&self, now: DateTime<Utc>, staleness_secs: u64) -> bool {
        if !self.status.is_held() {
            return false;
        }
        match self.claimed_at {
            Some(at) => {
                now.signed_duration_since(at).num_seconds() >= staleness_secs as i64
            }
            // A held task with no recorded claim time cannot prove freshness.
            None => true,
        }
    }
}

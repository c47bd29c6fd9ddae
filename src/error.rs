use std::time::Duration;
use thiserror::Error;

/// Failure talking to the external issue tracker.
///
/// Transient failures are retried with backoff by the callers that own a
/// retry budget; permanent failures propagate immediately.
#[derive(Debug, Clone)]
pub enum StoreError {
    RateLimited {
        retry_after_secs: Option<u64>,
    },
    Timeout {
        operation: String,
        duration_secs: u64,
    },
    /// Network failure or 5xx from the store, including the synthetic
    /// response emitted when the local rate budget is critically low.
    Unavailable(String),
    NotFound(String),
    /// Merge endpoint refused the merge (conflicting head).
    MergeConflict(String),
    /// Authentication or permission failure.
    Denied(String),
    /// Response did not decode or had an unexpected shape.
    Protocol(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Unavailable(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    pub fn suggested_delay(&self) -> Duration {
        match self {
            Self::RateLimited { retry_after_secs } => {
                Duration::from_secs(retry_after_secs.unwrap_or(60))
            }
            Self::Timeout { .. } => Duration::from_secs(10),
            Self::Unavailable(_) => Duration::from_secs(30),
            _ => Duration::from_secs(0),
        }
    }

    /// Classify a failed `gh` invocation from its stderr.
    /// Only unambiguous patterns (HTTP codes, explicit keywords) are mapped;
    /// everything else stays `Protocol` so callers do not guess.
    pub fn from_gh_output(stderr: &str) -> Self {
        if stderr.contains("429") || stderr.contains("rate limit") {
            return Self::RateLimited {
                retry_after_secs: extract_retry_after(stderr),
            };
        }
        if stderr.contains("502") || stderr.contains("503") || stderr.contains("504") {
            return Self::Unavailable(stderr.to_string());
        }
        if stderr.contains("405") || stderr.contains("not mergeable") || stderr.contains("409") {
            return Self::MergeConflict(stderr.to_string());
        }
        if stderr.contains("404") || stderr.contains("Not Found") {
            return Self::NotFound(stderr.to_string());
        }
        if stderr.contains("401") || stderr.contains("403") || stderr.contains("Forbidden") {
            return Self::Denied(stderr.to_string());
        }
        Self::Protocol(stderr.to_string())
    }
}

fn extract_retry_after(msg: &str) -> Option<u64> {
    let lower = msg.to_lowercase();
    for pattern in ["retry after ", "retry-after: ", "retry_after="] {
        if let Some(idx) = lower.find(pattern) {
            let digits: String = lower[idx + pattern.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(secs) = digits.parse() {
                return Some(secs);
            }
        }
    }
    None
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "rate limited, retry after {}s", secs),
                None => write!(f, "rate limited"),
            },
            Self::Timeout {
                operation,
                duration_secs,
            } => write!(f, "timeout after {}s: {}", duration_secs, operation),
            Self::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            Self::NotFound(msg) => write!(f, "not found: {}", msg),
            Self::MergeConflict(msg) => write!(f, "merge conflict: {}", msg),
            Self::Denied(msg) => write!(f, "access denied: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Workspace already watched: {0}")]
    WorkspaceExists(String),

    #[error("Plan issue #{issue} has no task {task}")]
    TaskNotFound { issue: u64, task: u32 },

    #[error("Not a plan: issue #{0}")]
    NotAPlan(u64),

    #[error("Claim verification failed for task {task}: held by {holder}")]
    ClaimLost { task: u32, holder: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Executor failed: {0}")]
    Executor(String),

    #[error("Data directory not initialized. Run 'taskhive init' first.")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(
            StoreError::RateLimited {
                retry_after_secs: None
            }
            .is_transient()
        );
        assert!(StoreError::Unavailable("502".into()).is_transient());
        assert!(StoreError::NotFound("gone".into()).is_permanent());
        assert!(StoreError::Denied("403".into()).is_permanent());
    }

    #[test]
    fn gh_output_mapping() {
        let err = StoreError::from_gh_output("HTTP 429: rate limit exceeded, retry after 30");
        match err {
            StoreError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(30));
            }
            other => panic!("unexpected classification: {:?}", other),
        }

        assert!(matches!(
            StoreError::from_gh_output("HTTP 404: Not Found"),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            StoreError::from_gh_output("Pull Request is not mergeable"),
            StoreError::MergeConflict(_)
        ));
    }
}

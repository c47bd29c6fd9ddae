use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{HiveError, Result};
use crate::persist::{remove_stale_tmp, write_atomic};

use super::backoff::dedup_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Abandoned,
}

impl CommitmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Statuses that block new promise-making in the same channel.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

/// One promise extracted from agent-authored text ("I will do X").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: Uuid,
    pub description: String,
    /// Kind of follow-through action the promise requires.
    pub kind: String,
    pub source_thread: String,
    pub dedup_hash: String,
    pub status: CommitmentStatus,
    pub attempt_count: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable queue of made promises.
///
/// A pending or in-progress commitment blocks the owning agent from making
/// new promises in the same channel, so promises cannot pile up faster
/// than they are kept.
pub struct CommitmentQueue {
    path: PathBuf,
    config: QueueConfig,
    cache: Mutex<Vec<Commitment>>,
}

impl CommitmentQueue {
    pub async fn open(path: impl Into<PathBuf>, config: QueueConfig) -> Result<Self> {
        let queue = Self {
            path: path.into(),
            config,
            cache: Mutex::new(Vec::new()),
        };
        remove_stale_tmp(&queue.path).await;
        queue.reload().await?;
        queue.prune_on_load().await?;
        Ok(queue)
    }

    pub async fn reload(&self) -> Result<()> {
        let mut entries = Vec::new();
        if self.path.exists() {
            let content = fs::read_to_string(&self.path).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<Commitment>(line) {
                    Ok(commitment) => entries.push(commitment),
                    Err(e) => warn!(error = %e, "Skipping unreadable commitment entry"),
                }
            }
        }
        *self.cache.lock() = entries;
        Ok(())
    }

    /// Record a promise. A non-terminal entry with the same
    /// `(thread, normalized description)` hash is returned instead of
    /// creating a duplicate.
    pub async fn enqueue(
        &self,
        source_thread: &str,
        description: &str,
        kind: &str,
    ) -> Result<Commitment> {
        let hash = dedup_key(source_thread, description);
        let commitment = {
            let mut cache = self.cache.lock();
            if let Some(existing) = cache
                .iter()
                .find(|c| c.dedup_hash == hash && !c.status.is_terminal())
            {
                debug!(id = %existing.id, "Duplicate commitment, returning existing entry");
                return Ok(existing.clone());
            }

            let now = Utc::now();
            let commitment = Commitment {
                id: Uuid::new_v4(),
                description: description.to_string(),
                kind: kind.to_string(),
                source_thread: source_thread.to_string(),
                dedup_hash: hash,
                status: CommitmentStatus::Pending,
                attempt_count: 0,
                error: None,
                result: None,
                created_at: now,
                updated_at: now,
            };
            cache.push(commitment.clone());
            commitment
        };
        self.persist().await?;
        Ok(commitment)
    }

    /// Whether new promises in `source_thread` are currently blocked.
    pub fn has_blocking(&self, source_thread: &str) -> bool {
        self.cache
            .lock()
            .iter()
            .any(|c| c.source_thread == source_thread && c.status.is_blocking())
    }

    pub fn pending(&self) -> Vec<Commitment> {
        self.cache
            .lock()
            .iter()
            .filter(|c| c.status == CommitmentStatus::Pending)
            .cloned()
            .collect()
    }

    pub async fn mark_in_progress(&self, id: Uuid) -> Result<()> {
        self.mutate(id, |c| {
            c.status = CommitmentStatus::InProgress;
        })
        .await
    }

    pub async fn mark_completed(&self, id: Uuid, result: &str) -> Result<()> {
        self.mutate(id, |c| {
            c.status = CommitmentStatus::Completed;
            c.result = Some(result.to_string());
            c.error = None;
        })
        .await
    }

    /// Record a failed attempt; at the attempt ceiling the commitment is
    /// abandoned rather than retried further.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        self.mutate(id, |c| {
            c.attempt_count += 1;
            c.error = Some(error.to_string());
            c.status = if c.attempt_count >= max_attempts {
                CommitmentStatus::Abandoned
            } else {
                CommitmentStatus::Failed
            };
        })
        .await
    }

    /// Two recovery sweeps, run every poll cycle:
    /// - anything unresolved past the absolute age ceiling is abandoned,
    ///   regardless of status or attempt count;
    /// - anything stuck in progress past the (shorter) in-progress timeout
    ///   is reset to failed so a crashed worker's promise becomes
    ///   retryable instead of blocking its channel forever.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let max_age = ChronoDuration::seconds(self.config.commitment_max_age_secs as i64);
        let stuck_after =
            ChronoDuration::seconds(self.config.commitment_in_progress_timeout_secs as i64);

        let report = {
            let mut cache = self.cache.lock();
            let mut report = SweepReport::default();
            for commitment in cache.iter_mut() {
                if !commitment.status.is_terminal()
                    && now.signed_duration_since(commitment.created_at) >= max_age
                {
                    commitment.status = CommitmentStatus::Abandoned;
                    commitment.error = Some(String::from("exceeded maximum age"));
                    commitment.updated_at = now;
                    report.abandoned += 1;
                } else if commitment.status == CommitmentStatus::InProgress
                    && now.signed_duration_since(commitment.updated_at) >= stuck_after
                {
                    commitment.status = CommitmentStatus::Failed;
                    commitment.error = Some(String::from("stuck in progress, reset for retry"));
                    commitment.updated_at = now;
                    report.reset += 1;
                }
            }
            report
        };

        if report.abandoned > 0 || report.reset > 0 {
            info!(
                abandoned = report.abandoned,
                reset = report.reset,
                "Commitment sweep applied"
            );
            self.persist().await?;
        }
        Ok(report)
    }

    pub fn get(&self, id: Uuid) -> Option<Commitment> {
        self.cache.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Commitment> {
        self.cache.lock().clone()
    }

    async fn mutate<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Commitment),
    {
        {
            let mut cache = self.cache.lock();
            let commitment = cache
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| HiveError::Queue(format!("unknown commitment {}", id)))?;
            apply(commitment);
            commitment.updated_at = Utc::now();
        }
        self.persist().await
    }

    async fn prune_on_load(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.retention_secs as i64);
        let pruned = {
            let mut cache = self.cache.lock();
            let before = cache.len();
            cache.retain(|c| !(c.status.is_terminal() && c.created_at < cutoff));
            before - cache.len()
        };
        if pruned > 0 {
            debug!(pruned, "Pruned terminal commitments past retention");
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let content = {
            let cache = self.cache.lock();
            let mut lines = Vec::with_capacity(cache.len());
            for commitment in cache.iter() {
                lines.push(serde_json::to_string(commitment)?);
            }
            let mut text = lines.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            text
        };
        write_atomic(&self.path, &content).await
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub abandoned: usize,
    pub reset: usize,
}

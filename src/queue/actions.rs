use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{HiveError, Result};
use crate::persist::{remove_stale_tmp, write_atomic};

use super::backoff::{dedup_key, retry_delay};

/// Delivery priority; owner-directed replies jump the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPriority {
    Owner,
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Sent,
    Deferred,
    Failed,
    Abandoned,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Abandoned)
    }
}

/// One pending outbound reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Post or thread the reply goes to.
    pub target: String,
    pub text: String,
    pub text_hash: String,
    pub priority: ActionPriority,
    pub status: ActionStatus,
    pub attempt_count: u32,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueuedAction {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ActionStatus::Pending => true,
            ActionStatus::Deferred => self.next_retry_at.is_none_or(|at| at <= now),
            _ => false,
        }
    }
}

/// Durable log of outbound actions with dedup and bounded retry.
///
/// The persisted JSONL file is rewritten compactly on each mutation; the
/// in-process cache mirrors it and can be forced back in sync with
/// `reload`.
pub struct ActionQueue {
    path: PathBuf,
    config: QueueConfig,
    cache: Mutex<Vec<QueuedAction>>,
}

impl ActionQueue {
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

    /// Discard the cache and re-read the persisted log.
    pub async fn reload(&self) -> Result<()> {
        let mut entries = Vec::new();
        if self.path.exists() {
            let content = fs::read_to_string(&self.path).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<QueuedAction>(line) {
                    Ok(action) => entries.push(action),
                    Err(e) => warn!(error = %e, "Skipping unreadable action entry"),
                }
            }
        }
        *self.cache.lock() = entries;
        Ok(())
    }

    /// Enqueue a reply. A non-terminal entry with the same
    /// `(target, normalized text)` hash is returned instead of creating a
    /// duplicate.
    pub async fn enqueue(
        &self,
        target: &str,
        text: &str,
        priority: ActionPriority,
    ) -> Result<QueuedAction> {
        let hash = dedup_key(target, text);
        let action = {
            let mut cache = self.cache.lock();
            if let Some(existing) = cache
                .iter()
                .find(|a| a.text_hash == hash && !a.status.is_terminal())
            {
                debug!(id = %existing.id, "Duplicate action, returning existing entry");
                return Ok(existing.clone());
            }

            let action = QueuedAction {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                target: target.to_string(),
                text: text.to_string(),
                text_hash: hash,
                priority,
                status: ActionStatus::Pending,
                attempt_count: 0,
                next_retry_at: None,
                error: None,
            };
            cache.push(action.clone());
            action
        };
        self.persist().await?;
        Ok(action)
    }

    /// Actions ready to send: pending, plus deferred whose retry time has
    /// elapsed, ordered by priority then age.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<QueuedAction> {
        let cache = self.cache.lock();
        let mut due: Vec<QueuedAction> = cache.iter().filter(|a| a.is_due(now)).cloned().collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        due
    }

    /// Terminal and final.
    pub async fn mark_sent(&self, id: Uuid) -> Result<()> {
        self.mutate(id, |action| {
            action.status = ActionStatus::Sent;
            action.error = None;
            action.next_retry_at = None;
        })
        .await
    }

    /// Record a failed attempt and either schedule a retry with backoff or,
    /// at the attempt ceiling, fail the action permanently.
    pub async fn defer(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        let base = self.config.backoff_base_secs;
        let cap = self.config.backoff_cap_secs;
        self.mutate(id, |action| {
            action.attempt_count += 1;
            action.error = Some(error.to_string());
            if action.attempt_count >= max_attempts {
                action.status = ActionStatus::Failed;
                action.next_retry_at = None;
            } else {
                action.status = ActionStatus::Deferred;
                let delay = retry_delay(action.attempt_count, base, cap);
                action.next_retry_at =
                    Some(now + ChronoDuration::seconds(delay.as_secs() as i64));
            }
        })
        .await
    }

    pub async fn abandon(&self, id: Uuid, reason: &str) -> Result<()> {
        self.mutate(id, |action| {
            action.status = ActionStatus::Abandoned;
            action.error = Some(reason.to_string());
        })
        .await
    }

    pub fn get(&self, id: Uuid) -> Option<QueuedAction> {
        self.cache.lock().iter().find(|a| a.id == id).cloned()
    }

    pub fn all(&self) -> Vec<QueuedAction> {
        self.cache.lock().clone()
    }

    async fn mutate<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut QueuedAction),
    {
        {
            let mut cache = self.cache.lock();
            let action = cache
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| HiveError::Queue(format!("unknown action {}", id)))?;
            apply(action);
        }
        self.persist().await
    }

    /// Drop terminal entries older than the retention window.
    async fn prune_on_load(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.retention_secs as i64);
        let pruned = {
            let mut cache = self.cache.lock();
            let before = cache.len();
            cache.retain(|a| !(a.status.is_terminal() && a.created_at < cutoff));
            before - cache.len()
        };
        if pruned > 0 {
            debug!(pruned, "Pruned terminal actions past retention");
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let content = {
            let cache = self.cache.lock();
            let mut lines = Vec::with_capacity(cache.len());
            for action in cache.iter() {
                lines.push(serde_json::to_string(action)?);
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn queue(dir: &TempDir) -> ActionQueue {
        ActionQueue::open(dir.path().join("actions.jsonl"), QueueConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_dedups_against_non_terminal() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        let first = q
            .enqueue("thread-1", "On it, will reply shortly", ActionPriority::Normal)
            .await
            .unwrap();
        let second = q
            .enqueue("thread-1", "on it,  will reply SHORTLY", ActionPriority::Normal)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(q.all().len(), 1);

        // Once terminal, the same content may be enqueued again.
        q.mark_sent(first.id).await.unwrap();
        let third = q
            .enqueue("thread-1", "On it, will reply shortly", ActionPriority::Normal)
            .await
            .unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn due_orders_by_priority_then_age() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        q.enqueue("t1", "low priority reply", ActionPriority::Low)
            .await
            .unwrap();
        q.enqueue("t2", "owner reply", ActionPriority::Owner)
            .await
            .unwrap();
        q.enqueue("t3", "normal reply", ActionPriority::Normal)
            .await
            .unwrap();

        let due = q.due(Utc::now());
        assert_eq!(due.len(), 3);
        assert_eq!(due[0].priority, ActionPriority::Owner);
        assert_eq!(due[1].priority, ActionPriority::Normal);
        assert_eq!(due[2].priority, ActionPriority::Low);
    }

    #[tokio::test]
    async fn defer_schedules_backoff_then_fails_permanently() {
        let dir = TempDir::new().unwrap();
        let config = QueueConfig {
            max_attempts: 3,
            ..QueueConfig::default()
        };
        let q = ActionQueue::open(dir.path().join("a.jsonl"), config)
            .await
            .unwrap();
        let now = Utc::now();

        let action = q
            .enqueue("t", "flaky reply", ActionPriority::Normal)
            .await
            .unwrap();

        q.defer(action.id, "503", now).await.unwrap();
        let deferred = q.get(action.id).unwrap();
        assert_eq!(deferred.status, ActionStatus::Deferred);
        assert!(deferred.next_retry_at.unwrap() > now);
        assert!(q.due(now).is_empty(), "not due until backoff elapses");

        q.defer(action.id, "503", now).await.unwrap();
        q.defer(action.id, "503", now).await.unwrap();
        let failed = q.get(action.id).unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.attempt_count, 3);
        assert!(q.due(now + ChronoDuration::days(30)).is_empty());
    }

    #[tokio::test]
    async fn queue_survives_reload() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;
        let action = q
            .enqueue("t", "persisted reply", ActionPriority::High)
            .await
            .unwrap();

        let reopened = queue(&dir).await;
        let loaded = reopened.get(action.id).unwrap();
        assert_eq!(loaded.text, "persisted reply");
        assert_eq!(loaded.priority, ActionPriority::High);
    }

    #[tokio::test]
    async fn terminal_entries_are_pruned_past_retention() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;
        let action = q
            .enqueue("t", "old reply", ActionPriority::Normal)
            .await
            .unwrap();
        q.mark_sent(action.id).await.unwrap();

        // Age the entry past retention by rewriting its timestamp.
        let config = QueueConfig::default();
        {
            let mut entries = q.all();
            entries[0].created_at =
                Utc::now() - ChronoDuration::seconds(config.retention_secs as i64 + 60);
            let lines: Vec<String> = entries
                .iter()
                .map(|a| serde_json::to_string(a).unwrap())
                .collect();
            std::fs::write(dir.path().join("actions.jsonl"), lines.join("\n")).unwrap();
        }

        let reopened = queue(&dir).await;
        assert!(reopened.all().is_empty());
    }
}

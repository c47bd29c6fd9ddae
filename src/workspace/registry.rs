use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use tokio::fs;

use crate::error::{HiveError, Result};
use crate::persist::{remove_stale_tmp, write_atomic};
use crate::store::RepoRef;

use super::WorkspaceRecord;

/// Persisted registry of watched workspaces, keyed by `owner/repo`.
///
/// The on-disk YAML file is the durable form; the in-process cache exists
/// to avoid re-reading it on every call and can be forced back in sync
/// with `reload`.
pub struct WorkspaceRegistry {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, WorkspaceRecord>>,
}

impl WorkspaceRegistry {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let registry = Self {
            path: path.into(),
            cache: RwLock::new(BTreeMap::new()),
        };
        remove_stale_tmp(&registry.path).await;
        registry.reload().await?;
        Ok(registry)
    }

    /// Discard the cache and re-read the persisted file.
    pub async fn reload(&self) -> Result<()> {
        let records = if self.path.exists() {
            let content = fs::read_to_string(&self.path).await?;
            serde_yaml_bw::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        *self.cache.write() = records;
        Ok(())
    }

    pub async fn watch(&self, repo: &RepoRef, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let slug = repo.slug();
        {
            let mut cache = self.cache.write();
            if cache.contains_key(&slug) {
                return Err(HiveError::WorkspaceExists(slug));
            }
            cache.insert(slug, WorkspaceRecord::new(repo, now));
        }
        self.persist().await
    }

    pub async fn unwatch(&self, slug: &str) -> Result<()> {
        {
            let mut cache = self.cache.write();
            if cache.remove(slug).is_none() {
                return Err(HiveError::WorkspaceNotFound(slug.to_string()));
            }
        }
        self.persist().await
    }

    pub fn get(&self, slug: &str) -> Option<WorkspaceRecord> {
        self.cache.read().get(slug).cloned()
    }

    pub fn all(&self) -> Vec<WorkspaceRecord> {
        self.cache.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Apply a mutation to one record and persist the registry.
    pub async fn update<F>(&self, slug: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut WorkspaceRecord),
    {
        {
            let mut cache = self.cache.write();
            let record = cache
                .get_mut(slug)
                .ok_or_else(|| HiveError::WorkspaceNotFound(slug.to_string()))?;
            mutate(record);
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let content = {
            let cache = self.cache.read();
            serde_yaml_bw::to_string(&*cache)?
        };
        write_atomic(&self.path, &content).await
    }
}

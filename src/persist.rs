//! Atomic file persistence shared by the registry and the durable queues.
//!
//! Everything durable in this engine is a plain structured text file
//! written via write-temp-then-rename, so a crash mid-write can never be
//! observed as a torn file. Leftover temp files from interrupted writes
//! are removed before first use.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::Result;

pub fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

pub async fn remove_stale_tmp(path: &Path) {
    let tmp = tmp_path(path);
    if tmp.exists() {
        debug!(path = %tmp.display(), "Removing interrupted write");
        let _ = fs::remove_file(&tmp).await;
    }
}

pub async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, content).await?;

    let tmp_clone = tmp.clone();
    let sync_result = tokio::task::spawn_blocking(move || {
        std::fs::File::open(&tmp_clone).and_then(|file| file.sync_all())
    })
    .await;
    match sync_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to sync temp file to disk"),
        Err(e) => tracing::warn!(error = %e, "Failed to sync temp file to disk"),
    }

    fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Atomic write completed");
    Ok(())
}

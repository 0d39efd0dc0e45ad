//! Filesystem session-file source
//!
//! Enumerates local session files (`.jsonl`) under a root directory,
//! recording each file's modification time so the builder can apply the
//! lookback window without touching file contents. Parsing stays with
//! the external collaborator behind the stats-cache port.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use metershare_core::ports::session_cache::{ISessionSource, SessionFile};

/// File extension produced by the session recorder
const SESSION_EXTENSION: &str = "jsonl";

/// Lists session files under a root directory
pub struct FsSessionSource {
    root: PathBuf,
}

impl FsSessionSource {
    /// Creates a source rooted at `root`
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl ISessionSource for FsSessionSource {
    async fn session_files(&self) -> Result<Vec<SessionFile>> {
        let mut files = Vec::new();

        if !self.root.exists() {
            // A missing sessions directory just means nothing recorded yet.
            return Ok(files);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        warn!(path = %path.display(), %err, "Skipping unreadable entry");
                        continue;
                    }
                };

                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                if path.extension().is_some_and(|ext| ext == SESSION_EXTENSION) {
                    match metadata.modified() {
                        Ok(modified) => {
                            let mtime: DateTime<Utc> = modified.into();
                            files.push(SessionFile { path, mtime });
                        }
                        Err(err) => {
                            warn!(path = %path.display(), %err, "Skipping file without mtime");
                        }
                    }
                }
            }
        }

        // Deterministic listing regardless of directory iteration order.
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

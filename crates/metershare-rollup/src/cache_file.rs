//! Read-only adapter over the collaborator's session-stats cache file
//!
//! The session-file scanner owns a JSON cache of pre-parsed per-file
//! statistics, keyed by path with the modification time the stats were
//! parsed at. This subsystem consumes it strictly read-only, which is
//! what avoids a write race with the scanner. A stale or missing entry
//! is reported as an error per file; the builder skips such files and
//! the scanner repopulates the cache before the next cycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use metershare_core::ports::session_cache::{
    CachedLookup, ISessionStatsCache, ModelTokens, SessionStats,
};

/// One cached file entry as the scanner writes it
#[derive(Debug, Clone, Deserialize)]
struct CacheFileEntry {
    interactions: u64,
    mtime: DateTime<Utc>,
    #[serde(default)]
    model_usage: HashMap<String, CachedTokens>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct CachedTokens {
    input_tokens: u64,
    output_tokens: u64,
}

/// Read-only view of the scanner's stats cache file
pub struct StatsCacheFile {
    path: PathBuf,
    entries: Mutex<Option<HashMap<PathBuf, CacheFileEntry>>>,
}

impl StatsCacheFile {
    /// Creates a view over the cache file at `path`
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: Mutex::new(None),
        }
    }

    /// Default cache file location, owned by the scanner
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("metershare")
            .join("session-stats.json")
    }

    fn load(&self) -> Result<HashMap<PathBuf, CacheFileEntry>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read stats cache: {}", self.path.display()))?;
        let entries: HashMap<PathBuf, CacheFileEntry> =
            serde_json::from_str(&content).context("Malformed stats cache file")?;
        debug!(entries = entries.len(), "Loaded session stats cache");
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl ISessionStatsCache for StatsCacheFile {
    async fn fetch(&self, path: &Path, mtime: DateTime<Utc>) -> Result<CachedLookup> {
        let mut guard = self.entries.lock().expect("cache mutex poisoned");
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let entries = guard.as_ref().expect("cache loaded above");

        let Some(entry) = entries.get(path) else {
            bail!("no cached stats for {}", path.display());
        };
        if entry.mtime != mtime {
            // The scanner has not re-parsed this file yet; skip it this
            // cycle rather than report stale totals.
            bail!(
                "cached stats for {} are stale (cached {}, file {})",
                path.display(),
                entry.mtime,
                mtime
            );
        }

        let model_usage = entry
            .model_usage
            .iter()
            .map(|(model, tokens)| {
                (
                    model.clone(),
                    ModelTokens {
                        input_tokens: tokens.input_tokens,
                        output_tokens: tokens.output_tokens,
                    },
                )
            })
            .collect();

        Ok(CachedLookup {
            stats: SessionStats {
                interactions: entry.interactions,
                model_usage,
                mtime: entry.mtime,
            },
            cache_hit: true,
        })
    }
}

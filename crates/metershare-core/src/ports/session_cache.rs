//! Session statistics ports (driven/secondary ports)
//!
//! The per-file session-stats cache is owned by an external collaborator
//! (the session-file scanner); this subsystem reads it through
//! [`ISessionStatsCache`] and never writes to it, which is what avoids a
//! write race between the sync engine and the scanner. A cache miss is
//! the collaborator's problem: it parses the file, populates its cache,
//! and still returns the stats - the rollup builder only learns whether
//! the lookup was a hit, for observability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Token totals for one model within one session file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelTokens {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Pre-parsed statistics for one session file
///
/// This is a port-level DTO owned by the collaborator contract; the
/// rollup builder consumes `model_usage` and treats the rest as opaque.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Interaction count as recorded by the parser
    pub interactions: u64,
    /// Per-model token totals
    pub model_usage: HashMap<String, ModelTokens>,
    /// Modification time the stats were parsed at
    pub mtime: DateTime<Utc>,
}

/// A cache lookup result, reporting whether it was served from cache
#[derive(Debug, Clone)]
pub struct CachedLookup {
    pub stats: SessionStats,
    pub cache_hit: bool,
}

/// Port trait for the externally owned per-file stats cache
#[async_trait::async_trait]
pub trait ISessionStatsCache: Send + Sync {
    /// Fetches stats for `path` at `mtime`. A hit returns precomputed
    /// data; a miss makes the collaborator reparse and repopulate before
    /// returning. Either way the caller gets stats.
    async fn fetch(&self, path: &Path, mtime: DateTime<Utc>) -> anyhow::Result<CachedLookup>;
}

/// One local session file candidate for the rollup pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFile {
    pub path: PathBuf,
    pub mtime: DateTime<Utc>,
}

/// Port trait for enumerating local session files
#[async_trait::async_trait]
pub trait ISessionSource: Send + Sync {
    /// Lists candidate session files with their modification times.
    /// Unreadable entries are skipped, never fatal.
    async fn session_files(&self) -> anyhow::Result<Vec<SessionFile>>;
}

//! Centralized configuration for socdata-core.
//!
//! Config resolution (files, environment) lives outside the crate; only the
//! resolved values cross in here, plus the on-disk name constants every
//! component agrees on.

use std::path::PathBuf;
use std::time::Duration;

/// On-disk cache layout names.
///
/// Entry layout: `{root}/{source}/{dataset}/{version}/{raw|processed|meta}`.
pub struct CacheLayout;

impl CacheLayout {
    pub const RAW_DIR_NAME: &'static str = "raw";
    pub const PROCESSED_DIR_NAME: &'static str = "processed";
    pub const META_DIR_NAME: &'static str = "meta";
    pub const MANIFEST_FILE_NAME: &'static str = "manifest.json";
    pub const PROCESSED_FILE_NAME: &'static str = "data.sdt";
    pub const INDEX_FILE_NAME: &'static str = "search_index.db";
    pub const DEFAULT_CACHE_DIR_NAME: &'static str = ".socdata";
}

/// Default version tag for datasets ingested without an explicit version.
pub const DEFAULT_VERSION: &str = "latest";

/// Default result cap for search queries.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Resolved configuration values consumed by the core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root directory of the dataset cache.
    pub cache_root: PathBuf,
    /// Time-to-live applied to cache entries at read time.
    pub ttl: Duration,
    /// Whether the full-text search engine may be used.
    pub fulltext_enabled: bool,
}

impl CoreConfig {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Config rooted at an explicit cache directory, other values default.
    pub fn with_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fulltext(mut self, enabled: bool) -> Self {
        self.fulltext_enabled = enabled;
        self
    }

    /// Path of the search index database under the cache root.
    pub fn index_path(&self) -> PathBuf {
        self.cache_root.join(CacheLayout::INDEX_FILE_NAME)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let cache_root = dirs::home_dir()
            .map(|home| home.join(CacheLayout::DEFAULT_CACHE_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(CacheLayout::DEFAULT_CACHE_DIR_NAME));
        Self {
            cache_root,
            ttl: Self::DEFAULT_TTL,
            fulltext_enabled: true,
        }
    }
}

//! Cache lifecycle for normalized datasets.
//!
//! One entry per `{root}/{source}/{dataset}/{version}`, each holding three
//! subdirectories: `raw` keeps the bytes as fetched, `processed` the
//! normalized columnar file, `meta` the manifest. The manifest write is the
//! commit point: an entry without one is invisible to validity checks, so a
//! crash mid-write never yields a readable half-entry.
//!
//! Entries are guarded by per-path locks, so writers of different datasets
//! do not serialize behind each other.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{CacheLayout, CoreConfig};
use crate::error::{Result, SocDataError};
use crate::manifest::atomic::staging_path;
use crate::manifest::Manifest;
use crate::table::{codec, ColumnarTable};
use crate::types::{DatasetId, Filters};

/// The three subdirectories of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStage {
    Raw,
    Processed,
    Meta,
}

impl CacheStage {
    fn dir_name(self) -> &'static str {
        match self {
            CacheStage::Raw => CacheLayout::RAW_DIR_NAME,
            CacheStage::Processed => CacheLayout::PROCESSED_DIR_NAME,
            CacheStage::Meta => CacheLayout::META_DIR_NAME,
        }
    }
}

/// Raw source bytes stored next to the processed file for provenance.
#[derive(Debug, Clone)]
pub struct RawPayload {
    /// File name under the entry's `raw` directory.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Receiver for cache lifecycle events, implemented by the search index.
///
/// A trait seam rather than a direct dependency: the cache never needs to
/// know how indexing works, and tests can record calls.
pub trait IndexSink: Send + Sync {
    fn index_manifest(&self, manifest: &Manifest) -> Result<()>;
    fn remove_dataset(&self, id: &str) -> Result<()>;
}

/// Manager for the on-disk dataset cache.
pub struct CacheManager {
    root: PathBuf,
    ttl: Duration,
    /// One lock per entry path.
    entry_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    sink: Option<Arc<dyn IndexSink>>,
}

impl CacheManager {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            root: config.cache_root.clone(),
            ttl: config.ttl,
            entry_locks: Mutex::new(HashMap::new()),
            sink: None,
        }
    }

    /// Attach an index sink notified after writes and removals.
    pub fn with_index_sink(mut self, sink: Arc<dyn IndexSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // ========================================
    // Path helpers
    // ========================================

    /// Directory of one cache entry.
    pub fn entry_path(&self, id: &DatasetId, version: &str) -> PathBuf {
        self.root.join(&id.source).join(&id.code).join(version)
    }

    /// Stage directory within an entry.
    pub fn resolve_path(&self, id: &DatasetId, version: &str, stage: CacheStage) -> PathBuf {
        self.entry_path(id, version).join(stage.dir_name())
    }

    pub fn manifest_path(&self, id: &DatasetId, version: &str) -> PathBuf {
        self.resolve_path(id, version, CacheStage::Meta)
            .join(CacheLayout::MANIFEST_FILE_NAME)
    }

    pub fn processed_path(&self, id: &DatasetId, version: &str) -> PathBuf {
        self.resolve_path(id, version, CacheStage::Processed)
            .join(CacheLayout::PROCESSED_FILE_NAME)
    }

    // ========================================
    // Validity
    // ========================================

    /// True when the entry has a parseable manifest, its processed file
    /// exists, and its age is strictly under the TTL. Any inspection error
    /// counts as invalid.
    pub fn is_valid(&self, id: &DatasetId, version: &str) -> bool {
        match self.read_manifest(id, version) {
            Ok(Some(manifest)) => {
                manifest.age() < self.ttl && self.processed_path(id, version).exists()
            }
            _ => false,
        }
    }

    /// Like [`is_valid`](Self::is_valid) but ignoring the TTL; used to serve
    /// stale data when a refresh is impossible.
    pub fn is_readable(&self, id: &DatasetId, version: &str) -> bool {
        matches!(self.read_manifest(id, version), Ok(Some(_)))
            && self.processed_path(id, version).exists()
    }

    /// Age of the entry, when a manifest exists.
    pub fn entry_age(&self, id: &DatasetId, version: &str) -> Option<Duration> {
        self.read_manifest(id, version)
            .ok()
            .flatten()
            .map(|manifest| manifest.age())
    }

    pub fn read_manifest(&self, id: &DatasetId, version: &str) -> Result<Option<Manifest>> {
        Manifest::load(&self.manifest_path(id, version))
    }

    // ========================================
    // Reads
    // ========================================

    /// Read the processed table, optionally projecting columns.
    pub fn read_processed(
        &self,
        id: &DatasetId,
        version: &str,
        columns: Option<&[String]>,
    ) -> Result<ColumnarTable> {
        let path = self.processed_path(id, version);
        match columns {
            Some(names) => codec::read_columns(&path, names),
            None => codec::read_table(&path),
        }
    }

    /// Read the processed table with row filters pushed into the codec.
    pub fn read_processed_filtered(
        &self,
        id: &DatasetId,
        version: &str,
        filters: &Filters,
    ) -> Result<ColumnarTable> {
        codec::read_table_filtered(&self.processed_path(id, version), filters)
    }

    // ========================================
    // Writes
    // ========================================

    /// Store a normalized table and commit it with its manifest.
    ///
    /// Write order: raw bytes first, the processed file staged and renamed
    /// next, the manifest last. The raw payload's sha256 and the written
    /// table's dimensions are filled into the returned manifest. Index sink
    /// failures are logged, not propagated; a dataset that cached fine but
    /// did not index is still usable.
    pub fn write(
        &self,
        mut manifest: Manifest,
        table: &ColumnarTable,
        raw: Option<&RawPayload>,
    ) -> Result<Manifest> {
        let id = DatasetId {
            source: manifest.source.clone(),
            code: manifest.dataset.clone(),
        };
        let entry = self.entry_path(&id, &manifest.version);
        let lock = self.entry_lock(&entry)?;
        let _guard = lock
            .lock()
            .map_err(|_| poisoned_lock(&entry))?;

        for stage in [CacheStage::Raw, CacheStage::Processed, CacheStage::Meta] {
            let dir = entry.join(stage.dir_name());
            fs::create_dir_all(&dir).map_err(|e| SocDataError::cache_write(e, &dir))?;
        }

        if let Some(raw) = raw {
            let raw_path = self
                .resolve_path(&id, &manifest.version, CacheStage::Raw)
                .join(&raw.name);
            fs::write(&raw_path, &raw.bytes)
                .map_err(|e| SocDataError::cache_write(e, &raw_path))?;
            manifest.checksum = Some(hex::encode(Sha256::digest(&raw.bytes)));
        }

        let processed = self.processed_path(&id, &manifest.version);
        let staging = staging_path(&processed, "sdt");
        codec::write_table(&staging, table)?;
        fs::rename(&staging, &processed)
            .map_err(|e| SocDataError::cache_write(e, &processed))?;

        manifest.row_count = table.row_count() as u64;
        manifest.column_count = table.column_count() as u64;
        manifest.save(&self.manifest_path(&id, &manifest.version))?;
        debug!(
            "cached {} version {} ({} rows, {} columns)",
            manifest.dataset_id(),
            manifest.version,
            manifest.row_count,
            manifest.column_count
        );

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.index_manifest(&manifest) {
                warn!("indexing {} failed: {}", manifest.dataset_id(), err);
            }
        }
        Ok(manifest)
    }

    /// Remove one entry wholesale. Returns whether anything was deleted.
    ///
    /// The index sink is told to drop the dataset even when the entry was
    /// already gone, so a stale index row cannot outlive its entry.
    pub fn invalidate(&self, id: &DatasetId, version: &str) -> Result<bool> {
        let entry = self.entry_path(id, version);
        let lock = self.entry_lock(&entry)?;
        let _guard = lock
            .lock()
            .map_err(|_| poisoned_lock(&entry))?;

        let existed = entry.exists();
        if existed {
            fs::remove_dir_all(&entry).map_err(|e| SocDataError::io_with_path(e, &entry))?;
            debug!("invalidated {} version {}", id, version);
        }
        if let Some(sink) = &self.sink {
            sink.remove_dataset(&id.to_string())?;
        }
        Ok(existed)
    }

    /// Delete every entry whose age reached the TTL. Returns how many were
    /// removed. Entries without a parseable manifest are left alone.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for (id, version) in self.walk_entries()? {
            match self.read_manifest(&id, &version) {
                Ok(Some(manifest)) if manifest.age() >= self.ttl => {
                    if self.invalidate(&id, &version)? {
                        removed += 1;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => debug!("no manifest for {} version {}, skipping", id, version),
                Err(err) => warn!("unreadable manifest for {} version {}: {}", id, version, err),
            }
        }
        Ok(removed)
    }

    /// Every currently valid manifest under the root, oldest first. This is
    /// the input for index rebuilds.
    pub fn valid_manifests(&self) -> Result<Vec<Manifest>> {
        let mut manifests = Vec::new();
        for (id, version) in self.walk_entries()? {
            if let Ok(Some(manifest)) = self.read_manifest(&id, &version) {
                if manifest.age() < self.ttl && self.processed_path(&id, &version).exists() {
                    manifests.push(manifest);
                }
            }
        }
        manifests.sort_by_key(|manifest| manifest.ingested_at);
        Ok(manifests)
    }

    // ========================================
    // Internals
    // ========================================

    fn entry_lock(&self, entry: &Path) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .entry_locks
            .lock()
            .map_err(|_| poisoned_lock(entry))?;
        Ok(locks.entry(entry.to_path_buf()).or_default().clone())
    }

    /// Entry directories at exactly `{source}/{dataset}/{version}` depth.
    fn walk_entries(&self) -> Result<Vec<(DatasetId, String)>> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf);
                    let message = err.to_string();
                    return Err(SocDataError::Io {
                        message,
                        path,
                        source: err.into_io_error(),
                    });
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(identity) = self.entry_identity(entry.path()) {
                entries.push(identity);
            }
        }
        Ok(entries)
    }

    fn entry_identity(&self, path: &Path) -> Option<(DatasetId, String)> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts = rel.iter();
        let source = parts.next()?.to_str()?.to_string();
        let code = parts.next()?.to_str()?.to_string();
        let version = parts.next()?.to_str()?.to_string();
        Some((DatasetId { source, code }, version))
    }
}

fn poisoned_lock(entry: &Path) -> SocDataError {
    SocDataError::CacheWrite {
        message: "cache entry lock is poisoned".to_string(),
        path: Some(entry.to_path_buf()),
        source: None,
    }
}

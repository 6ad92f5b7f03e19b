//! SQLite search index over cached dataset manifests.
//!
//! The index is a single database file under the cache root with one row per
//! dataset plus a `variables` table for per-variable filtering. When the
//! SQLite build ships FTS5 (the bundled one does), searches run through a
//! ranked full-text table; otherwise they fall back to `LIKE` substring
//! scans over the same columns, so search results differ only in ranking,
//! never in membership.
//!
//! The index is derivative: the manifests on disk are the source of truth,
//! and a corrupt index file is recreated empty and flagged for a rebuild
//! instead of failing the open.

mod fts5;
mod query;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, ToSql, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::IndexSink;
use crate::config::CoreConfig;
use crate::error::{Result, SocDataError};
use crate::manifest::atomic::staging_path;
use crate::manifest::Manifest;
use crate::types::DatasetSummary;

// ========================================
// Types
// ========================================

/// Which query engine the index runs on. Fixed when the index is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// FTS5 virtual table with ranked matching.
    Fulltext,
    /// `LIKE` substring scans, used when FTS5 is unavailable or disabled.
    Substring,
}

/// Everything the index holds about one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub source: String,
    pub title: Option<String>,
    pub row_count: u64,
    pub column_count: u64,
    pub ingested_at: DateTime<Utc>,
    pub variable_labels: BTreeMap<String, String>,
    pub value_labels: BTreeMap<String, BTreeMap<String, String>>,
}

/// Search index handle. Cheap to share behind an `Arc`; all access goes
/// through one connection guarded by a mutex.
pub struct SearchIndex {
    db_path: PathBuf,
    conn: Mutex<Connection>,
    backend: Backend,
    needs_rebuild: AtomicBool,
}

// ========================================
// Open and schema
// ========================================

impl SearchIndex {
    /// Open (or create) the index file under the configured cache root.
    pub fn open(config: &CoreConfig) -> Result<Self> {
        Self::open_at(&config.index_path(), config.fulltext_enabled)
    }

    /// Open an index at an explicit path.
    ///
    /// A file SQLite refuses to read is deleted along with its WAL siblings
    /// and recreated empty; the index then reports [`needs_rebuild`] until
    /// the manifests are replayed into it.
    ///
    /// [`needs_rebuild`]: SearchIndex::needs_rebuild
    pub fn open_at(db_path: &Path, fulltext_enabled: bool) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SocDataError::io_with_path(e, parent))?;
        }

        let mut recovered = false;
        let conn = match Self::open_configured(db_path) {
            Ok(conn) => conn,
            Err(err) if is_corrupt(&err) => {
                warn!(
                    "search index at {} is unreadable ({}), recreating it empty",
                    db_path.display(),
                    err
                );
                remove_database_files(db_path)?;
                recovered = true;
                Self::open_configured(db_path)?
            }
            Err(err) => return Err(err),
        };

        let backend = if fulltext_enabled && fts5::fts5_available(&conn) {
            Backend::Fulltext
        } else {
            if fulltext_enabled {
                info!("FTS5 unavailable in this SQLite build, using substring search");
            }
            Backend::Substring
        };
        Self::ensure_schema(&conn, backend)?;
        debug!(
            "search index open at {} ({:?} backend)",
            db_path.display(),
            backend
        );

        Ok(Self {
            db_path: db_path.to_path_buf(),
            conn: Mutex::new(conn),
            backend,
            needs_rebuild: AtomicBool::new(recovered),
        })
    }

    fn open_configured(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)?;
        // The pragmas double as a read probe: a corrupt file fails here
        // rather than on first query.
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Ok(conn)
    }

    fn ensure_schema(conn: &Connection, backend: Backend) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                title TEXT,
                variable_names TEXT NOT NULL,
                variable_labels TEXT NOT NULL,
                value_labels TEXT NOT NULL,
                value_labels_json TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                column_count INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS variables (
                dataset_id TEXT NOT NULL,
                name TEXT NOT NULL,
                label TEXT NOT NULL,
                PRIMARY KEY (dataset_id, name)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_datasets_source ON datasets(source)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_variables_name ON variables(name)",
            [],
        )?;
        if backend == Backend::Fulltext {
            fts5::ensure_setup(conn)?;
        }
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SocDataError::Database {
            message: "search index connection lock is poisoned".to_string(),
            source: None,
        })
    }

    /// The query engine this index was opened with.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// True when the index file was recreated after corruption and the
    /// manifests have not been replayed into it yet.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::Relaxed)
    }
}

// ========================================
// Writes
// ========================================

impl SearchIndex {
    /// Insert or refresh one dataset from its manifest.
    pub fn index(&self, manifest: &Manifest) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        Self::index_in_tx(&tx, manifest)?;
        tx.commit()?;
        debug!("indexed {}", manifest.dataset_id());
        Ok(())
    }

    fn index_in_tx(tx: &Transaction<'_>, manifest: &Manifest) -> Result<()> {
        let id = manifest.dataset_id();
        let variable_names = manifest.column_names().collect::<Vec<_>>().join(" ");
        let variable_labels_text = manifest
            .variable_labels
            .values()
            .filter(|label| !label.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let value_labels_text = flatten_value_labels(&manifest.value_labels);
        let value_labels_json = serde_json::to_string(&manifest.value_labels)?;

        // The upsert keeps the existing rowid, so the insertion-order
        // fallback ranking is stable across re-ingests.
        tx.execute(
            "INSERT INTO datasets (id, source, title, variable_names, variable_labels,
                                   value_labels, value_labels_json, row_count, column_count,
                                   ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 source = excluded.source,
                 title = excluded.title,
                 variable_names = excluded.variable_names,
                 variable_labels = excluded.variable_labels,
                 value_labels = excluded.value_labels,
                 value_labels_json = excluded.value_labels_json,
                 row_count = excluded.row_count,
                 column_count = excluded.column_count,
                 ingested_at = excluded.ingested_at",
            params![
                id,
                manifest.source,
                manifest.title,
                variable_names,
                variable_labels_text,
                value_labels_text,
                value_labels_json,
                manifest.row_count as i64,
                manifest.column_count as i64,
                manifest.ingested_at.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM variables WHERE dataset_id = ?1", params![id])?;
        let mut stmt =
            tx.prepare("INSERT INTO variables (dataset_id, name, label) VALUES (?1, ?2, ?3)")?;
        for (name, label) in &manifest.variable_labels {
            stmt.execute(params![id, name, label])?;
        }
        Ok(())
    }

    /// Remove a dataset and its variables. Returns whether a row existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM variables WHERE dataset_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM datasets WHERE id = ?1", params![id])?;
        tx.commit()?;
        if rows > 0 {
            debug!("removed {} from the search index", id);
        }
        Ok(rows > 0)
    }

    /// Drop every indexed dataset.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch("DELETE FROM variables; DELETE FROM datasets;")?;
        Ok(())
    }

    /// Rebuild the index from scratch out of the given manifests.
    ///
    /// The replacement database is staged as a sibling file and swapped in
    /// with a rename, so a crash mid-rebuild leaves the live index intact.
    /// Returns the number of datasets indexed.
    pub fn rebuild(&self, manifests: &[Manifest]) -> Result<usize> {
        let staging = staging_path(&self.db_path, "db");
        remove_database_files(&staging)?;

        {
            let mut conn = Connection::open(&staging)?;
            Self::ensure_schema(&conn, self.backend)?;
            let tx = conn.transaction()?;
            for manifest in manifests {
                Self::index_in_tx(&tx, manifest)?;
            }
            tx.commit()?;
        }

        let mut guard = self.lock_conn()?;
        // Close the live connection before the rename; the in-memory
        // stand-in keeps the slot usable if reopening fails midway.
        *guard = Connection::open_in_memory()?;
        remove_database_files(&self.db_path)?;
        fs::rename(&staging, &self.db_path)
            .map_err(|e| SocDataError::io_with_path(e, &self.db_path))?;
        *guard = Self::open_configured(&self.db_path)?;
        Self::ensure_schema(&guard, self.backend)?;
        self.needs_rebuild.store(false, Ordering::Relaxed);

        info!("rebuilt search index with {} datasets", manifests.len());
        Ok(manifests.len())
    }
}

// ========================================
// Queries
// ========================================

impl SearchIndex {
    /// Search datasets by free text over titles, identifiers, variable
    /// names and labels, and value labels.
    ///
    /// `source` restricts hits to one adapter prefix and `variable` to
    /// datasets containing the named variable (case-insensitive). An empty
    /// query lists indexed datasets in ingestion order. At most `limit`
    /// results are returned.
    pub fn search(
        &self,
        text: &str,
        source: Option<&str>,
        variable: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DatasetSummary>> {
        let cleaned = text.trim();
        let conn = self.lock_conn()?;
        if cleaned.is_empty() {
            return Self::list_all(&conn, source, variable, limit);
        }
        match self.backend {
            Backend::Fulltext => Self::search_fulltext(&conn, cleaned, source, variable, limit),
            Backend::Substring => Self::search_substring(&conn, cleaned, source, variable, limit),
        }
    }

    /// Full metadata for one indexed dataset.
    pub fn get_dataset_info(&self, id: &str) -> Result<Option<DatasetInfo>> {
        let conn = self.lock_conn()?;
        let info = conn
            .query_row(
                "SELECT id, source, title, row_count, column_count, ingested_at,
                        value_labels_json
                 FROM datasets WHERE id = ?1",
                params![id],
                row_to_info,
            )
            .optional()?;
        let Some(mut info) = info else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT name, label FROM variables WHERE dataset_id = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (name, label) = row?;
            info.variable_labels.insert(name, label);
        }
        Ok(Some(info))
    }

    /// Number of indexed datasets.
    pub fn len(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM datasets", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Tiered full-text search: exact phrase first, then prefix matches,
    /// then any-token matches, deduplicated in that order.
    fn search_fulltext(
        conn: &Connection,
        text: &str,
        source: Option<&str>,
        variable: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DatasetSummary>> {
        let tiers = [
            query::phrase_query(text),
            query::prefix_query(text),
            query::token_query(text),
        ];
        let mut hits: Vec<DatasetSummary> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for tier in &tiers {
            if tier.is_empty() || hits.len() >= limit {
                continue;
            }
            let tier_hits = match Self::run_match(conn, tier, source, variable, limit) {
                Ok(tier_hits) => tier_hits,
                Err(err) => {
                    warn!("full-text tier {:?} failed: {}", tier, err);
                    continue;
                }
            };
            for hit in tier_hits {
                if hits.len() >= limit {
                    break;
                }
                if seen.insert(hit.id.clone()) {
                    hits.push(hit);
                }
            }
        }
        Ok(hits)
    }

    fn run_match(
        conn: &Connection,
        match_query: &str,
        source: Option<&str>,
        variable: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DatasetSummary>> {
        let mut bound: Vec<Box<dyn ToSql>> = vec![Box::new(match_query.to_string())];
        let filters = filter_clause(source, variable, &mut bound);
        bound.push(Box::new(limit as i64));
        let sql = format!(
            "SELECT d.id, d.source, d.title
             FROM {search} s JOIN datasets d ON s.rowid = d.rowid
             WHERE {search} MATCH ?{filters}
             ORDER BY rank, d.id ASC
             LIMIT ?",
            search = fts5::SEARCH_TABLE,
        );
        Self::run_summaries(conn, &sql, &bound)
    }

    /// Substring fallback: `LIKE` over the same columns FTS5 indexes, in
    /// ingestion order.
    fn search_substring(
        conn: &Connection,
        text: &str,
        source: Option<&str>,
        variable: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DatasetSummary>> {
        let pattern = query::like_pattern(text);
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        let like = [
            "d.id",
            "d.source",
            "d.title",
            "d.variable_names",
            "d.variable_labels",
            "d.value_labels",
        ]
        .iter()
        .map(|column| {
            bound.push(Box::new(pattern.clone()));
            format!("{column} LIKE ? ESCAPE '\\'")
        })
        .collect::<Vec<_>>()
        .join(" OR ");
        let filters = filter_clause(source, variable, &mut bound);
        bound.push(Box::new(limit as i64));
        let sql = format!(
            "SELECT d.id, d.source, d.title FROM datasets d
             WHERE ({like}){filters}
             ORDER BY d.rowid ASC
             LIMIT ?"
        );
        Self::run_summaries(conn, &sql, &bound)
    }

    fn list_all(
        conn: &Connection,
        source: Option<&str>,
        variable: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DatasetSummary>> {
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        let filters = filter_clause(source, variable, &mut bound);
        bound.push(Box::new(limit as i64));
        let sql = format!(
            "SELECT d.id, d.source, d.title FROM datasets d
             WHERE 1=1{filters}
             ORDER BY d.rowid ASC
             LIMIT ?"
        );
        Self::run_summaries(conn, &sql, &bound)
    }

    fn run_summaries(
        conn: &Connection,
        sql: &str,
        bound: &[Box<dyn ToSql>],
    ) -> Result<Vec<DatasetSummary>> {
        let mut stmt = conn.prepare(sql)?;
        let refs: Vec<&dyn ToSql> = bound.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), row_to_summary)?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }
}

impl IndexSink for SearchIndex {
    fn index_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.index(manifest)
    }

    fn remove_dataset(&self, id: &str) -> Result<()> {
        self.delete(id).map(|_| ())
    }
}

// ========================================
// Helpers
// ========================================

/// Append `AND` filter fragments for the optional source and variable
/// restrictions, pushing their bindings in order.
fn filter_clause(
    source: Option<&str>,
    variable: Option<&str>,
    bound: &mut Vec<Box<dyn ToSql>>,
) -> String {
    let mut clause = String::new();
    if let Some(source) = source {
        clause.push_str(" AND d.source = ?");
        bound.push(Box::new(source.to_string()));
    }
    if let Some(variable) = variable {
        clause.push_str(
            " AND EXISTS (SELECT 1 FROM variables v
                          WHERE v.dataset_id = d.id AND v.name = ? COLLATE NOCASE)",
        );
        bound.push(Box::new(variable.to_string()));
    }
    clause
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<DatasetSummary> {
    let id: String = row.get(0)?;
    let source: String = row.get(1)?;
    let title: Option<String> = row.get(2)?;
    Ok(DatasetSummary {
        title: title.unwrap_or_else(|| id.clone()),
        id,
        source,
    })
}

fn row_to_info(row: &Row<'_>) -> rusqlite::Result<DatasetInfo> {
    let row_count: i64 = row.get(3)?;
    let column_count: i64 = row.get(4)?;
    let ingested_at: String = row.get(5)?;
    let value_labels_json: String = row.get(6)?;
    Ok(DatasetInfo {
        id: row.get(0)?,
        source: row.get(1)?,
        title: row.get(2)?,
        row_count: row_count.max(0) as u64,
        column_count: column_count.max(0) as u64,
        ingested_at: DateTime::parse_from_rfc3339(&ingested_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        variable_labels: BTreeMap::new(),
        value_labels: serde_json::from_str(&value_labels_json).unwrap_or_default(),
    })
}

/// Flatten the nested value-label maps into one searchable text blob.
fn flatten_value_labels(value_labels: &BTreeMap<String, BTreeMap<String, String>>) -> String {
    let mut parts = Vec::new();
    for labels in value_labels.values() {
        for label in labels.values() {
            parts.push(label.as_str());
        }
    }
    parts.join(" ")
}

fn is_corrupt(err: &SocDataError) -> bool {
    match err {
        SocDataError::Database {
            source: Some(rusqlite::Error::SqliteFailure(code, _)),
            ..
        } => matches!(
            code.code,
            ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt
        ),
        _ => false,
    }
}

/// Remove a database file together with its `-wal` and `-shm` siblings.
fn remove_database_files(db_path: &Path) -> Result<()> {
    for path in [
        db_path.to_path_buf(),
        sibling(db_path, "-wal"),
        sibling(db_path, "-shm"),
    ] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(SocDataError::io_with_path(err, &path)),
        }
    }
    Ok(())
}

fn sibling(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

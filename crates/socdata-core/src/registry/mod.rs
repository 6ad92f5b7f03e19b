//! Adapter registry: the entry point tying sources, normalization, the
//! cache, and the search index together.
//!
//! A registry is an explicit value built at startup and passed by
//! reference; there is no global instance. Construction wires the search
//! index into the cache as its index sink, so every committed write lands
//! in the index without the call sites knowing about it.
//!
//! `load` prefers the cache: a valid entry is read directly with filters
//! pushed into the codec. On a miss or an expired entry it fetches through
//! the adapter, normalizes, and caches. When the refresh fails but an
//! expired entry is still readable, the entry is served as
//! [`Freshness::Stale`] with a warning instead of failing the call.

mod adapter;
mod manual;

pub use adapter::{FetchCapability, FetchPayload, IngestRecipe, SourceAdapter};
pub use manual::{ManualAdapter, MANUAL_SOURCE};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::{CacheManager, IndexSink, RawPayload};
use crate::config::{CoreConfig, DEFAULT_SEARCH_LIMIT, DEFAULT_VERSION};
use crate::error::{Result, SocDataError, Stage};
use crate::index::{DatasetInfo, SearchIndex};
use crate::manifest::Manifest;
use crate::normalize::{self, Normalized};
use crate::table::ColumnarTable;
use crate::types::{DatasetId, DatasetSummary, Filters, Freshness};

/// Raw input accepted by [`AdapterRegistry::ingest`].
#[derive(Debug, Clone)]
pub enum IngestInput {
    /// In-memory bytes with an optional file name for format sniffing.
    Bytes {
        bytes: Vec<u8>,
        name_hint: Option<String>,
    },
    /// Local file. The source adapter's ingest recipe is applied when it
    /// declares one, otherwise the file is read as-is.
    Path(PathBuf),
}

/// Table plus freshness marker returned by [`AdapterRegistry::load`].
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub table: ColumnarTable,
    pub freshness: Freshness,
}

/// Maps dataset id prefixes to source adapters and runs the load/ingest
/// pipelines against one cache root.
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn SourceAdapter>>,
    cache: CacheManager,
    index: Arc<SearchIndex>,
}

impl AdapterRegistry {
    /// Build a registry over the configured cache root. The built-in
    /// [`ManualAdapter`] is registered under [`MANUAL_SOURCE`].
    pub fn new(config: &CoreConfig) -> Result<Self> {
        let index = Arc::new(SearchIndex::open(config)?);
        let sink: Arc<dyn IndexSink> = index.clone();
        let cache = CacheManager::new(config).with_index_sink(sink);
        let mut registry = Self {
            adapters: HashMap::new(),
            cache,
            index,
        };
        registry.register(MANUAL_SOURCE, Box::new(ManualAdapter::new()))?;
        Ok(registry)
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn search_index(&self) -> &SearchIndex {
        &self.index
    }

    // ========================================
    // Registration and resolution
    // ========================================

    /// Register an adapter under a source prefix. Replacing an existing
    /// registration is allowed and logged.
    pub fn register(
        &mut self,
        source: impl Into<String>,
        adapter: Box<dyn SourceAdapter>,
    ) -> Result<()> {
        let source = source.into();
        let invalid = |source: String, reason: &str| SocDataError::InvalidAdapter {
            source,
            reason: reason.to_string(),
        };
        if source.is_empty() {
            return Err(invalid(source, "source prefix must not be empty"));
        }
        if source.contains([':', '/', '\\']) {
            return Err(invalid(
                source,
                "source prefix must not contain ':' or path separators",
            ));
        }
        if adapter.fetch().is_none() && adapter.ingest_recipe().is_none() {
            return Err(invalid(
                source,
                "adapter declares neither fetch nor ingest capability",
            ));
        }
        if self.adapters.insert(source.clone(), adapter).is_some() {
            warn!("replaced the adapter registered for source '{}'", source);
        }
        Ok(())
    }

    fn resolve(&self, source: &str) -> Result<&dyn SourceAdapter> {
        self.adapters
            .get(source)
            .map(|adapter| adapter.as_ref())
            .ok_or_else(|| SocDataError::AdapterNotFound {
                source: source.to_string(),
            })
    }

    /// Datasets known to registered adapters, one source or all of them.
    /// Aggregation order is by source prefix.
    pub fn list_datasets(&self, source: Option<&str>) -> Result<Vec<DatasetSummary>> {
        match source {
            Some(source) => Ok(self.resolve(source)?.list_datasets()),
            None => {
                let mut entries: Vec<_> = self.adapters.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut all = Vec::new();
                for (_, adapter) in entries {
                    all.extend(adapter.list_datasets());
                }
                Ok(all)
            }
        }
    }

    // ========================================
    // Load
    // ========================================

    /// Load the default version of a dataset, fetching and caching on miss.
    pub fn load(&self, id: &str, filters: &Filters) -> Result<LoadResult> {
        self.load_version(id, DEFAULT_VERSION, filters)
    }

    /// Load one version of a dataset.
    ///
    /// A valid cache entry is read directly with the filters pushed into
    /// the columnar codec. Otherwise the dataset is refreshed through its
    /// adapter; if that fails and an expired entry is still readable, the
    /// stale entry is served with a warning.
    pub fn load_version(&self, id: &str, version: &str, filters: &Filters) -> Result<LoadResult> {
        let parsed = DatasetId::parse(id)?;

        if self.cache.is_valid(&parsed, version) {
            debug!("serving {} version {} from cache", parsed, version);
            let table = self
                .cache
                .read_processed_filtered(&parsed, version, filters)
                .map_err(|err| err.at_stage(id, Stage::Read))?;
            return Ok(LoadResult {
                table,
                freshness: Freshness::Fresh,
            });
        }

        match self.refresh(&parsed, version, filters) {
            Ok(result) => Ok(result),
            Err(err) => self.degrade_to_stale(&parsed, version, filters, err),
        }
    }

    /// Fetch through the adapter, normalize, and rewrite the cache entry.
    fn refresh(&self, id: &DatasetId, version: &str, filters: &Filters) -> Result<LoadResult> {
        let dataset = id.to_string();
        let adapter = self
            .resolve(&id.source)
            .map_err(|err| err.at_stage(&dataset, Stage::Fetch))?;
        let fetcher = adapter.fetch().ok_or_else(|| {
            SocDataError::DatasetNotFound {
                id: dataset.clone(),
            }
            .at_stage(&dataset, Stage::Fetch)
        })?;
        let payload = fetcher
            .fetch(&id.code, filters)
            .map_err(|err| err.at_stage(&dataset, Stage::Fetch))?;

        let (normalized, raw) = match payload {
            FetchPayload::Raw { bytes, name_hint } => {
                let normalized = normalize::normalize(&bytes, name_hint.as_deref())
                    .map_err(|err| err.at_stage(&dataset, Stage::Normalize))?;
                let name = name_hint.unwrap_or_else(|| format!("{}.raw", id.code));
                (normalized, Some(RawPayload { name, bytes }))
            }
            FetchPayload::Tabular(normalized) => (normalized, None),
        };

        let manifest = self.build_manifest(id, version, &normalized, fetch_provenance(id));
        self.cache
            .write(manifest, &normalized.table, raw.as_ref())
            .map_err(|err| err.at_stage(&dataset, Stage::Write))?;

        // The fetched table is already in memory, so filter it directly
        // instead of reading the entry back.
        Ok(LoadResult {
            table: normalized.table.filter(filters),
            freshness: Freshness::Fresh,
        })
    }

    /// Serve the expired entry when a refresh fails and the entry is still
    /// readable; otherwise surface the refresh error.
    fn degrade_to_stale(
        &self,
        id: &DatasetId,
        version: &str,
        filters: &Filters,
        refresh_err: SocDataError,
    ) -> Result<LoadResult> {
        if !self.cache.is_readable(id, version) {
            return Err(refresh_err);
        }
        let age = self.cache.entry_age(id, version).unwrap_or_default();
        warn!(
            "refreshing {} version {} failed ({}), serving stale entry aged {:?}",
            id, version, refresh_err, age
        );
        let table = self
            .cache
            .read_processed_filtered(id, version, filters)
            .map_err(|err| err.at_stage(id.to_string(), Stage::Read))?;
        Ok(LoadResult {
            table,
            freshness: Freshness::Stale { age },
        })
    }

    // ========================================
    // Ingest
    // ========================================

    /// Normalize raw input and (re)write the default-version cache entry,
    /// regardless of current validity. Returns the committed manifest.
    pub fn ingest(&self, id: &str, input: IngestInput) -> Result<Manifest> {
        self.ingest_version(id, DEFAULT_VERSION, input)
    }

    /// Like [`ingest`](Self::ingest) for an explicit version.
    ///
    /// Ingestion does not require a registered adapter: an unknown source
    /// prefix just skips recipe lookup, so hand-held files can enter the
    /// cache under any valid id.
    pub fn ingest_version(&self, id: &str, version: &str, input: IngestInput) -> Result<Manifest> {
        let parsed = DatasetId::parse(id)?;
        let dataset = parsed.to_string();

        let (bytes, name_hint, provenance) = match input {
            IngestInput::Bytes { bytes, name_hint } => {
                (bytes, name_hint, "ingested from in-memory bytes".to_string())
            }
            IngestInput::Path(path) => {
                let recipe = self
                    .adapters
                    .get(&parsed.source)
                    .and_then(|adapter| adapter.ingest_recipe());
                let bytes = match recipe {
                    Some(recipe) => recipe
                        .prepare(&parsed.code, &path)
                        .map_err(|err| err.at_stage(&dataset, Stage::Fetch))?,
                    None => fs::read(&path).map_err(|err| {
                        SocDataError::io_with_path(err, &path).at_stage(&dataset, Stage::Fetch)
                    })?,
                };
                let name_hint = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string);
                let provenance = format!("ingested from {}", path.display());
                (bytes, name_hint, provenance)
            }
        };

        let normalized = normalize::normalize(&bytes, name_hint.as_deref())
            .map_err(|err| err.at_stage(&dataset, Stage::Normalize))?;
        let manifest = self.build_manifest(&parsed, version, &normalized, provenance);
        let raw = RawPayload {
            name: name_hint.unwrap_or_else(|| format!("{}.raw", parsed.code)),
            bytes,
        };
        self.cache
            .write(manifest, &normalized.table, Some(&raw))
            .map_err(|err| err.at_stage(&dataset, Stage::Write))
    }

    /// Assemble the manifest for a freshly normalized table.
    ///
    /// Variable labels are made total over the table's columns (empty
    /// string for unlabeled ones) so the index carries one row per
    /// variable. The title comes from the adapter's listing when the
    /// dataset is listed, else from the label embedded in the file.
    fn build_manifest(
        &self,
        id: &DatasetId,
        version: &str,
        normalized: &Normalized,
        provenance: String,
    ) -> Manifest {
        let mut variable_labels = BTreeMap::new();
        for name in normalized.table.column_names() {
            let label = normalized
                .variable_labels
                .get(name)
                .cloned()
                .unwrap_or_default();
            variable_labels.insert(name.to_string(), label);
        }
        let title = self
            .listing_title(id)
            .or_else(|| normalized.dataset_label.clone());
        Manifest {
            source: id.source.clone(),
            dataset: id.code.clone(),
            version: version.to_string(),
            ingested_at: Utc::now(),
            checksum: None,
            row_count: 0,
            column_count: 0,
            variable_labels,
            value_labels: normalized.value_labels.clone(),
            provenance,
            title,
            transforms: normalized.transforms.clone(),
        }
    }

    fn listing_title(&self, id: &DatasetId) -> Option<String> {
        let adapter = self.adapters.get(&id.source)?;
        let full = id.to_string();
        adapter
            .list_datasets()
            .into_iter()
            .find(|summary| summary.id == full)
            .map(|summary| summary.title)
    }

    // ========================================
    // Search and maintenance
    // ========================================

    /// Free-text search over the index. `limit` defaults to
    /// [`DEFAULT_SEARCH_LIMIT`]. Index failures surface as
    /// [`SocDataError::IndexUnavailable`]; loads are unaffected.
    pub fn search(
        &self,
        text: &str,
        source: Option<&str>,
        variable: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<DatasetSummary>> {
        self.index
            .search(text, source, variable, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
            .map_err(index_unavailable)
    }

    /// Index metadata for one dataset, when indexed.
    pub fn info(&self, id: &str) -> Result<Option<DatasetInfo>> {
        let parsed = DatasetId::parse(id)?;
        self.index
            .get_dataset_info(&parsed.to_string())
            .map_err(index_unavailable)
    }

    /// Rebuild the search index from every valid cache entry. Returns the
    /// number of datasets indexed.
    pub fn rebuild_index(&self) -> Result<usize> {
        let manifests = self.cache.valid_manifests()?;
        self.index.rebuild(&manifests)
    }

    /// Drop the default-version cache entry (and its index row). Returns
    /// whether anything was deleted.
    pub fn invalidate(&self, id: &str) -> Result<bool> {
        self.invalidate_version(id, DEFAULT_VERSION)
    }

    pub fn invalidate_version(&self, id: &str, version: &str) -> Result<bool> {
        let parsed = DatasetId::parse(id)?;
        self.cache.invalidate(&parsed, version)
    }

    /// Delete expired cache entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        self.cache.cleanup_expired()
    }
}

fn fetch_provenance(id: &DatasetId) -> String {
    format!("fetched by '{}' adapter", id.source)
}

fn index_unavailable(err: SocDataError) -> SocDataError {
    SocDataError::IndexUnavailable {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStage;
    use crate::table::Column;
    use crate::types::FilterValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const CSV: &[u8] = b"year,name\n2020,alpha\n2021,beta\n2022,alpha\n";

    struct CsvAdapter {
        fetches: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FetchCapability for CsvAdapter {
        fn fetch(&self, code: &str, _filters: &Filters) -> Result<FetchPayload> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SocDataError::parse("upstream outage"));
            }
            if code != "panel" {
                return Err(SocDataError::DatasetNotFound {
                    id: format!("demo:{code}"),
                });
            }
            Ok(FetchPayload::Raw {
                bytes: CSV.to_vec(),
                name_hint: Some("panel.csv".to_string()),
            })
        }
    }

    impl SourceAdapter for CsvAdapter {
        fn list_datasets(&self) -> Vec<DatasetSummary> {
            vec![DatasetSummary {
                id: "demo:panel".to_string(),
                source: "demo".to_string(),
                title: "Demo Panel Survey".to_string(),
            }]
        }

        fn fetch(&self) -> Option<&dyn FetchCapability> {
            Some(self)
        }
    }

    struct CatalogOnly;

    impl SourceAdapter for CatalogOnly {
        fn list_datasets(&self) -> Vec<DatasetSummary> {
            Vec::new()
        }
    }

    struct TabularAdapter;

    impl FetchCapability for TabularAdapter {
        fn fetch(&self, _code: &str, _filters: &Filters) -> Result<FetchPayload> {
            let table = ColumnarTable::from_columns(vec![(
                "score".to_string(),
                Column::Numeric(vec![1.0, 2.0]),
            )])
            .unwrap();
            Ok(FetchPayload::Tabular(Normalized {
                table,
                variable_labels: BTreeMap::new(),
                value_labels: BTreeMap::new(),
                dataset_label: Some("Score Extract".to_string()),
                transforms: Vec::new(),
            }))
        }
    }

    impl SourceAdapter for TabularAdapter {
        fn list_datasets(&self) -> Vec<DatasetSummary> {
            Vec::new()
        }

        fn fetch(&self) -> Option<&dyn FetchCapability> {
            Some(self)
        }
    }

    fn test_registry(ttl: Duration) -> (AdapterRegistry, Arc<AtomicUsize>, TempDir) {
        let temp = TempDir::new().unwrap();
        let config = CoreConfig::with_root(temp.path()).with_ttl(ttl);
        let mut registry = AdapterRegistry::new(&config).unwrap();
        let fetches = Arc::new(AtomicUsize::new(0));
        registry
            .register(
                "demo",
                Box::new(CsvAdapter {
                    fetches: fetches.clone(),
                    fail: false,
                }),
            )
            .unwrap();
        (registry, fetches, temp)
    }

    #[test]
    fn test_load_fetches_once_then_serves_from_cache() {
        let (registry, fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);

        let first = registry.load("demo:panel", &Filters::new()).unwrap();
        assert_eq!(first.table.row_count(), 3);
        assert_eq!(first.table.column_count(), 2);
        assert_eq!(first.freshness, Freshness::Fresh);

        let second = registry.load("demo:panel", &Filters::new()).unwrap();
        assert_eq!(second.table, first.table);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_applies_filters_on_both_paths() {
        let (registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);
        let mut filters = Filters::new();
        filters.insert("name".to_string(), FilterValue::text("alpha"));

        // miss path filters in memory, hit path filters through the codec
        let fetched = registry.load("demo:panel", &filters).unwrap();
        assert_eq!(fetched.table.row_count(), 2);
        let cached = registry.load("demo:panel", &filters).unwrap();
        assert_eq!(cached.table, fetched.table);
    }

    #[test]
    fn test_zero_ttl_refetches_every_load() {
        let (registry, fetches, _temp) = test_registry(Duration::ZERO);
        registry.load("demo:panel", &Filters::new()).unwrap();
        let again = registry.load("demo:panel", &Filters::new()).unwrap();
        assert_eq!(again.freshness, Freshness::Fresh);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_refresh_degrades_to_stale() {
        let (mut registry, fetches, _temp) = test_registry(Duration::ZERO);
        registry.load("demo:panel", &Filters::new()).unwrap();

        registry
            .register(
                "demo",
                Box::new(CsvAdapter {
                    fetches: fetches.clone(),
                    fail: true,
                }),
            )
            .unwrap();

        let stale = registry.load("demo:panel", &Filters::new()).unwrap();
        assert!(stale.freshness.is_stale());
        assert_eq!(stale.table.row_count(), 3);
    }

    #[test]
    fn test_failed_refresh_without_entry_surfaces_the_error() {
        let temp = TempDir::new().unwrap();
        let config = CoreConfig::with_root(temp.path());
        let mut registry = AdapterRegistry::new(&config).unwrap();
        registry
            .register(
                "demo",
                Box::new(CsvAdapter {
                    fetches: Arc::new(AtomicUsize::new(0)),
                    fail: true,
                }),
            )
            .unwrap();

        let err = registry.load("demo:panel", &Filters::new()).unwrap_err();
        assert!(matches!(
            err,
            SocDataError::Failed {
                stage: Stage::Fetch,
                ..
            }
        ));
    }

    #[test]
    fn test_not_found_family() {
        let (registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);

        let err = registry.load("nope:x", &Filters::new()).unwrap_err();
        assert!(err.is_not_found());

        let err = registry.load("demo:absent", &Filters::new()).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.dataset_id(), Some("demo:absent"));

        let err = registry.load("no-colon", &Filters::new()).unwrap_err();
        assert!(matches!(err, SocDataError::InvalidDatasetId { .. }));
    }

    #[test]
    fn test_register_validation() {
        let (mut registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);

        let err = registry
            .register("catalog", Box::new(CatalogOnly))
            .unwrap_err();
        assert!(matches!(err, SocDataError::InvalidAdapter { .. }));

        assert!(registry.register("", Box::new(TabularAdapter)).is_err());
        assert!(registry
            .register("bad:prefix", Box::new(TabularAdapter))
            .is_err());
        assert!(registry
            .register("bad/prefix", Box::new(TabularAdapter))
            .is_err());
    }

    #[test]
    fn test_ingest_bytes_builds_manifest() {
        let (registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);

        let manifest = registry
            .ingest(
                "manual:survey",
                IngestInput::Bytes {
                    bytes: CSV.to_vec(),
                    name_hint: Some("survey.csv".to_string()),
                },
            )
            .unwrap();
        assert_eq!(manifest.row_count, 3);
        assert_eq!(manifest.column_count, 2);
        assert!(manifest.checksum.is_some());
        assert_eq!(manifest.provenance, "ingested from in-memory bytes");
        // untitled: no listing entry and delimited input has no label
        assert!(manifest.title.is_none());
        // labels are total over columns even when the source had none
        assert_eq!(manifest.variable_labels.len(), 2);
        assert_eq!(manifest.variable_labels["year"], "");

        let info = registry.info("manual:survey").unwrap().unwrap();
        assert_eq!(info.row_count, 3);
    }

    #[test]
    fn test_ingest_path_records_provenance_and_raw_file() {
        let (registry, _fetches, temp) = test_registry(CoreConfig::DEFAULT_TTL);
        let input = temp.path().join("input.csv");
        fs::write(&input, CSV).unwrap();

        let manifest = registry
            .ingest("manual:local", IngestInput::Path(input.clone()))
            .unwrap();
        assert_eq!(manifest.row_count, 3);
        assert!(manifest.provenance.contains("input.csv"));

        let raw = registry
            .cache()
            .resolve_path(
                &DatasetId::parse("manual:local").unwrap(),
                DEFAULT_VERSION,
                CacheStage::Raw,
            )
            .join("input.csv");
        assert!(raw.exists());
    }

    #[test]
    fn test_title_precedence_listing_over_embedded_label() {
        let (mut registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);
        registry
            .register(
                MANUAL_SOURCE,
                Box::new(ManualAdapter::new().with_dataset("survey", "Hand Ingested Survey")),
            )
            .unwrap();

        let manifest = registry
            .ingest(
                "manual:survey",
                IngestInput::Bytes {
                    bytes: CSV.to_vec(),
                    name_hint: Some("survey.csv".to_string()),
                },
            )
            .unwrap();
        assert_eq!(manifest.title.as_deref(), Some("Hand Ingested Survey"));
    }

    #[test]
    fn test_tabular_fetch_skips_raw_artifact() {
        let temp = TempDir::new().unwrap();
        let config = CoreConfig::with_root(temp.path());
        let mut registry = AdapterRegistry::new(&config).unwrap();
        registry.register("ext", Box::new(TabularAdapter)).unwrap();

        let result = registry.load("ext:scores", &Filters::new()).unwrap();
        assert_eq!(result.table.row_count(), 2);

        let manifest = registry
            .cache()
            .read_manifest(&DatasetId::parse("ext:scores").unwrap(), DEFAULT_VERSION)
            .unwrap()
            .unwrap();
        assert!(manifest.checksum.is_none());
        // no listing entry, so the embedded label becomes the title
        assert_eq!(manifest.title.as_deref(), Some("Score Extract"));
    }

    #[test]
    fn test_load_indexes_the_dataset() {
        let (registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);
        registry.load("demo:panel", &Filters::new()).unwrap();

        let hits = registry.search("Demo Panel", None, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "demo:panel");
        assert_eq!(hits[0].title, "Demo Panel Survey");

        let hits = registry
            .search("panel", None, Some("year"), None)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_rebuild_index_counts_valid_entries() {
        let (registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);
        registry.load("demo:panel", &Filters::new()).unwrap();
        registry
            .ingest(
                "manual:survey",
                IngestInput::Bytes {
                    bytes: CSV.to_vec(),
                    name_hint: Some("survey.csv".to_string()),
                },
            )
            .unwrap();

        assert_eq!(registry.rebuild_index().unwrap(), 2);
        assert_eq!(registry.search_index().len().unwrap(), 2);
    }

    #[test]
    fn test_invalidate_then_reload_refetches() {
        let (registry, fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);
        registry.load("demo:panel", &Filters::new()).unwrap();

        assert!(registry.invalidate("demo:panel").unwrap());
        assert!(!registry.invalidate("demo:panel").unwrap());
        assert!(registry
            .search("Demo Panel", None, None, None)
            .unwrap()
            .is_empty());

        registry.load("demo:panel", &Filters::new()).unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_list_datasets_aggregation() {
        let (mut registry, _fetches, _temp) = test_registry(CoreConfig::DEFAULT_TTL);
        registry
            .register(
                MANUAL_SOURCE,
                Box::new(ManualAdapter::new().with_dataset("wave1", "Wave 1")),
            )
            .unwrap();

        let all = registry.list_datasets(None).unwrap();
        assert_eq!(all.len(), 2);
        // aggregation is ordered by source prefix
        assert_eq!(all[0].source, "demo");
        assert_eq!(all[1].source, "manual");

        assert_eq!(registry.list_datasets(Some("demo")).unwrap().len(), 1);
        assert!(registry.list_datasets(Some("unknown")).is_err());
    }
}

//! Dataset manifests: per-entry metadata persisted next to processed data.
//!
//! The manifest is the commit record of an ingestion. Promotion order makes
//! its rename the last step of a cache write, so "manifest parses" implies
//! "processed artifact was fully written first".

pub mod atomic;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manifest::atomic::{atomic_read_json, atomic_write_json};

/// Metadata describing one processed cache entry.
///
/// Serialized as pretty JSON at `meta/manifest.json`. Unknown fields are
/// ignored on read so older binaries can open newer caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Source prefix, e.g. `gss`.
    pub source: String,
    /// Dataset code within the source, e.g. `gss-2022`.
    pub dataset: String,
    /// Version tag of this entry.
    pub version: String,
    /// Ingestion timestamp; TTL checks compare against it.
    pub ingested_at: DateTime<Utc>,
    /// SHA-256 of the raw input, hex-encoded. `None` when ingestion had no
    /// raw payload (adapter handed over an already-tabular result).
    pub checksum: Option<String>,
    pub row_count: u64,
    pub column_count: u64,
    /// Column name → human label, one entry per column. Columns without a
    /// label in the source carry an empty string, so the key set is always
    /// the full column list.
    pub variable_labels: BTreeMap<String, String>,
    /// Column name → (raw value → label), only for columns that have coded
    /// value dictionaries.
    pub value_labels: BTreeMap<String, BTreeMap<String, String>>,
    /// Free-form description of where the data came from.
    pub provenance: String,
    /// Display title, when the source listing or the file itself had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Names of the normalization steps applied after parsing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<String>,
}

impl Manifest {
    /// Combined `source:dataset` identifier.
    pub fn dataset_id(&self) -> String {
        format!("{}:{}", self.source, self.dataset)
    }

    /// Time since ingestion. Clock skew that puts `ingested_at` in the
    /// future reads as zero age rather than an error.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.ingested_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Column names in manifest (sorted) order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.variable_labels.keys().map(String::as_str)
    }

    /// Load a manifest, `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Manifest>> {
        atomic_read_json(path)
    }

    /// Persist atomically, keeping the previous manifest as `.json.bak`.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_manifest() -> Manifest {
        let mut variable_labels = BTreeMap::new();
        variable_labels.insert("age".to_string(), "Age of respondent".to_string());
        variable_labels.insert("region".to_string(), String::new());

        let mut region_codes = BTreeMap::new();
        region_codes.insert("1".to_string(), "North".to_string());
        region_codes.insert("2".to_string(), "South".to_string());
        let mut value_labels = BTreeMap::new();
        value_labels.insert("region".to_string(), region_codes);

        Manifest {
            source: "gss".to_string(),
            dataset: "gss-2022".to_string(),
            version: "latest".to_string(),
            ingested_at: Utc::now(),
            checksum: Some("ab".repeat(32)),
            row_count: 100,
            column_count: 2,
            variable_labels,
            value_labels,
            provenance: "fetched by 'gss' adapter".to_string(),
            title: Some("General Social Survey 2022".to_string()),
            transforms: vec!["lowercase_columns".to_string()],
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");

        let manifest = sample_manifest();
        manifest.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.dataset_id(), "gss:gss-2022");
    }

    #[test]
    fn test_missing_manifest_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Manifest::load(&dir.path().join("manifest.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_fresh_manifest_has_near_zero_age() {
        let manifest = sample_manifest();
        assert!(manifest.age() < Duration::from_secs(5));
    }

    #[test]
    fn test_future_timestamp_reads_as_zero_age() {
        let mut manifest = sample_manifest();
        manifest.ingested_at = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(manifest.age(), Duration::ZERO);
    }

    #[test]
    fn test_unknown_and_absent_fields_tolerated() {
        // Older manifests lack title/transforms; newer ones may add fields
        // this version does not know about. Both must load.
        let json = r#"{
            "source": "soep",
            "dataset": "soep-core",
            "version": "v39",
            "ingested_at": "2026-01-15T12:00:00Z",
            "checksum": null,
            "row_count": 5,
            "column_count": 1,
            "variable_labels": {"pid": ""},
            "value_labels": {},
            "provenance": "manual ingest",
            "from_the_future": {"nested": true}
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.dataset_id(), "soep:soep-core");
        assert!(manifest.title.is_none());
        assert!(manifest.transforms.is_empty());
        assert_eq!(manifest.column_names().collect::<Vec<_>>(), vec!["pid"]);
    }
}

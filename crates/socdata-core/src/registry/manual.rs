//! Built-in adapter for hand-supplied local files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, SocDataError};
use crate::registry::adapter::{IngestRecipe, SourceAdapter};
use crate::types::DatasetSummary;

/// Source prefix the built-in manual adapter is registered under.
pub const MANUAL_SOURCE: &str = "manual";

/// Local-file adapter: no fetch, datasets enter through `ingest`.
///
/// Codes can be declared up front with a display title so listings and the
/// search index have something better than the bare id; undeclared codes
/// are still ingestable.
#[derive(Debug, Default)]
pub struct ManualAdapter {
    titles: BTreeMap<String, String>,
}

impl ManualAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a known dataset code with its display title.
    pub fn with_dataset(mut self, code: impl Into<String>, title: impl Into<String>) -> Self {
        self.titles.insert(code.into(), title.into());
        self
    }
}

impl SourceAdapter for ManualAdapter {
    fn list_datasets(&self) -> Vec<DatasetSummary> {
        self.titles
            .iter()
            .map(|(code, title)| DatasetSummary {
                id: format!("{MANUAL_SOURCE}:{code}"),
                source: MANUAL_SOURCE.to_string(),
                title: title.clone(),
            })
            .collect()
    }

    fn ingest_recipe(&self) -> Option<&dyn IngestRecipe> {
        Some(self)
    }
}

impl IngestRecipe for ManualAdapter {
    fn prepare(&self, _code: &str, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|err| SocDataError::io_with_path(err, path))
    }
}

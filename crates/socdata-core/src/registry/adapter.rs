//! Adapter traits: the seam between the registry and dataset sources.
//!
//! An adapter always knows how to list its datasets. Whether it can pull
//! data on demand or pre-process local files is expressed through optional
//! capability handles, so a source that only supports one entry path does
//! not stub out the other. An adapter declaring neither capability is
//! rejected at registration.

use std::path::Path;

use crate::error::Result;
use crate::normalize::Normalized;
use crate::types::{DatasetSummary, Filters};

/// Content produced by a fetch capability.
#[derive(Debug, Clone)]
pub enum FetchPayload {
    /// Raw file bytes as the source serves them. The name hint, when known,
    /// helps format sniffing on extension-only formats.
    Raw {
        bytes: Vec<u8>,
        name_hint: Option<String>,
    },
    /// A payload the adapter already brought into columnar shape, for
    /// sources that answer in tables rather than files. Skips
    /// normalization; no raw artifact (and so no checksum) is stored.
    Tabular(Normalized),
}

/// Pull a dataset's content from its source.
pub trait FetchCapability: Send + Sync {
    /// Fetch the dataset named by `code` (the part of the id after the
    /// colon). Filters are advisory; adapters for query-capable sources may
    /// push them into the request, everyone else ignores them.
    fn fetch(&self, code: &str, filters: &Filters) -> Result<FetchPayload>;
}

/// Adapter-specific pre-processing for locally supplied files.
pub trait IngestRecipe: Send + Sync {
    /// Turn a local file into raw bytes ready for normalization.
    fn prepare(&self, code: &str, path: &Path) -> Result<Vec<u8>>;
}

/// A dataset source registered under one id prefix.
pub trait SourceAdapter: Send + Sync {
    /// Datasets this source knows about. May be empty for sources whose
    /// catalog is not enumerable.
    fn list_datasets(&self) -> Vec<DatasetSummary>;

    /// Fetch capability, when the source can be pulled from.
    fn fetch(&self) -> Option<&dyn FetchCapability> {
        None
    }

    /// Local-file pre-processing, when the source defines one.
    fn ingest_recipe(&self) -> Option<&dyn IngestRecipe> {
        None
    }
}

//! socdata-core - Cached, normalized access to heterogeneous social-science
//! survey datasets.
//!
//! Sources publish survey data as Stata files, SPSS files, delimited text,
//! or zip archives of any of those. This crate normalizes them all into one
//! columnar shape, caches the result on disk with a TTL, and keeps a SQLite
//! full-text index over titles, variable labels, and value labels so
//! datasets stay findable. Source-specific fetching lives behind the adapter
//! trait; the built-in `manual` adapter covers hand-supplied files.
//!
//! # Example
//!
//! ```rust,ignore
//! use socdata_core::{AdapterRegistry, CoreConfig, Filters, IngestInput};
//!
//! fn main() -> socdata_core::Result<()> {
//!     let config = CoreConfig::with_root("/var/lib/socdata");
//!     let mut registry = AdapterRegistry::new(&config)?;
//!     registry.register("gss", Box::new(GssAdapter::default()))?;
//!
//!     // Load through the cache (fetches on miss)
//!     let result = registry.load("gss:gss-2022", &Filters::new())?;
//!     println!("{} rows", result.table.row_count());
//!
//!     // Hand-ingest a local file
//!     registry.ingest(
//!         "manual:pilot-study",
//!         IngestInput::Path("data/pilot.dta".into()),
//!     )?;
//!
//!     // Search everything that has been cached
//!     for hit in registry.search("social survey", None, None, None)? {
//!         println!("{}  {}", hit.id, hit.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod manifest;
pub mod normalize;
pub mod registry;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheManager, CacheStage, IndexSink, RawPayload};
pub use config::{CoreConfig, DEFAULT_SEARCH_LIMIT, DEFAULT_VERSION};
pub use error::{Result, SocDataError, Stage};
pub use index::{Backend, DatasetInfo, SearchIndex};
pub use manifest::Manifest;
pub use normalize::{normalize, sniff_format, DataFormat, Normalized};
pub use registry::{
    AdapterRegistry, FetchCapability, FetchPayload, IngestInput, IngestRecipe, LoadResult,
    ManualAdapter, SourceAdapter, MANUAL_SOURCE,
};
pub use table::{Column, ColumnarTable};
pub use types::{DatasetId, DatasetSummary, FilterValue, Filters, Freshness};

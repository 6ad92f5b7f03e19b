//! Shared data types crossing component boundaries.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SocDataError};

/// Parsed dataset identifier of the form `source:code`.
///
/// Case-sensitive, exactly one colon. The code becomes a cache path segment,
/// so path separators are rejected up front instead of surfacing later as
/// surprising directory structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetId {
    pub source: String,
    pub code: String,
}

impl DatasetId {
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = |reason: &str| SocDataError::InvalidDatasetId {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = id.splitn(2, ':');
        let source = parts.next().unwrap_or_default();
        let code = match parts.next() {
            Some(code) => code,
            None => return Err(invalid("expected 'source:code'")),
        };
        if source.is_empty() {
            return Err(invalid("source must not be empty"));
        }
        if code.is_empty() {
            return Err(invalid("code must not be empty"));
        }
        if code.contains(':') {
            return Err(invalid("expected exactly one colon"));
        }
        if source.contains(['/', '\\']) || code.contains(['/', '\\']) {
            return Err(invalid("path separators are not allowed"));
        }
        Ok(Self {
            source: source.to_string(),
            code: code.to_string(),
        })
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.code)
    }
}

/// Lightweight dataset listing entry produced by adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: String,
    pub source: String,
    pub title: String,
}

/// One filter predicate applied to a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Numeric equality.
    Number(f64),
    /// Text equality (also matches numeric columns when the text parses).
    Text(String),
    /// Membership in a value set.
    OneOf(Vec<String>),
    /// Inclusive numeric range; open ends allowed.
    Range { min: Option<f64>, max: Option<f64> },
}

impl FilterValue {
    pub fn text(value: impl Into<String>) -> Self {
        FilterValue::Text(value.into())
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::OneOf(values.into_iter().map(Into::into).collect())
    }
}

/// Column name → predicate. Ordered so filter application is deterministic.
pub type Filters = BTreeMap<String, FilterValue>;

/// Freshness marker attached to load results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Entry served past its TTL because re-fetching was not possible.
    Stale { age: Duration },
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale { .. })
    }
}

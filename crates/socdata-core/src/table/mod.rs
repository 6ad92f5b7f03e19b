//! In-memory columnar table model.
//!
//! Every input format normalizes into this shape: named columns, each either
//! numeric (f64, NaN for missing) or text (None for missing). The on-disk
//! form lives in [`codec`].

pub mod codec;

use crate::error::{Result, SocDataError};
use crate::types::{FilterValue, Filters};

/// One column of data.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric values; missing encoded as NaN.
    Numeric(Vec<f64>),
    /// Text values; missing encoded as None.
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Declared type name, used in manifests and the codec directory.
    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Numeric(_) => "numeric",
            Column::Text(_) => "text",
        }
    }

    fn matches(&self, row: usize, predicate: &FilterValue) -> bool {
        match self {
            Column::Numeric(values) => numeric_matches(values[row], predicate),
            Column::Text(values) => match &values[row] {
                Some(cell) => text_matches(cell, predicate),
                None => false,
            },
        }
    }

    fn take_rows(&self, mask: &[bool]) -> Column {
        match self {
            Column::Numeric(values) => Column::Numeric(
                values
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| *v)
                    .collect(),
            ),
            Column::Text(values) => Column::Text(
                values
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| v.clone())
                    .collect(),
            ),
        }
    }
}

fn numeric_matches(value: f64, predicate: &FilterValue) -> bool {
    if value.is_nan() {
        return false;
    }
    match predicate {
        FilterValue::Number(wanted) => value == *wanted,
        FilterValue::Text(text) => text.trim().parse::<f64>().is_ok_and(|w| value == w),
        FilterValue::OneOf(options) => options
            .iter()
            .any(|o| o.trim().parse::<f64>().is_ok_and(|w| value == w)),
        FilterValue::Range { min, max } => {
            min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
        }
    }
}

fn text_matches(cell: &str, predicate: &FilterValue) -> bool {
    match predicate {
        FilterValue::Number(wanted) => cell.trim().parse::<f64>().is_ok_and(|v| v == *wanted),
        FilterValue::Text(text) => cell == text,
        FilterValue::OneOf(options) => options.iter().any(|o| o == cell),
        FilterValue::Range { min, max } => cell.trim().parse::<f64>().is_ok_and(|v| {
            min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m)
        }),
    }
}

/// Columnar table: ordered named columns of equal length.
///
/// Duplicate names are tolerated (some survey exports carry them); lookups
/// and filters resolve to the first occurrence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnarTable {
    columns: Vec<(String, Column)>,
    row_count: usize,
}

impl ColumnarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<(String, Column)>) -> Result<Self> {
        let row_count = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        for (name, column) in &columns {
            if column.len() != row_count {
                return Err(SocDataError::parse(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    column.len(),
                    row_count
                )));
            }
        }
        Ok(Self { columns, row_count })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(name, col)| (name.as_str(), col))
    }

    /// First column with the given name, if any.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Keep only the named columns, in table order. Unknown names are ignored.
    pub fn project(&self, names: &[String]) -> ColumnarTable {
        let mut seen: Vec<&str> = Vec::new();
        let columns = self
            .columns
            .iter()
            .filter(|(name, _)| {
                let wanted = names.iter().any(|n| n == name);
                // first occurrence wins for duplicate names
                let fresh = !seen.contains(&name.as_str());
                if wanted && fresh {
                    seen.push(name.as_str());
                }
                wanted && fresh
            })
            .cloned()
            .collect();
        ColumnarTable {
            columns,
            row_count: self.row_count,
        }
    }

    /// Row mask for the filters: AND across predicates.
    ///
    /// Filter keys naming no column are skipped, matching the lenient
    /// behavior downstream consumers rely on for exploratory queries.
    pub fn filter_mask(&self, filters: &Filters) -> Vec<bool> {
        let mut mask = vec![true; self.row_count];
        for (name, predicate) in filters {
            if let Some(column) = self.column(name) {
                for (row, keep) in mask.iter_mut().enumerate() {
                    if *keep && !column.matches(row, predicate) {
                        *keep = false;
                    }
                }
            }
        }
        mask
    }

    /// Apply filters, returning the matching rows.
    pub fn filter(&self, filters: &Filters) -> ColumnarTable {
        if filters.is_empty() {
            return self.clone();
        }
        let mask = self.filter_mask(filters);
        self.take_rows(&mask)
    }

    pub fn take_rows(&self, mask: &[bool]) -> ColumnarTable {
        let row_count = mask.iter().filter(|keep| **keep).count();
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| (name.clone(), col.take_rows(mask)))
            .collect();
        ColumnarTable { columns, row_count }
    }
}

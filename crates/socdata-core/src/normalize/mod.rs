//! Format normalization: heterogeneous survey files in, one columnar shape
//! out.
//!
//! The entry point is [`normalize`]: sniff the format, hand the bytes to the
//! matching reader, then apply the post-parse cleanup every format gets
//! (column names trimmed and lowercased, text cells trimmed). Readers return
//! the table plus whatever label metadata the format embeds; delimited text
//! has none, the statistical formats usually carry both variable labels and
//! coded value dictionaries.

pub mod sniff;

mod archive;
mod delimited;
mod spss;
mod stata;

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, SocDataError};
use crate::table::{Column, ColumnarTable};

pub use sniff::{sniff_format, DataFormat};

/// Normalization step names, recorded in the manifest `transforms` field.
pub const TRANSFORM_LOWERCASE_COLUMNS: &str = "lowercase_columns";
pub const TRANSFORM_TRIM_TEXT: &str = "trim_text_values";

/// Output of [`normalize`]: the table plus everything a manifest needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub table: ColumnarTable,
    /// Column → label, for columns the source actually labeled. Keys use the
    /// normalized (lowercased) column names.
    pub variable_labels: BTreeMap<String, String>,
    /// Column → (raw value → label) dictionaries.
    pub value_labels: BTreeMap<String, BTreeMap<String, String>>,
    /// Dataset-level label embedded in the file, when the format has one.
    pub dataset_label: Option<String>,
    /// Post-parse steps applied, in order.
    pub transforms: Vec<String>,
}

/// Reader output before post-parse normalization. Label keys still use the
/// source's original column names here.
#[derive(Debug)]
pub(crate) struct Parsed {
    pub table: ColumnarTable,
    pub variable_labels: BTreeMap<String, String>,
    pub value_labels: BTreeMap<String, BTreeMap<String, String>>,
    pub dataset_label: Option<String>,
}

impl Parsed {
    /// A parse result with no label metadata (delimited input).
    pub fn bare(table: ColumnarTable) -> Self {
        Self {
            table,
            variable_labels: BTreeMap::new(),
            value_labels: BTreeMap::new(),
            dataset_label: None,
        }
    }
}

/// Normalize raw input bytes, optionally helped by a file-name hint.
pub fn normalize(bytes: &[u8], name_hint: Option<&str>) -> Result<Normalized> {
    normalize_inner(bytes, name_hint, 0)
}

fn normalize_inner(bytes: &[u8], name_hint: Option<&str>, depth: u8) -> Result<Normalized> {
    let format = sniff::sniff_format(bytes, name_hint)?;
    let parsed = match format {
        DataFormat::Delimited => delimited::read_delimited(bytes)?,
        DataFormat::Stata => stata::read_dta(bytes)?,
        DataFormat::Spss => spss::read_sav(bytes)?,
        DataFormat::Archive => {
            if depth > 0 {
                return Err(SocDataError::unsupported_format(
                    "nested archives are not supported",
                ));
            }
            let entry = archive::select_data_entry(bytes)?;
            debug!("descending into archive member '{}'", entry.name);
            return normalize_inner(&entry.bytes, Some(&entry.name), depth + 1);
        }
    };
    apply_transforms(parsed)
}

fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn apply_transforms(parsed: Parsed) -> Result<Normalized> {
    let columns = parsed
        .table
        .columns()
        .map(|(name, column)| {
            let column = match column {
                Column::Text(values) => Column::Text(
                    values
                        .iter()
                        .map(|value| {
                            value.as_deref().map(str::trim).and_then(|trimmed| {
                                (!trimmed.is_empty()).then(|| trimmed.to_string())
                            })
                        })
                        .collect(),
                ),
                numeric => numeric.clone(),
            };
            (normalize_column_name(name), column)
        })
        .collect();
    // row lengths are untouched, so this re-validation is structural only
    let table = ColumnarTable::from_columns(columns)?;

    // Duplicate names collapsing to one key keep the first label, matching
    // the first-occurrence rule used for filtering and projection.
    let mut variable_labels = BTreeMap::new();
    for (name, label) in parsed.variable_labels {
        variable_labels
            .entry(normalize_column_name(&name))
            .or_insert(label);
    }
    let mut value_labels = BTreeMap::new();
    for (name, codes) in parsed.value_labels {
        value_labels
            .entry(normalize_column_name(&name))
            .or_insert(codes);
    }

    Ok(Normalized {
        table,
        variable_labels,
        value_labels,
        dataset_label: parsed.dataset_label,
        transforms: vec![
            TRANSFORM_LOWERCASE_COLUMNS.to_string(),
            TRANSFORM_TRIM_TEXT.to_string(),
        ],
    })
}

/// Stable text form of a numeric label key: integral values print without a
/// fractional part, so Stata and SPSS dictionaries agree on `"1"` over
/// `"1.0"`.
pub(crate) fn format_label_key(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Decode a NUL-terminated (or fully occupied) padded byte field.
pub(crate) fn zero_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ========================================
// Bounds-checked binary cursor
// ========================================

/// Byte order of a statistical file, declared in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endian {
    Little,
    Big,
}

/// Sequential reader over an in-memory file with explicit bounds checks.
/// Running past the end is a `ParseError`, never a panic.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    endian: Endian,
}

macro_rules! read_int {
    ($name:ident, $ty:ty, $len:expr) => {
        pub fn $name(&mut self) -> Result<$ty> {
            let raw: [u8; $len] = self.take($len)?.try_into().unwrap_or([0; $len]);
            Ok(match self.endian {
                Endian::Little => <$ty>::from_le_bytes(raw),
                Endian::Big => <$ty>::from_be_bytes(raw),
            })
        }
    };
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            endian: Endian::Little,
        }
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.bytes.len() as u64 {
            return Err(SocDataError::parse(format!(
                "offset {} is past the end of the file ({} bytes)",
                pos,
                self.bytes.len()
            )));
        }
        self.pos = pos as usize;
        Ok(())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SocDataError::parse(format!(
                "unexpected end of file at byte {} (wanted {} more)",
                self.pos, n
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// True when the next bytes equal `tag`, without consuming them.
    pub fn peek(&self, tag: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(tag)
    }

    /// Consume `tag` or fail naming it.
    pub fn expect(&mut self, tag: &[u8]) -> Result<()> {
        if !self.peek(tag) {
            return Err(SocDataError::parse(format!(
                "expected {:?} at byte {}",
                String::from_utf8_lossy(tag),
                self.pos
            )));
        }
        self.pos += tag.len();
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    read_int!(u16, u16, 2);
    read_int!(u32, u32, 4);
    read_int!(u64, u64, 8);
    read_int!(i16, i16, 2);
    read_int!(i32, i32, 4);

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer
                .start_file(name.to_string(), zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_normalize_csv_applies_transforms() {
        let out = normalize(b" AGE ,Region\n25, north \n40,south\n", Some("x.csv")).unwrap();
        let names: Vec<&str> = out.table.column_names().collect();
        assert_eq!(names, vec!["age", "region"]);
        match out.table.column("region") {
            Some(Column::Text(values)) => {
                assert_eq!(values[0].as_deref(), Some("north"));
            }
            other => panic!("unexpected column: {:?}", other),
        }
        assert_eq!(
            out.transforms,
            vec![
                TRANSFORM_LOWERCASE_COLUMNS.to_string(),
                TRANSFORM_TRIM_TEXT.to_string()
            ]
        );
        assert!(out.variable_labels.is_empty());
    }

    #[test]
    fn test_whitespace_only_text_becomes_missing() {
        let out = normalize(b"note\nhello\n\"   \"\n", Some("x.csv")).unwrap();
        match out.table.column("note") {
            Some(Column::Text(values)) => {
                assert_eq!(values[0].as_deref(), Some("hello"));
                assert_eq!(values[1], None);
            }
            other => panic!("unexpected column: {:?}", other),
        }
    }

    #[test]
    fn test_label_keys_follow_column_renames() {
        let table = ColumnarTable::from_columns(vec![(
            "AGE".to_string(),
            Column::Numeric(vec![1.0]),
        )])
        .unwrap();
        let mut variable_labels = BTreeMap::new();
        variable_labels.insert("AGE".to_string(), "Age of respondent".to_string());
        let parsed = Parsed {
            table,
            variable_labels,
            value_labels: BTreeMap::new(),
            dataset_label: None,
        };

        let out = apply_transforms(parsed).unwrap();
        assert_eq!(
            out.variable_labels.get("age").map(String::as_str),
            Some("Age of respondent")
        );
        assert!(!out.variable_labels.contains_key("AGE"));
    }

    #[test]
    fn test_normalize_through_archive() {
        let bytes = zip_of(&[
            ("readme.txt", b"docs".as_slice()),
            ("survey.csv", b"a,b\n1,2\n".as_slice()),
        ]);
        let out = normalize(&bytes, Some("bundle.zip")).unwrap();
        assert_eq!(out.table.row_count(), 1);
        assert_eq!(out.table.column_count(), 2);
    }

    #[test]
    fn test_nested_archive_rejected() {
        let inner = zip_of(&[("a.csv", b"a\n1\n".as_slice())]);
        let outer = zip_of(&[("inner.csv", inner.as_slice())]);
        // the member sniffs as an archive by magic despite its name
        let err = normalize(&outer, Some("outer.zip")).unwrap_err();
        assert!(matches!(err, SocDataError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_format_label_key() {
        assert_eq!(format_label_key(1.0), "1");
        assert_eq!(format_label_key(-3.0), "-3");
        assert_eq!(format_label_key(2.5), "2.5");
    }

    #[test]
    fn test_cursor_bounds_and_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let mut cur = Cursor::new(&bytes);
        assert_eq!(cur.u16().unwrap(), 0x0201);
        cur.set_endian(Endian::Big);
        assert_eq!(cur.u16().unwrap(), 0x0304);
        assert!(cur.is_at_end());
        assert!(cur.u8().is_err());
        assert!(cur.seek(5).is_err());
        cur.seek(0).unwrap();
        assert!(cur.expect(b"\x01\x02").is_ok());
        assert!(cur.expect(b"zz").is_err());
    }
}

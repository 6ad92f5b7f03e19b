//! On-disk columnar container for processed artifacts (`data.sdt`).
//!
//! Layout (all integers little-endian):
//! - 0-3: magic `SDT1`
//! - 4-7: format version (u32)
//! - 8-15: row count (u64)
//! - 16-19: column count (u32)
//! - directory, one entry per column:
//!   name length (u32) + name bytes (UTF-8), type tag (u8),
//!   blob offset (u64, absolute), blob length (u64)
//! - column blobs, addressed by the directory:
//!   numeric = row-count f64 values (NaN missing),
//!   text = per value a length (u32, `u32::MAX` missing) + bytes
//!
//! The directory makes column-pruned reads cheap: a reader seeks straight to
//! the blobs it needs and never touches the rest of the file.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, SocDataError};
use crate::table::{Column, ColumnarTable};
use crate::types::Filters;

const MAGIC: &[u8; 4] = b"SDT1";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 20;

const TAG_NUMERIC: u8 = 0;
const TAG_TEXT: u8 = 1;

const MISSING_TEXT: u32 = u32::MAX;
const MAX_COLUMN_COUNT: u32 = 100_000;
const MAX_NAME_LEN: u32 = 4_096;

#[derive(Debug)]
struct DirEntry {
    name: String,
    tag: u8,
    offset: u64,
    len: u64,
}

/// Write a table to `path`, replacing any existing file.
///
/// The file is flushed and synced before returning so a follow-up rename
/// promotes fully durable bytes.
pub fn write_table(path: &Path, table: &ColumnarTable) -> Result<()> {
    let mut blobs: Vec<Vec<u8>> = Vec::with_capacity(table.column_count());
    let mut dir_len: u64 = 0;
    for (name, column) in table.columns() {
        if name.len() as u64 > MAX_NAME_LEN as u64 {
            return Err(SocDataError::parse(format!(
                "column name too long: {} bytes",
                name.len()
            )));
        }
        dir_len += 4 + name.len() as u64 + 1 + 8 + 8;
        blobs.push(encode_column(column)?);
    }

    let file = File::create(path).map_err(|e| SocDataError::io_with_path(e, path))?;
    let mut writer = BufWriter::new(file);
    let io_err = |e: std::io::Error| SocDataError::io_with_path(e, path);

    writer.write_all(MAGIC).map_err(io_err)?;
    writer
        .write_all(&FORMAT_VERSION.to_le_bytes())
        .map_err(io_err)?;
    writer
        .write_all(&(table.row_count() as u64).to_le_bytes())
        .map_err(io_err)?;
    writer
        .write_all(&(table.column_count() as u32).to_le_bytes())
        .map_err(io_err)?;

    let mut offset = HEADER_LEN + dir_len;
    for ((name, column), blob) in table.columns().zip(&blobs) {
        writer
            .write_all(&(name.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        writer.write_all(name.as_bytes()).map_err(io_err)?;
        let tag = match column {
            Column::Numeric(_) => TAG_NUMERIC,
            Column::Text(_) => TAG_TEXT,
        };
        writer.write_all(&[tag]).map_err(io_err)?;
        writer.write_all(&offset.to_le_bytes()).map_err(io_err)?;
        writer
            .write_all(&(blob.len() as u64).to_le_bytes())
            .map_err(io_err)?;
        offset += blob.len() as u64;
    }

    for blob in &blobs {
        writer.write_all(blob).map_err(io_err)?;
    }

    let file = writer
        .into_inner()
        .map_err(|e| SocDataError::io_with_path(e.into_error(), path))?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

fn encode_column(column: &Column) -> Result<Vec<u8>> {
    match column {
        Column::Numeric(values) => {
            let mut blob = Vec::with_capacity(values.len() * 8);
            for value in values {
                blob.extend_from_slice(&value.to_le_bytes());
            }
            Ok(blob)
        }
        Column::Text(values) => {
            let mut blob = Vec::new();
            for value in values {
                match value {
                    Some(text) => {
                        if text.len() as u64 >= MISSING_TEXT as u64 {
                            return Err(SocDataError::parse("text value too large to encode"));
                        }
                        blob.extend_from_slice(&(text.len() as u32).to_le_bytes());
                        blob.extend_from_slice(text.as_bytes());
                    }
                    None => blob.extend_from_slice(&MISSING_TEXT.to_le_bytes()),
                }
            }
            Ok(blob)
        }
    }
}

/// Read a full table.
pub fn read_table(path: &Path) -> Result<ColumnarTable> {
    read_impl(path, None, None)
}

/// Read only the named columns (first occurrence each), in file order.
pub fn read_columns(path: &Path, names: &[String]) -> Result<ColumnarTable> {
    read_impl(path, Some(names), None)
}

/// Read with filter pushdown: filter-referenced columns are decoded first to
/// build the row mask, then every column is decoded keeping only matching
/// rows. Non-matching rows of text columns are skipped without allocation.
pub fn read_table_filtered(path: &Path, filters: &Filters) -> Result<ColumnarTable> {
    if filters.is_empty() {
        return read_table(path);
    }
    read_impl(path, None, Some(filters))
}

fn read_impl(
    path: &Path,
    names: Option<&[String]>,
    filters: Option<&Filters>,
) -> Result<ColumnarTable> {
    let mut file = File::open(path).map_err(|e| SocDataError::io_with_path(e, path))?;
    let (row_count, directory) = read_directory(&mut file, path)?;

    // Pass 1: decode the filter-referenced columns and compute the row mask.
    // Filters naming no stored column fall through to an unmasked read.
    let mask = match filters {
        Some(filters) => {
            let mut filter_columns: Vec<(String, Column)> = Vec::new();
            for name in filters.keys() {
                if filter_columns.iter().any(|(n, _)| n == name) {
                    continue;
                }
                if let Some(entry) = directory.iter().find(|e| &e.name == name) {
                    let column = read_column(&mut file, path, entry, row_count, None)?;
                    filter_columns.push((name.clone(), column));
                }
            }
            if filter_columns.is_empty() {
                None
            } else {
                let probe = ColumnarTable::from_columns(filter_columns)?;
                Some(probe.filter_mask(filters))
            }
        }
        None => None,
    };

    // Pass 2: decode the requested columns, applying the mask while decoding.
    let mut columns: Vec<(String, Column)> = Vec::with_capacity(directory.len());
    let mut seen: Vec<&str> = Vec::new();
    for entry in &directory {
        if let Some(names) = names {
            if !names.iter().any(|n| n == &entry.name) || seen.contains(&entry.name.as_str()) {
                continue;
            }
            seen.push(entry.name.as_str());
        }
        let column = read_column(&mut file, path, entry, row_count, mask.as_deref())?;
        columns.push((entry.name.clone(), column));
    }

    ColumnarTable::from_columns(columns)
}

fn read_directory(file: &mut File, path: &Path) -> Result<(usize, Vec<DirEntry>)> {
    let io_err = |e: std::io::Error| SocDataError::io_with_path(e, path);

    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header).map_err(io_err)?;

    if &header[..4] != MAGIC {
        return Err(SocDataError::parse(format!(
            "{} is not a columnar artifact (bad magic)",
            path.display()
        )));
    }
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap_or([0; 4]));
    if version != FORMAT_VERSION {
        return Err(SocDataError::parse(format!(
            "unsupported columnar format version {}",
            version
        )));
    }
    let row_count = u64::from_le_bytes(header[8..16].try_into().unwrap_or([0; 8]));
    let column_count = u32::from_le_bytes(header[16..20].try_into().unwrap_or([0; 4]));
    if column_count > MAX_COLUMN_COUNT {
        return Err(SocDataError::parse(format!(
            "implausible column count {}",
            column_count
        )));
    }

    let mut directory = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).map_err(io_err)?;
        let name_len = u32::from_le_bytes(len_buf);
        if name_len > MAX_NAME_LEN {
            return Err(SocDataError::parse(format!(
                "implausible column name length {}",
                name_len
            )));
        }
        let mut name_buf = vec![0u8; name_len as usize];
        file.read_exact(&mut name_buf).map_err(io_err)?;
        let name = String::from_utf8(name_buf)
            .map_err(|_| SocDataError::parse("column name is not valid UTF-8"))?;

        let mut tag_buf = [0u8; 1];
        file.read_exact(&mut tag_buf).map_err(io_err)?;
        let tag = tag_buf[0];
        if tag != TAG_NUMERIC && tag != TAG_TEXT {
            return Err(SocDataError::parse(format!(
                "unknown column type tag {} for '{}'",
                tag, name
            )));
        }

        let mut u64_buf = [0u8; 8];
        file.read_exact(&mut u64_buf).map_err(io_err)?;
        let offset = u64::from_le_bytes(u64_buf);
        file.read_exact(&mut u64_buf).map_err(io_err)?;
        let len = u64::from_le_bytes(u64_buf);

        directory.push(DirEntry {
            name,
            tag,
            offset,
            len,
        });
    }

    Ok((row_count as usize, directory))
}

fn read_column(
    file: &mut File,
    path: &Path,
    entry: &DirEntry,
    row_count: usize,
    mask: Option<&[bool]>,
) -> Result<Column> {
    let io_err = |e: std::io::Error| SocDataError::io_with_path(e, path);

    file.seek(SeekFrom::Start(entry.offset)).map_err(io_err)?;
    let mut blob = vec![0u8; entry.len as usize];
    file.read_exact(&mut blob).map_err(io_err)?;

    match entry.tag {
        TAG_NUMERIC => decode_numeric(&blob, &entry.name, row_count, mask),
        TAG_TEXT => decode_text(&blob, &entry.name, row_count, mask),
        _ => unreachable!("tag validated while reading the directory"),
    }
}

fn decode_numeric(
    blob: &[u8],
    name: &str,
    row_count: usize,
    mask: Option<&[bool]>,
) -> Result<Column> {
    if blob.len() != row_count * 8 {
        return Err(SocDataError::parse(format!(
            "numeric column '{}' has {} bytes, expected {}",
            name,
            blob.len(),
            row_count * 8
        )));
    }
    let mut values = Vec::new();
    for row in 0..row_count {
        if mask.is_some_and(|m| !m[row]) {
            continue;
        }
        let bytes: [u8; 8] = blob[row * 8..row * 8 + 8].try_into().unwrap_or([0; 8]);
        values.push(f64::from_le_bytes(bytes));
    }
    Ok(Column::Numeric(values))
}

fn decode_text(blob: &[u8], name: &str, row_count: usize, mask: Option<&[bool]>) -> Result<Column> {
    let truncated = || {
        SocDataError::parse(format!(
            "text column '{}' is truncated",
            name
        ))
    };

    let mut values = Vec::new();
    let mut pos = 0usize;
    for row in 0..row_count {
        let keep = mask.map_or(true, |m| m[row]);
        let len_bytes: [u8; 4] = blob
            .get(pos..pos + 4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(truncated)?;
        pos += 4;
        let len = u32::from_le_bytes(len_bytes);
        if len == MISSING_TEXT {
            if keep {
                values.push(None);
            }
            continue;
        }
        let end = pos
            .checked_add(len as usize)
            .filter(|end| *end <= blob.len())
            .ok_or_else(truncated)?;
        if keep {
            let text = std::str::from_utf8(&blob[pos..end])
                .map_err(|_| SocDataError::parse(format!("text column '{}' is not UTF-8", name)))?;
            values.push(Some(text.to_string()));
        }
        pos = end;
    }
    Ok(Column::Text(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterValue;
    use tempfile::TempDir;

    fn sample_table() -> ColumnarTable {
        ColumnarTable::from_columns(vec![
            (
                "year".to_string(),
                Column::Numeric(vec![2018.0, 2020.0, 2022.0, f64::NAN]),
            ),
            (
                "country".to_string(),
                Column::Text(vec![
                    Some("de".to_string()),
                    Some("fr".to_string()),
                    None,
                    Some("de".to_string()),
                ]),
            ),
            (
                "weight".to_string(),
                Column::Numeric(vec![0.8, 1.2, 1.0, 0.9]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.sdt");
        let table = sample_table();

        write_table(&path, &table).unwrap();
        let loaded = read_table(&path).unwrap();

        assert_eq!(loaded.row_count(), 4);
        assert_eq!(loaded.column_count(), 3);
        match loaded.column("year").unwrap() {
            Column::Numeric(values) => {
                assert_eq!(values[..3], [2018.0, 2020.0, 2022.0]);
                assert!(values[3].is_nan());
            }
            other => panic!("unexpected column: {:?}", other),
        }
        assert_eq!(loaded.column("country"), table.column("country").cloned().as_ref());
    }

    #[test]
    fn test_empty_table_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.sdt");
        write_table(&path, &ColumnarTable::new()).unwrap();
        let loaded = read_table(&path).unwrap();
        assert_eq!(loaded.row_count(), 0);
        assert_eq!(loaded.column_count(), 0);
    }

    #[test]
    fn test_projection_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.sdt");
        write_table(&path, &sample_table()).unwrap();

        let loaded = read_columns(&path, &["weight".to_string()]).unwrap();
        assert_eq!(loaded.column_count(), 1);
        assert_eq!(loaded.row_count(), 4);
        assert!(loaded.column("year").is_none());
    }

    #[test]
    fn test_filtered_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.sdt");
        write_table(&path, &sample_table()).unwrap();

        let mut filters = Filters::new();
        filters.insert("country".to_string(), FilterValue::text("de"));
        let loaded = read_table_filtered(&path, &filters).unwrap();

        assert_eq!(loaded.row_count(), 2);
        assert_eq!(loaded.column_count(), 3);
        match loaded.column("weight").unwrap() {
            Column::Numeric(values) => assert_eq!(values, &vec![0.8, 0.9]),
            other => panic!("unexpected column: {:?}", other),
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.sdt");
        std::fs::write(&path, b"PK\x03\x04not a table").unwrap();
        let err = read_table(&path).unwrap_err();
        assert!(matches!(err, SocDataError::Parse { .. }));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.sdt");
        write_table(&path, &sample_table()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(read_table(&path).is_err());
    }
}

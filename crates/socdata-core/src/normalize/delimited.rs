//! Delimited text: delimiter inference, header parsing, type inference.

use tracing::debug;

use crate::error::Result;
use crate::normalize::Parsed;
use crate::table::{Column, ColumnarTable};

/// Delimiters considered during inference, in tie-break order.
pub(crate) const DELIMITER_CANDIDATES: [u8; 3] = [b',', b'\t', b';'];

/// How many non-empty lines the delimiter inference samples.
const SAMPLE_LINES: usize = 10;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Pick the delimiter whose per-line count is most consistent: the winning
/// candidate has the highest guaranteed (minimum) occurrences across the
/// sampled lines. A file with no candidate present falls back to comma,
/// which parses single-column input correctly anyway.
pub(crate) fn infer_delimiter(sample: &str) -> u8 {
    let lines: Vec<&str> = sample
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect();

    let mut best = (DELIMITER_CANDIDATES[0], 0usize);
    for &candidate in &DELIMITER_CANDIDATES {
        let guaranteed = lines
            .iter()
            .map(|line| line.bytes().filter(|&b| b == candidate).count())
            .min()
            .unwrap_or(0);
        if guaranteed > best.1 {
            best = (candidate, guaranteed);
        }
    }
    best.0
}

/// Parse delimited bytes into a columnar table.
///
/// First row is the header. A column is numeric when every non-empty cell
/// parses as a number; empty cells are missing in either column type.
pub(crate) fn read_delimited(bytes: &[u8]) -> Result<Parsed> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let sample_len = bytes.len().min(4096);
    let sample = String::from_utf8_lossy(&bytes[..sample_len]);
    let delimiter = infer_delimiter(&sample);
    debug!("parsing delimited input, delimiter {:?}", delimiter as char);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (column, cell) in cells.iter_mut().zip(record.iter()) {
            column.push(cell.to_string());
        }
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, raw)| (name, infer_column(raw)))
        .collect();
    Ok(Parsed::bare(ColumnarTable::from_columns(columns)?))
}

fn infer_column(raw: Vec<String>) -> Column {
    let numeric = raw
        .iter()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .all(|cell| cell.parse::<f64>().is_ok());

    if numeric {
        Column::Numeric(
            raw.iter()
                .map(|cell| match cell.trim() {
                    "" => f64::NAN,
                    trimmed => trimmed.parse::<f64>().unwrap_or(f64::NAN),
                })
                .collect(),
        )
    } else {
        Column::Text(
            raw.into_iter()
                .map(|cell| if cell.is_empty() { None } else { Some(cell) })
                .collect(),
        )
    }
}

//! SPSS system file (`.sav`) reader.
//!
//! A system file is a 176-byte header followed by dictionary records and
//! case data. The header's layout code doubles as the endianness probe:
//! it reads as 2 or 3 only in the file's native byte order. Case data is
//! either raw 8-byte slots or bytecode-compressed (command octets with
//! literal elements); zlib-compressed `.zsav` payloads are rejected.
//!
//! String variables wider than 8 bytes span multiple slots via
//! continuation records. Extension records (type 7) are skipped, so
//! variables keep their 8-character short names.

use std::collections::BTreeMap;

use crate::error::{Result, SocDataError};
use crate::normalize::{format_label_key, Cursor, Endian, Parsed};
use crate::table::{Column, ColumnarTable};

const COMPRESSION_NONE: i32 = 0;
const COMPRESSION_BYTECODE: i32 = 1;
const COMPRESSION_ZLIB: i32 = 2;

const RECORD_VARIABLE: i32 = 2;
const RECORD_VALUE_LABELS: i32 = 3;
const RECORD_VALUE_LABEL_VARS: i32 = 4;
const RECORD_DOCUMENTS: i32 = 6;
const RECORD_EXTENSION: i32 = 7;
const RECORD_TERMINATOR: i32 = 999;

// Bytecode command codes. 1..=251 encode `code - bias` directly.
const CODE_PADDING: u8 = 0;
const CODE_END_OF_DATA: u8 = 252;
const CODE_LITERAL: u8 = 253;
const CODE_ALL_SPACES: u8 = 254;
const CODE_SYSMIS: u8 = 255;

struct SavVar {
    name: String,
    width: i32,
    label: Option<String>,
}

#[derive(Clone, Copy)]
struct SlotOwner {
    var: usize,
    numeric: bool,
}

enum VarData {
    Numeric(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl VarData {
    fn finish(self) -> Column {
        match self {
            VarData::Numeric(values) => Column::Numeric(values),
            VarData::Text(values) => Column::Text(values),
        }
    }
}

enum SlotValue {
    Number(f64),
    Raw([u8; 8]),
}

pub(crate) fn read_sav(bytes: &[u8]) -> Result<Parsed> {
    let mut cur = Cursor::new(bytes);
    match cur.take(4)? {
        b"$FL2" => {}
        b"$FL3" => {
            return Err(SocDataError::unsupported_format(
                "compressed SPSS (.zsav) is not supported",
            ))
        }
        _ => return Err(SocDataError::parse("not an SPSS system file")),
    }
    cur.take(60)?; // product string

    // The layout code reads as 2 or 3 only in the file's byte order.
    let layout_raw: [u8; 4] = cur.take(4)?.try_into().unwrap_or_default();
    let layout_le = i32::from_le_bytes(layout_raw);
    let layout_be = i32::from_be_bytes(layout_raw);
    let endian = if layout_le == 2 || layout_le == 3 {
        Endian::Little
    } else if layout_be == 2 || layout_be == 3 {
        Endian::Big
    } else {
        return Err(SocDataError::parse(format!(
            "unrecognized SPSS layout code {:?}",
            layout_raw
        )));
    };
    cur.set_endian(endian);

    let case_size = cur.i32()?;
    let compression = cur.i32()?;
    match compression {
        COMPRESSION_NONE | COMPRESSION_BYTECODE => {}
        COMPRESSION_ZLIB => {
            return Err(SocDataError::unsupported_format(
                "compressed SPSS (.zsav) is not supported",
            ))
        }
        other => {
            return Err(SocDataError::parse(format!(
                "unknown SPSS compression code {}",
                other
            )))
        }
    }
    let _weight_index = cur.i32()?;
    let ncases = cur.i32()?;
    let bias = cur.f64()?;
    cur.take(9)?; // creation date
    cur.take(8)?; // creation time
    let dataset_label = clean_file_label(cur.take(64)?);
    cur.take(3)?; // header padding

    let mut vars: Vec<SavVar> = Vec::new();
    let mut slots: Vec<SlotOwner> = Vec::new();
    let mut pending_continuations = 0usize;
    let mut raw_value_labels: Vec<(Vec<([u8; 8], String)>, Vec<i32>)> = Vec::new();

    loop {
        let record_type = cur.i32()?;
        match record_type {
            RECORD_VARIABLE => {
                read_variable_record(&mut cur, &mut vars, &mut slots, &mut pending_continuations)?
            }
            RECORD_VALUE_LABELS => {
                let pairs = read_value_label_pairs(&mut cur)?;
                if cur.i32()? != RECORD_VALUE_LABEL_VARS {
                    return Err(SocDataError::parse(
                        "value label record is not followed by a variable index record",
                    ));
                }
                let count = cur.i32()?;
                if count < 0 {
                    return Err(SocDataError::parse("negative variable index count"));
                }
                let mut indexes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    indexes.push(cur.i32()?);
                }
                raw_value_labels.push((pairs, indexes));
            }
            RECORD_VALUE_LABEL_VARS => {
                return Err(SocDataError::parse(
                    "variable index record without a preceding value label record",
                ))
            }
            RECORD_DOCUMENTS => {
                let lines = cur.i32()?;
                if lines < 0 {
                    return Err(SocDataError::parse("negative document line count"));
                }
                cur.take(lines as usize * 80)?;
            }
            RECORD_EXTENSION => {
                let _subtype = cur.i32()?;
                let size = cur.i32()?;
                let count = cur.i32()?;
                if size < 0 || count < 0 {
                    return Err(SocDataError::parse("negative extension record size"));
                }
                cur.take(size as usize * count as usize)?;
            }
            RECORD_TERMINATOR => {
                cur.i32()?; // filler
                break;
            }
            other => {
                return Err(SocDataError::parse(format!(
                    "unknown SPSS record type {} before the dictionary terminator",
                    other
                )))
            }
        }
    }

    if pending_continuations > 0 {
        return Err(SocDataError::parse(
            "string variable is missing continuation records",
        ));
    }
    if case_size >= 0 && case_size as usize != slots.len() {
        return Err(SocDataError::parse(format!(
            "header declares {} slots per case but the dictionary defines {}",
            case_size,
            slots.len()
        )));
    }

    let mut columns: Vec<VarData> = vars
        .iter()
        .map(|var| {
            if var.width == 0 {
                VarData::Numeric(Vec::new())
            } else {
                VarData::Text(Vec::new())
            }
        })
        .collect();
    let mut scratch: Vec<Vec<u8>> = vec![Vec::new(); vars.len()];

    match compression {
        COMPRESSION_NONE => {
            read_uncompressed_cases(&mut cur, &slots, &vars, ncases, &mut columns, &mut scratch)?
        }
        _ => read_bytecode_cases(
            &mut cur,
            &slots,
            &vars,
            ncases,
            bias,
            &mut columns,
            &mut scratch,
        )?,
    }

    let mut value_labels = BTreeMap::new();
    for (pairs, indexes) in &raw_value_labels {
        for index in indexes {
            let slot = index
                .checked_sub(1)
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| slots.get(i))
                .ok_or_else(|| {
                    SocDataError::parse("value label variable index out of range")
                })?;
            let var = &vars[slot.var];
            let mut labels = BTreeMap::new();
            for (raw, label) in pairs {
                let key = if var.width == 0 {
                    format_label_key(f64_from_raw(*raw, endian))
                } else {
                    trimmed(raw)
                };
                labels.insert(key, label.clone());
            }
            value_labels.insert(var.name.clone(), labels);
        }
    }

    let mut variable_labels = BTreeMap::new();
    for var in &vars {
        if let Some(label) = &var.label {
            if !label.is_empty() {
                variable_labels.insert(var.name.clone(), label.clone());
            }
        }
    }

    let named = vars
        .iter()
        .zip(columns)
        .map(|(var, data)| (var.name.clone(), data.finish()))
        .collect();
    let table = ColumnarTable::from_columns(named)?;

    Ok(Parsed {
        table,
        variable_labels,
        value_labels,
        dataset_label,
    })
}

fn read_variable_record(
    cur: &mut Cursor<'_>,
    vars: &mut Vec<SavVar>,
    slots: &mut Vec<SlotOwner>,
    pending_continuations: &mut usize,
) -> Result<()> {
    let width = cur.i32()?;
    let has_label = cur.i32()?;
    let n_missing = cur.i32()?;
    let _print_format = cur.i32()?;
    let _write_format = cur.i32()?;
    let name = trimmed(cur.take(8)?);

    let label = match has_label {
        0 => None,
        1 => {
            let len = cur.i32()?;
            if len < 0 {
                return Err(SocDataError::parse("negative variable label length"));
            }
            let stored = (len as usize + 3) / 4 * 4;
            let raw = cur.take(stored)?;
            Some(trimmed(&raw[..len as usize]))
        }
        other => {
            return Err(SocDataError::parse(format!(
                "invalid variable label flag {}",
                other
            )))
        }
    };

    // User-defined missing values are stored but not applied; only the
    // system missing value maps to NaN.
    if n_missing.unsigned_abs() > 3 {
        return Err(SocDataError::parse(format!(
            "variable '{}' declares {} missing values",
            name, n_missing
        )));
    }
    cur.take(n_missing.unsigned_abs() as usize * 8)?;

    if width == -1 {
        if *pending_continuations == 0 {
            return Err(SocDataError::parse(
                "continuation record without an open string variable",
            ));
        }
        *pending_continuations -= 1;
        if let Some(owner) = slots.last().copied() {
            slots.push(owner);
        }
        return Ok(());
    }
    if *pending_continuations > 0 {
        return Err(SocDataError::parse(
            "string variable is missing continuation records",
        ));
    }

    let var_index = vars.len();
    match width {
        0 => {
            vars.push(SavVar {
                name,
                width,
                label,
            });
            slots.push(SlotOwner {
                var: var_index,
                numeric: true,
            });
        }
        1..=255 => {
            // A string of width w fills ceil(w / 8) slots.
            *pending_continuations = (width as usize + 7) / 8 - 1;
            vars.push(SavVar {
                name,
                width,
                label,
            });
            slots.push(SlotOwner {
                var: var_index,
                numeric: false,
            });
        }
        other => {
            return Err(SocDataError::parse(format!(
                "invalid variable width {}",
                other
            )))
        }
    }
    Ok(())
}

fn read_value_label_pairs(cur: &mut Cursor<'_>) -> Result<Vec<([u8; 8], String)>> {
    let count = cur.i32()?;
    if count < 0 {
        return Err(SocDataError::parse("negative value label count"));
    }
    let mut pairs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let value: [u8; 8] = cur.take(8)?.try_into().unwrap_or_default();
        let label_len = cur.u8()? as usize;
        // Stored so that length byte plus label rounds up to 8 bytes.
        let stored = (label_len + 1 + 7) / 8 * 8 - 1;
        let raw = cur.take(stored)?;
        pairs.push((value, trimmed(&raw[..label_len])));
    }
    Ok(pairs)
}

fn read_uncompressed_cases(
    cur: &mut Cursor<'_>,
    slots: &[SlotOwner],
    vars: &[SavVar],
    ncases: i32,
    columns: &mut [VarData],
    scratch: &mut [Vec<u8>],
) -> Result<()> {
    let case_len = slots.len() * 8;
    if case_len == 0 {
        return Ok(());
    }
    let cases = if ncases >= 0 {
        ncases as usize
    } else {
        // Unknown case count: every remaining byte must belong to a case.
        if cur.remaining() % case_len != 0 {
            return Err(SocDataError::parse(format!(
                "{} trailing bytes after the last whole case",
                cur.remaining() % case_len
            )));
        }
        cur.remaining() / case_len
    };
    for _ in 0..cases {
        for owner in slots {
            if owner.numeric {
                let value = decode_numeric(cur.f64()?);
                push_numeric(columns, owner.var, value);
            } else {
                scratch[owner.var].extend_from_slice(cur.take(8)?);
            }
        }
        flush_strings(vars, columns, scratch);
    }
    Ok(())
}

fn read_bytecode_cases(
    cur: &mut Cursor<'_>,
    slots: &[SlotOwner],
    vars: &[SavVar],
    ncases: i32,
    bias: f64,
    columns: &mut [VarData],
    scratch: &mut [Vec<u8>],
) -> Result<()> {
    if slots.is_empty() {
        return Ok(());
    }
    let mut codes = [0u8; 8];
    let mut code_pos = 8usize;
    let mut finished = false;
    let mut rows = 0usize;
    'cases: loop {
        if ncases >= 0 && rows == ncases as usize {
            break;
        }
        for (position, owner) in slots.iter().enumerate() {
            let value = next_bytecode_slot(
                cur,
                &mut codes,
                &mut code_pos,
                &mut finished,
                bias,
                owner.numeric,
            )?;
            let value = match value {
                Some(value) => value,
                None if position == 0 => break 'cases,
                None => {
                    return Err(SocDataError::parse(
                        "case truncated mid-record in compressed data",
                    ))
                }
            };
            match value {
                SlotValue::Number(v) => push_numeric(columns, owner.var, v),
                SlotValue::Raw(raw) => scratch[owner.var].extend_from_slice(&raw),
            }
        }
        flush_strings(vars, columns, scratch);
        rows += 1;
    }
    Ok(())
}

/// Produce the next 8-byte slot from the bytecode stream, or `None` at the
/// end of data. Literal elements referenced by code 253 follow their
/// command octet and are consumed in code order.
fn next_bytecode_slot(
    cur: &mut Cursor<'_>,
    codes: &mut [u8; 8],
    code_pos: &mut usize,
    finished: &mut bool,
    bias: f64,
    numeric: bool,
) -> Result<Option<SlotValue>> {
    if *finished {
        return Ok(None);
    }
    loop {
        if *code_pos == 8 {
            if cur.is_at_end() {
                *finished = true;
                return Ok(None);
            }
            codes.copy_from_slice(cur.take(8)?);
            *code_pos = 0;
        }
        let code = codes[*code_pos];
        *code_pos += 1;
        let value = match code {
            CODE_PADDING => continue,
            CODE_END_OF_DATA => {
                *finished = true;
                return Ok(None);
            }
            CODE_LITERAL => {
                let raw: [u8; 8] = cur.take(8)?.try_into().unwrap_or_default();
                if numeric {
                    SlotValue::Number(decode_numeric(f64_from_raw(raw, cur.endian())))
                } else {
                    SlotValue::Raw(raw)
                }
            }
            CODE_ALL_SPACES | CODE_SYSMIS => {
                if numeric {
                    SlotValue::Number(f64::NAN)
                } else {
                    SlotValue::Raw(*b"        ")
                }
            }
            code => {
                if numeric {
                    SlotValue::Number(code as f64 - bias)
                } else {
                    SlotValue::Raw(*b"        ")
                }
            }
        };
        return Ok(Some(value));
    }
}

fn push_numeric(columns: &mut [VarData], var: usize, value: f64) {
    if let VarData::Numeric(values) = &mut columns[var] {
        values.push(value);
    }
}

/// Close out every string variable's slot bytes for the current case.
fn flush_strings(vars: &[SavVar], columns: &mut [VarData], scratch: &mut [Vec<u8>]) {
    for (index, var) in vars.iter().enumerate() {
        if var.width <= 0 {
            continue;
        }
        let buffer = &mut scratch[index];
        let width = (var.width as usize).min(buffer.len());
        let text = String::from_utf8_lossy(&buffer[..width]);
        let text = text.trim_end_matches(|c| c == ' ' || c == '\0');
        if let VarData::Text(values) = &mut columns[index] {
            values.push((!text.is_empty()).then(|| text.to_string()));
        }
        buffer.clear();
    }
}

/// System missing is -DBL_MAX; a NaN on disk is treated the same way.
fn decode_numeric(value: f64) -> f64 {
    if value.is_nan() || value == f64::MIN {
        f64::NAN
    } else {
        value
    }
}

fn f64_from_raw(raw: [u8; 8], endian: Endian) -> f64 {
    match endian {
        Endian::Little => f64::from_le_bytes(raw),
        Endian::Big => f64::from_be_bytes(raw),
    }
}

fn trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c| c == ' ' || c == '\0')
        .to_string()
}

fn clean_file_label(bytes: &[u8]) -> Option<String> {
    let label = String::from_utf8_lossy(bytes);
    let trimmed = label.trim_matches(|c| c == ' ' || c == '\0');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(compression: i32, case_size: i32, ncases: i32, file_label: &str) -> Vec<u8> {
        let mut out = b"$FL2".to_vec();
        out.extend_from_slice(&[b' '; 60]);
        out.extend_from_slice(&2i32.to_le_bytes()); // layout code
        out.extend_from_slice(&case_size.to_le_bytes());
        out.extend_from_slice(&compression.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes()); // weight index
        out.extend_from_slice(&ncases.to_le_bytes());
        out.extend_from_slice(&100.0f64.to_le_bytes()); // bias
        out.extend_from_slice(b"01 Jan 26");
        out.extend_from_slice(b"00:00:00");
        let mut label = file_label.as_bytes().to_vec();
        label.resize(64, b' ');
        out.extend_from_slice(&label);
        out.extend_from_slice(&[0, 0, 0]);
        out
    }

    fn var_record(width: i32, name: &str, label: Option<&str>, missing: &[f64]) -> Vec<u8> {
        let mut out = RECORD_VARIABLE.to_le_bytes().to_vec();
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&(label.is_some() as i32).to_le_bytes());
        out.extend_from_slice(&(missing.len() as i32).to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes()); // print format
        out.extend_from_slice(&0i32.to_le_bytes()); // write format
        let mut padded = name.as_bytes().to_vec();
        padded.resize(8, b' ');
        out.extend_from_slice(&padded);
        if let Some(label) = label {
            out.extend_from_slice(&(label.len() as i32).to_le_bytes());
            let stored = (label.len() + 3) / 4 * 4;
            let mut bytes = label.as_bytes().to_vec();
            bytes.resize(stored, b' ');
            out.extend_from_slice(&bytes);
        }
        for value in missing {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    fn value_label_records(pairs: &[(f64, &str)], indexes: &[i32]) -> Vec<u8> {
        let mut out = RECORD_VALUE_LABELS.to_le_bytes().to_vec();
        out.extend_from_slice(&(pairs.len() as i32).to_le_bytes());
        for (value, label) in pairs {
            out.extend_from_slice(&value.to_le_bytes());
            out.push(label.len() as u8);
            let stored = (label.len() + 1 + 7) / 8 * 8 - 1;
            let mut bytes = label.as_bytes().to_vec();
            bytes.resize(stored, b' ');
            out.extend_from_slice(&bytes);
        }
        out.extend_from_slice(&RECORD_VALUE_LABEL_VARS.to_le_bytes());
        out.extend_from_slice(&(indexes.len() as i32).to_le_bytes());
        for index in indexes {
            out.extend_from_slice(&index.to_le_bytes());
        }
        out
    }

    fn terminator() -> Vec<u8> {
        let mut out = RECORD_TERMINATOR.to_le_bytes().to_vec();
        out.extend_from_slice(&0i32.to_le_bytes());
        out
    }

    fn string_slots(text: &str, slot_count: usize) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(slot_count * 8, b' ');
        bytes
    }

    fn numeric_column(parsed: &Parsed, name: &str) -> Vec<f64> {
        match parsed.table.column(name) {
            Some(Column::Numeric(values)) => values.clone(),
            other => panic!("expected numeric column {}, got {:?}", name, other),
        }
    }

    fn text_column(parsed: &Parsed, name: &str) -> Vec<Option<String>> {
        match parsed.table.column(name) {
            Some(Column::Text(values)) => values.clone(),
            other => panic!("expected text column {}, got {:?}", name, other),
        }
    }

    #[test]
    fn test_read_uncompressed_sav() {
        let mut bytes = header(0, 4, 3, "Household survey");
        bytes.extend(var_record(0, "AGE", Some("Age in years"), &[999.0]));
        bytes.extend(var_record(12, "NAME", None, &[]));
        bytes.extend(var_record(-1, "", None, &[]));
        bytes.extend(var_record(0, "GRP", None, &[]));
        bytes.extend(value_label_records(
            &[(1.0, "treatment"), (2.0, "control")],
            &[4],
        ));
        // records the reader skips: documents and an extension
        bytes.extend(RECORD_DOCUMENTS.to_le_bytes());
        bytes.extend(1i32.to_le_bytes());
        bytes.extend([b' '; 80]);
        bytes.extend(RECORD_EXTENSION.to_le_bytes());
        bytes.extend(13i32.to_le_bytes());
        bytes.extend(1i32.to_le_bytes());
        bytes.extend(4i32.to_le_bytes());
        bytes.extend(b"abcd");
        bytes.extend(terminator());

        bytes.extend(25.0f64.to_le_bytes());
        bytes.extend(string_slots("ada lovelace", 2));
        bytes.extend(1.0f64.to_le_bytes());

        bytes.extend(f64::MIN.to_le_bytes()); // system missing
        bytes.extend(string_slots("bob", 2));
        bytes.extend(2.0f64.to_le_bytes());

        bytes.extend(40.0f64.to_le_bytes());
        bytes.extend(string_slots("", 2));
        bytes.extend(1.0f64.to_le_bytes());

        let parsed = read_sav(&bytes).unwrap();
        assert_eq!(parsed.table.row_count(), 3);
        assert_eq!(parsed.table.column_count(), 3);
        assert_eq!(parsed.dataset_label.as_deref(), Some("Household survey"));

        let age = numeric_column(&parsed, "AGE");
        assert_eq!(age[0], 25.0);
        assert!(age[1].is_nan());
        assert_eq!(age[2], 40.0);

        let name = text_column(&parsed, "NAME");
        assert_eq!(name[0].as_deref(), Some("ada lovelace"));
        assert_eq!(name[1].as_deref(), Some("bob"));
        assert_eq!(name[2], None);

        assert_eq!(
            parsed.variable_labels.get("AGE").map(String::as_str),
            Some("Age in years")
        );
        let grp_labels = parsed.value_labels.get("GRP").unwrap();
        assert_eq!(grp_labels.get("1").map(String::as_str), Some("treatment"));
        assert_eq!(grp_labels.get("2").map(String::as_str), Some("control"));
    }

    #[test]
    fn test_read_bytecode_compressed_sav() {
        let mut bytes = header(1, 2, -1, "");
        bytes.extend(var_record(0, "X", None, &[]));
        bytes.extend(var_record(4, "S", None, &[]));
        bytes.extend(terminator());

        // Slot codes for three cases, then end of data. Literals follow
        // the command octet in code order.
        bytes.extend([105, CODE_LITERAL, CODE_SYSMIS, CODE_ALL_SPACES, CODE_LITERAL, CODE_LITERAL, CODE_END_OF_DATA, CODE_PADDING]);
        bytes.extend(string_slots("ab", 1));
        bytes.extend(1234.5f64.to_le_bytes());
        bytes.extend(string_slots("cd", 1));

        let parsed = read_sav(&bytes).unwrap();
        assert_eq!(parsed.table.row_count(), 3);

        let x = numeric_column(&parsed, "X");
        assert_eq!(x[0], 5.0); // 105 - bias
        assert!(x[1].is_nan());
        assert_eq!(x[2], 1234.5);

        let s = text_column(&parsed, "S");
        assert_eq!(s[0].as_deref(), Some("ab"));
        assert_eq!(s[1], None);
        assert_eq!(s[2].as_deref(), Some("cd"));
    }

    #[test]
    fn test_uncompressed_with_unknown_case_count() {
        let mut bytes = header(0, 1, -1, "");
        bytes.extend(var_record(0, "X", None, &[]));
        bytes.extend(terminator());
        bytes.extend(1.5f64.to_le_bytes());
        bytes.extend(2.5f64.to_le_bytes());

        let parsed = read_sav(&bytes).unwrap();
        assert_eq!(parsed.table.row_count(), 2);
        assert_eq!(numeric_column(&parsed, "X"), vec![1.5, 2.5]);
    }

    #[test]
    fn test_zlib_compressed_header_is_rejected() {
        let mut bytes = header(2, 0, 0, "");
        bytes.extend(terminator());
        assert!(matches!(
            read_sav(&bytes),
            Err(SocDataError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_fl3_magic_is_rejected() {
        let mut bytes = header(0, 0, 0, "");
        bytes[..4].copy_from_slice(b"$FL3");
        assert!(matches!(
            read_sav(&bytes),
            Err(SocDataError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_unknown_record_type_is_a_parse_error() {
        let mut bytes = header(0, 0, 0, "");
        bytes.extend(11i32.to_le_bytes());
        assert!(matches!(read_sav(&bytes), Err(SocDataError::Parse { .. })));
    }

    #[test]
    fn test_big_endian_header_is_detected() {
        let mut bytes = b"$FL2".to_vec();
        bytes.extend([b' '; 60]);
        bytes.extend(2i32.to_be_bytes());
        bytes.extend(1i32.to_be_bytes()); // case size
        bytes.extend(0i32.to_be_bytes()); // compression
        bytes.extend(0i32.to_be_bytes()); // weight index
        bytes.extend(1i32.to_be_bytes()); // ncases
        bytes.extend(100.0f64.to_be_bytes());
        bytes.extend(b"01 Jan 26");
        bytes.extend(b"00:00:00");
        bytes.extend([b' '; 64]);
        bytes.extend([0, 0, 0]);
        // one numeric variable, big-endian throughout
        bytes.extend(2i32.to_be_bytes());
        bytes.extend(0i32.to_be_bytes());
        bytes.extend(0i32.to_be_bytes());
        bytes.extend(0i32.to_be_bytes());
        bytes.extend(0i32.to_be_bytes());
        bytes.extend(0i32.to_be_bytes());
        bytes.extend(*b"X       ");
        bytes.extend(999i32.to_be_bytes());
        bytes.extend(0i32.to_be_bytes());
        bytes.extend(7.25f64.to_be_bytes());

        let parsed = read_sav(&bytes).unwrap();
        assert_eq!(numeric_column(&parsed, "X"), vec![7.25]);
    }
}

//! Stata `.dta` reader for releases 117 and 118.
//!
//! These releases wrap fixed binary sections in XML-ish tags and carry a
//! `<map>` of absolute section offsets, which this reader follows instead of
//! walking every section. Both byte orders are handled. Older pre-XML
//! releases are rejected during sniffing; release 119 (more than 32k
//! variables) has not come up in practice.
//!
//! Sections consumed: header, map, variable types, names, value-label set
//! names, variable labels, data, strLs, and value-label tables. Formats,
//! sort order, and characteristics are skipped via the map.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SocDataError};
use crate::normalize::{zero_terminated, Cursor, Endian, Parsed};
use crate::table::{Column, ColumnarTable};

// Variable type codes. 1..=2045 is a fixed-width string of that many bytes.
const TYPE_STRL: u16 = 32768;
const TYPE_DOUBLE: u16 = 65526;
const TYPE_FLOAT: u16 = 65527;
const TYPE_LONG: u16 = 65528;
const TYPE_INT: u16 = 65529;
const TYPE_BYTE: u16 = 65530;
const MAX_STR_WIDTH: u16 = 2045;

// Largest non-missing value per integer type; everything above is one of
// the missing codes (`.`, `.a` .. `.z`).
const MAX_NONMISSING_I8: i8 = 100;
const MAX_NONMISSING_I16: i16 = 32_740;
const MAX_NONMISSING_I32: i32 = 2_147_483_620;

// GSO payload kinds in the strL section.
const GSO_BINARY: u8 = 129;
const GSO_TEXT: u8 = 130;

/// Smallest float missing code is 2^127; doubles use 2^1023.
fn is_missing_f32(value: f32) -> bool {
    !value.is_finite() || value >= f32::from_bits(0x7f00_0000)
}

fn is_missing_f64(value: f64) -> bool {
    !value.is_finite() || value >= f64::from_bits(0x7fe0_0000_0000_0000)
}

pub(crate) fn read_dta(bytes: &[u8]) -> Result<Parsed> {
    let mut cur = Cursor::new(bytes);
    cur.expect(b"<stata_dta>")?;
    cur.expect(b"<header>")?;

    cur.expect(b"<release>")?;
    let release: u16 = std::str::from_utf8(cur.take(3)?)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SocDataError::parse("unreadable release field in .dta header"))?;
    if release != 117 && release != 118 {
        return Err(SocDataError::unsupported_format(format!(
            "Stata .dta release {} (supported: 117 and 118)",
            release
        )));
    }
    cur.expect(b"</release>")?;

    cur.expect(b"<byteorder>")?;
    let endian = match cur.take(3)? {
        b"LSF" => Endian::Little,
        b"MSF" => Endian::Big,
        other => {
            return Err(SocDataError::parse(format!(
                "unknown byte order {:?} in .dta header",
                String::from_utf8_lossy(other)
            )))
        }
    };
    cur.set_endian(endian);
    cur.expect(b"</byteorder>")?;

    cur.expect(b"<K>")?;
    let var_count = cur.u16()? as usize;
    cur.expect(b"</K>")?;

    cur.expect(b"<N>")?;
    let row_count = if release == 117 {
        cur.u32()? as u64
    } else {
        cur.u64()?
    };
    cur.expect(b"</N>")?;

    cur.expect(b"<label>")?;
    let label_len = if release == 117 {
        cur.u8()? as usize
    } else {
        cur.u16()? as usize
    };
    let dataset_label = clean_label(cur.take(label_len)?);
    cur.expect(b"</label>")?;

    cur.expect(b"<timestamp>")?;
    let timestamp_len = cur.u8()? as usize;
    cur.take(timestamp_len)?;
    cur.expect(b"</timestamp>")?;
    cur.expect(b"</header>")?;

    // 14 absolute offsets: file start, map, then each section in file order,
    // closing tag, end of file.
    cur.expect(b"<map>")?;
    let mut map = [0u64; 14];
    for slot in map.iter_mut() {
        *slot = cur.u64()?;
    }
    cur.expect(b"</map>")?;

    let name_width = if release == 117 { 33 } else { 129 };
    let varlabel_width = if release == 117 { 81 } else { 321 };

    cur.seek(map[2])?;
    cur.expect(b"<variable_types>")?;
    let mut types = Vec::with_capacity(var_count);
    for _ in 0..var_count {
        types.push(cur.u16()?);
    }

    cur.seek(map[3])?;
    cur.expect(b"<varnames>")?;
    let mut names = Vec::with_capacity(var_count);
    for _ in 0..var_count {
        names.push(zero_terminated(cur.take(name_width)?));
    }

    cur.seek(map[6])?;
    cur.expect(b"<value_label_names>")?;
    let mut label_set_names = Vec::with_capacity(var_count);
    for _ in 0..var_count {
        label_set_names.push(zero_terminated(cur.take(name_width)?));
    }

    cur.seek(map[7])?;
    cur.expect(b"<variable_labels>")?;
    let mut var_labels = Vec::with_capacity(var_count);
    for _ in 0..var_count {
        var_labels.push(zero_terminated(cur.take(varlabel_width)?));
    }

    // strL blocks are resolved while decoding rows, so read them first.
    let strls = if types.iter().any(|&t| t == TYPE_STRL) {
        cur.seek(map[10])?;
        read_strls(&mut cur, release)?
    } else {
        HashMap::new()
    };

    let mut slots = types
        .iter()
        .map(|&ty| slot_for_type(ty))
        .collect::<Result<Vec<_>>>()?;

    cur.seek(map[9])?;
    cur.expect(b"<data>")?;
    if var_count > 0 {
        for _ in 0..row_count {
            for (slot, &ty) in slots.iter_mut().zip(&types) {
                match slot {
                    Slot::Numeric(values) => values.push(read_numeric_cell(&mut cur, ty)?),
                    Slot::Text(values) => {
                        values.push(read_text_cell(&mut cur, ty, release, &strls)?)
                    }
                }
            }
        }
    }

    cur.seek(map[11])?;
    let label_tables = read_value_label_tables(&mut cur, name_width)?;

    let columns = names
        .iter()
        .cloned()
        .zip(slots.into_iter().map(Slot::finish))
        .collect();
    let table = ColumnarTable::from_columns(columns)?;

    let mut variable_labels = BTreeMap::new();
    for (name, label) in names.iter().zip(&var_labels) {
        if !label.is_empty() {
            variable_labels.insert(name.clone(), label.clone());
        }
    }

    let mut value_labels = BTreeMap::new();
    for (name, set_name) in names.iter().zip(&label_set_names) {
        if set_name.is_empty() {
            continue;
        }
        if let Some(labels) = label_tables.get(set_name) {
            value_labels.insert(name.clone(), labels.clone());
        }
    }

    Ok(Parsed {
        table,
        variable_labels,
        value_labels,
        dataset_label,
    })
}

enum Slot {
    Numeric(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl Slot {
    fn finish(self) -> Column {
        match self {
            Slot::Numeric(values) => Column::Numeric(values),
            Slot::Text(values) => Column::Text(values),
        }
    }
}

fn slot_for_type(ty: u16) -> Result<Slot> {
    match ty {
        1..=MAX_STR_WIDTH | TYPE_STRL => Ok(Slot::Text(Vec::new())),
        TYPE_DOUBLE | TYPE_FLOAT | TYPE_LONG | TYPE_INT | TYPE_BYTE => {
            Ok(Slot::Numeric(Vec::new()))
        }
        other => Err(SocDataError::parse(format!(
            "unsupported Stata variable type code {}",
            other
        ))),
    }
}

fn read_numeric_cell(cur: &mut Cursor<'_>, ty: u16) -> Result<f64> {
    Ok(match ty {
        TYPE_BYTE => {
            let v = cur.i8()?;
            if v > MAX_NONMISSING_I8 {
                f64::NAN
            } else {
                v as f64
            }
        }
        TYPE_INT => {
            let v = cur.i16()?;
            if v > MAX_NONMISSING_I16 {
                f64::NAN
            } else {
                v as f64
            }
        }
        TYPE_LONG => {
            let v = cur.i32()?;
            if v > MAX_NONMISSING_I32 {
                f64::NAN
            } else {
                v as f64
            }
        }
        TYPE_FLOAT => {
            let v = cur.f32()?;
            if is_missing_f32(v) {
                f64::NAN
            } else {
                v as f64
            }
        }
        TYPE_DOUBLE => {
            let v = cur.f64()?;
            if is_missing_f64(v) {
                f64::NAN
            } else {
                v
            }
        }
        other => {
            return Err(SocDataError::parse(format!(
                "type code {} is not numeric",
                other
            )))
        }
    })
}

fn read_text_cell(
    cur: &mut Cursor<'_>,
    ty: u16,
    release: u16,
    strls: &HashMap<u64, String>,
) -> Result<Option<String>> {
    if ty == TYPE_STRL {
        let key = if release == 117 {
            let v = cur.u32()? as u64;
            let o = cur.u32()? as u64;
            strl_key(release, v, o, cur.endian())
        } else {
            let v = cur.u16()? as u64;
            let o = u48(cur)?;
            strl_key(release, v, o, cur.endian())
        };
        if key == 0 {
            return Ok(None);
        }
        return match strls.get(&key) {
            Some(text) if text.is_empty() => Ok(None),
            Some(text) => Ok(Some(text.clone())),
            None => Err(SocDataError::parse(
                "strL reference points at no GSO block",
            )),
        };
    }
    let text = zero_terminated(cur.take(ty as usize)?);
    Ok((!text.is_empty()).then_some(text))
}

/// Combine a (v, o) strL reference into the lookup key equal to reading the
/// 8-byte in-row reference as one integer. The packing differs per release:
/// 117 splits the 8 bytes as u32+u32, 118 as u16+u48.
fn strl_key(release: u16, v: u64, o: u64, endian: Endian) -> u64 {
    match (release, endian) {
        (117, Endian::Little) => (o << 32) | v,
        (117, Endian::Big) => (v << 32) | o,
        (_, Endian::Little) => (o << 16) | v,
        (_, Endian::Big) => (v << 48) | o,
    }
}

fn u48(cur: &mut Cursor<'_>) -> Result<u64> {
    let raw = cur.take(6)?;
    let mut buf = [0u8; 8];
    match cur.endian() {
        Endian::Little => {
            buf[..6].copy_from_slice(raw);
            Ok(u64::from_le_bytes(buf))
        }
        Endian::Big => {
            buf[2..].copy_from_slice(raw);
            Ok(u64::from_be_bytes(buf))
        }
    }
}

fn read_strls(cur: &mut Cursor<'_>, release: u16) -> Result<HashMap<u64, String>> {
    cur.expect(b"<strls>")?;
    let mut blocks = HashMap::new();
    while !cur.peek(b"</strls>") {
        cur.expect(b"GSO")?;
        let (v, o) = if release == 117 {
            (cur.u32()? as u64, cur.u32()? as u64)
        } else {
            (cur.u32()? as u64, cur.u64()?)
        };
        let key = strl_key(release, v, o, cur.endian());
        let kind = cur.u8()?;
        let len = cur.u32()? as usize;
        let payload = cur.take(len)?;
        let payload = match kind {
            // text payloads carry a trailing NUL, binary ones do not
            GSO_TEXT => payload.strip_suffix(&[0u8][..]).unwrap_or(payload),
            GSO_BINARY => payload,
            other => {
                return Err(SocDataError::parse(format!(
                    "unknown GSO payload kind {}",
                    other
                )))
            }
        };
        blocks.insert(key, String::from_utf8_lossy(payload).into_owned());
    }
    cur.expect(b"</strls>")?;
    Ok(blocks)
}

fn read_value_label_tables(
    cur: &mut Cursor<'_>,
    name_width: usize,
) -> Result<HashMap<String, BTreeMap<String, String>>> {
    cur.expect(b"<value_labels>")?;
    let mut tables = HashMap::new();
    while cur.peek(b"<lbl>") {
        cur.expect(b"<lbl>")?;
        let _table_len = cur.u32()?;
        let set_name = zero_terminated(cur.take(name_width)?);
        cur.take(3)?; // alignment padding
        let count = cur.u32()? as usize;
        let text_len = cur.u32()? as usize;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(cur.u32()? as usize);
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(cur.i32()?);
        }
        let text = cur.take(text_len)?;

        let mut labels = BTreeMap::new();
        for (offset, value) in offsets.iter().zip(&values) {
            if *offset > text.len() {
                return Err(SocDataError::parse(
                    "value label text offset out of range",
                ));
            }
            labels.insert(value.to_string(), zero_terminated(&text[*offset..]));
        }
        cur.expect(b"</lbl>")?;
        tables.insert(set_name, labels);
    }
    cur.expect(b"</value_labels>")?;
    Ok(tables)
}

fn clean_label(bytes: &[u8]) -> Option<String> {
    let label = String::from_utf8_lossy(bytes);
    let trimmed = label.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

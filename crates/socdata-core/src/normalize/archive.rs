//! Zip archive handling: pick exactly one main data member.
//!
//! Survey releases often ship as a zip holding the data file next to
//! codebooks and readme files. Selection is deterministic: statistical
//! formats outrank delimited text, bigger outranks smaller within a rank,
//! and name order settles exact ties. Documentation members never compete.

use std::io::Read;

use tracing::debug;
use zip::ZipArchive;

use crate::error::{Result, SocDataError};

/// Extensions eligible as data members, by preference rank. `.zsav` is a
/// candidate on purpose: selecting it yields the explicit unsupported-format
/// error instead of a misleading "no data file" one.
const STAT_EXTENSIONS: [&str; 3] = ["dta", "sav", "zsav"];
const DELIMITED_EXTENSIONS: [&str; 2] = ["csv", "tsv"];

/// One extracted archive member.
#[derive(Debug)]
pub(crate) struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct Candidate {
    rank: u8,
    size: u64,
    index: usize,
    name: String,
}

/// Select and extract the main data member of a zip archive.
pub(crate) fn select_data_entry(bytes: &[u8]) -> Result<ArchiveEntry> {
    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| SocDataError::parse(format!("zip archive did not open: {}", e)))?;

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut passed_over: Vec<String> = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| SocDataError::parse(format!("zip entry {} unreadable: {}", index, e)))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if is_documentation(&name) {
            continue;
        }
        match candidate_rank(&name) {
            Some(rank) => candidates.push(Candidate {
                rank,
                size: entry.size(),
                index,
                name,
            }),
            None => passed_over.push(name),
        }
    }

    if candidates.is_empty() {
        let detail = if passed_over.is_empty() {
            "archive holds no files".to_string()
        } else {
            format!("archive members: {}", passed_over.join(", "))
        };
        return Err(SocDataError::NoDataFileFound { detail });
    }

    candidates.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then(b.size.cmp(&a.size))
            .then(a.name.cmp(&b.name))
    });
    let chosen = &candidates[0];
    debug!(
        "selected archive member '{}' from {} candidates",
        chosen.name,
        candidates.len()
    );

    let mut entry = archive.by_index(chosen.index).map_err(|e| {
        SocDataError::parse(format!("zip entry '{}' unreadable: {}", chosen.name, e))
    })?;
    let mut out = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut out).map_err(|e| {
        SocDataError::parse(format!("zip entry '{}' did not extract: {}", chosen.name, e))
    })?;
    Ok(ArchiveEntry {
        name: chosen.name.clone(),
        bytes: out,
    })
}

/// Members under a `doc` path component, or named like a readme, are
/// documentation regardless of extension.
fn is_documentation(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let mut components = lower.split('/').rev();
    let file_name = components.next().unwrap_or("");
    file_name.contains("readme") || components.any(|part| part == "doc")
}

fn candidate_rank(name: &str) -> Option<u8> {
    let file_name = name.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if STAT_EXTENSIONS.contains(&ext.as_str()) {
        Some(0)
    } else if DELIMITED_EXTENSIONS.contains(&ext.as_str()) {
        Some(1)
    } else {
        None
    }
}

//! Input format detection.
//!
//! Detection is a fixed decision list, not a parse-and-hope cascade: magic
//! bytes first, then the file-name extension hint, then a text heuristic
//! for extensionless delimited input. The result is a tagged format; the
//! per-format readers do the real validation.

use std::path::Path;

use tracing::debug;

use crate::error::{Result, SocDataError};
use crate::normalize::delimited::DELIMITER_CANDIDATES;

/// Tagged input format, resolved before any parsing starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// Delimited text (CSV/TSV and friends).
    Delimited,
    /// Stata `.dta`, releases 117 and 118.
    Stata,
    /// SPSS `.sav` system file.
    Spss,
    /// Zip archive wrapping one of the above.
    Archive,
}

impl DataFormat {
    pub fn name(&self) -> &'static str {
        match self {
            DataFormat::Delimited => "delimited",
            DataFormat::Stata => "stata",
            DataFormat::Spss => "spss",
            DataFormat::Archive => "archive",
        }
    }
}

mod magic {
    /// Zip local-file header.
    pub const ZIP: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
    /// Stata releases 117+ open with an XML-ish document tag.
    pub const STATA_XML: &[u8] = b"<stata_dta>";
    /// SPSS system file.
    pub const SPSS: &[u8] = b"$FL2";
    /// zlib-compressed SPSS (`.zsav`), recognized only to reject it.
    pub const SPSS_COMPRESSED: &[u8] = b"$FL3";
}

/// How many bytes the text heuristic samples.
const TEXT_SAMPLE_LEN: usize = 4096;

/// Detect the format of `bytes`, optionally helped by a file-name hint.
///
/// Undetectable input is an `UnsupportedFormat` error; so are formats that
/// are recognized but deliberately not handled (legacy Stata, `.zsav`).
pub fn sniff_format(bytes: &[u8], name_hint: Option<&str>) -> Result<DataFormat> {
    if let Some(format) = sniff_magic(bytes)? {
        debug!(format = format.name(), "format detected by magic bytes");
        return Ok(format);
    }

    if let Some(ext) = extension_of(name_hint) {
        if let Some(format) = sniff_extension(&ext, bytes)? {
            debug!(format = format.name(), ext = %ext, "format detected by extension");
            return Ok(format);
        }
    }

    if looks_like_delimited_text(bytes) {
        debug!("format detected by text heuristic");
        return Ok(DataFormat::Delimited);
    }

    Err(SocDataError::unsupported_format(match name_hint {
        Some(hint) => format!("could not detect format of '{}'", hint),
        None => "could not detect input format".to_string(),
    }))
}

fn sniff_magic(bytes: &[u8]) -> Result<Option<DataFormat>> {
    if bytes.starts_with(magic::ZIP) {
        return Ok(Some(DataFormat::Archive));
    }
    if bytes.starts_with(magic::STATA_XML) {
        return Ok(Some(DataFormat::Stata));
    }
    if bytes.starts_with(magic::SPSS) {
        return Ok(Some(DataFormat::Spss));
    }
    if bytes.starts_with(magic::SPSS_COMPRESSED) {
        return Err(SocDataError::unsupported_format(
            "compressed SPSS (.zsav) is not supported",
        ));
    }
    Ok(None)
}

fn sniff_extension(ext: &str, bytes: &[u8]) -> Result<Option<DataFormat>> {
    match ext {
        "csv" | "tsv" | "txt" => Ok(Some(DataFormat::Delimited)),
        "dta" => {
            // 117+ would have matched the XML magic already; a leading
            // version byte in the 102..=115 range is a pre-XML release.
            if let Some(release) = legacy_stata_release(bytes) {
                return Err(SocDataError::unsupported_format(format!(
                    "legacy Stata .dta release {} (supported: 117 and 118)",
                    release
                )));
            }
            Ok(Some(DataFormat::Stata))
        }
        "sav" => Ok(Some(DataFormat::Spss)),
        "zsav" => Err(SocDataError::unsupported_format(
            "compressed SPSS (.zsav) is not supported",
        )),
        "zip" => Ok(Some(DataFormat::Archive)),
        _ => Ok(None),
    }
}

fn extension_of(name_hint: Option<&str>) -> Option<String> {
    let ext = Path::new(name_hint?).extension()?;
    Some(ext.to_string_lossy().to_ascii_lowercase())
}

fn legacy_stata_release(bytes: &[u8]) -> Option<u8> {
    match bytes.first() {
        Some(&release) if (102..=115).contains(&release) => Some(release),
        _ => None,
    }
}

/// True when a byte sample reads as delimited text: valid UTF-8 (allowing a
/// cut-off trailing codepoint), no NUL bytes, and at least one candidate
/// delimiter present.
fn looks_like_delimited_text(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(TEXT_SAMPLE_LEN)];
    if sample.is_empty() || sample.contains(&0) {
        return false;
    }
    let text = match std::str::from_utf8(sample) {
        Ok(text) => text,
        Err(e) => {
            let valid = e.valid_up_to();
            // a codepoint split by the sample window is fine; an invalid
            // sequence in the middle is not
            if sample.len() - valid > 3 {
                return false;
            }
            match std::str::from_utf8(&sample[..valid]) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
    };
    DELIMITER_CANDIDATES
        .iter()
        .any(|&d| text.as_bytes().contains(&d))
}

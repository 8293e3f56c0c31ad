//! Upload gate building blocks: filename sanitization, the fixed
//! extension/MIME table, and magic-byte sniffing.
//!
//! Every check here treats its input as hostile: names may carry directory
//! components, declared MIME types may lie, and content may not match the
//! extension at all.

use std::path::Path;

/// Number of leading bytes inspected by [`check_magic_bytes`].
pub const MAGIC_SNIFF_LEN: usize = 8192;

const MAX_FILENAME_LEN: usize = 120;
const FALLBACK_FILENAME: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File extension not allowed: {0}")]
    InvalidExtension(String),

    #[error("Content type {content_type} not allowed for .{extension}")]
    InvalidContentType {
        content_type: String,
        extension: String,
    },

    #[error("File content does not match .{0} format")]
    MagicByteMismatch(String),

    #[error("Empty file")]
    EmptyFile,

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid page slug: {0}")]
    InvalidSlug(String),
}

/// Sanitize an uploaded filename for storage and display.
///
/// Directory components are stripped, anything outside `[A-Za-z0-9._-]` is
/// replaced with `_`, runs of replacements collapse to one, leading dots are
/// removed, and the result is capped at 120 characters. An empty result
/// falls back to a generic name.
pub fn sanitize_filename(original: &str) -> String {
    // Strip directory components on both separator conventions; uploads
    // from Windows clients carry backslashes.
    let base = original.rsplit(['/', '\\']).next().unwrap_or("");

    let mut out = String::with_capacity(base.len().min(MAX_FILENAME_LEN));
    let mut last_was_replacement = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            out.push(c);
            last_was_replacement = false;
        } else if !last_was_replacement {
            out.push('_');
            last_was_replacement = true;
        }
    }

    let trimmed = out.trim_start_matches('.');
    let mut name: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    if name.is_empty() || name.chars().all(|c| c == '_') {
        name = FALLBACK_FILENAME.to_string();
    }
    name
}

/// Validate a page slug: lowercase alphanumerics and dashes, 1..=64 chars.
pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let ok = !slug.is_empty()
        && slug.len() <= 64
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidSlug(slug.to_string()))
    }
}

/// Lower-cased extension of a sanitized filename.
pub fn derive_extension(filename: &str) -> Result<String, ValidationError> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ValidationError::InvalidFilename(filename.to_string()))
}

/// The fixed extension -> allowed-MIME-set table. Unknown extensions are
/// rejected outright.
pub fn allowed_mime_types(extension: &str) -> Option<&'static [&'static str]> {
    let allowed: &'static [&'static str] = match extension {
        "pdf" => &["application/pdf"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        "pptx" => &["application/vnd.openxmlformats-officedocument.presentationml.presentation"],
        "txt" => &["text/plain"],
        "md" => &["text/markdown", "text/plain"],
        "csv" => &["text/csv", "text/plain"],
        "png" => &["image/png"],
        "jpg" | "jpeg" => &["image/jpeg"],
        "gif" => &["image/gif"],
        "webp" => &["image/webp"],
        _ => return None,
    };
    Some(allowed)
}

/// Format family used for magic-byte sniffing.
enum MagicFamily {
    Pdf,
    OfficeZip,
    PlainText,
    Png,
    Jpeg,
    Gif,
    WebP,
}

fn magic_family(extension: &str) -> Option<MagicFamily> {
    match extension {
        "pdf" => Some(MagicFamily::Pdf),
        "docx" | "xlsx" | "pptx" => Some(MagicFamily::OfficeZip),
        "txt" | "md" | "csv" => Some(MagicFamily::PlainText),
        "png" => Some(MagicFamily::Png),
        "jpg" | "jpeg" => Some(MagicFamily::Jpeg),
        "gif" => Some(MagicFamily::Gif),
        "webp" => Some(MagicFamily::WebP),
        _ => None,
    }
}

/// Verify the leading content bytes against the format the extension
/// claims. `head` is the first [`MAGIC_SNIFF_LEN`] bytes of the file (or
/// the whole file when shorter).
pub fn check_magic_bytes(extension: &str, head: &[u8]) -> Result<(), ValidationError> {
    let mismatch = || ValidationError::MagicByteMismatch(extension.to_string());
    let family = magic_family(extension).ok_or_else(|| {
        // Table and family list must stay in sync; an extension that passed
        // the MIME gate always has a family.
        ValidationError::InvalidExtension(extension.to_string())
    })?;

    let ok = match family {
        MagicFamily::Pdf => head.starts_with(b"%PDF-"),
        // Office formats are ZIP containers; require the local file header.
        MagicFamily::OfficeZip => head.starts_with(b"PK\x03\x04"),
        MagicFamily::PlainText => !head.contains(&0u8),
        MagicFamily::Png => head.starts_with(b"\x89PNG\r\n\x1a\n"),
        MagicFamily::Jpeg => head.starts_with(b"\xFF\xD8\xFF"),
        MagicFamily::Gif => head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a"),
        MagicFamily::WebP => {
            head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP"
        }
    };

    if ok {
        Ok(())
    } else {
        Err(mismatch())
    }
}

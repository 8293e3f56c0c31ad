//! Validation modules

pub mod upload;

pub use upload::{
    allowed_mime_types, check_magic_bytes, derive_extension, sanitize_filename, validate_slug,
    ValidationError, MAGIC_SNIFF_LEN,
};

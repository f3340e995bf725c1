//! `Upload-Metadata` encoding.
//!
//! The header is a comma-separated list of `key base64(value)` pairs.
//! Keys must be non-empty and may not contain spaces or commas.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::constants::{DEFAULT_CONTENT_TYPE, METADATA_FILENAME, METADATA_FILETYPE};

/// Upload metadata. Ordered so the encoded header is deterministic.
pub type Metadata = BTreeMap<String, String>;

/// Errors produced while encoding or decoding metadata.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    #[error("invalid base64 value for key {0:?}")]
    InvalidValue(String),
}

/// Encodes metadata into an `Upload-Metadata` header value.
pub fn encode_metadata(metadata: &Metadata) -> Result<String, MetadataError> {
    let mut pairs = Vec::with_capacity(metadata.len());
    for (key, value) in metadata {
        if !is_valid_key(key) {
            return Err(MetadataError::InvalidKey(key.clone()));
        }
        if value.is_empty() {
            pairs.push(key.clone());
        } else {
            pairs.push(format!("{key} {}", STANDARD.encode(value)));
        }
    }
    Ok(pairs.join(","))
}

/// Decodes an `Upload-Metadata` header value.
pub fn decode_metadata(header: &str) -> Result<Metadata, MetadataError> {
    let mut metadata = Metadata::new();
    for pair in header.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, encoded) = match pair.split_once(' ') {
            Some((k, v)) => (k, v.trim()),
            None => (pair, ""),
        };
        if !is_valid_key(key) {
            return Err(MetadataError::InvalidKey(key.to_string()));
        }
        let value = STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| MetadataError::InvalidValue(key.to_string()))?;
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_graphic() && c != ',')
}

/// Builds the default metadata for a local file: base name and content type.
pub fn metadata_for_path(path: &Path) -> Metadata {
    let mut metadata = Metadata::new();
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        metadata.insert(METADATA_FILENAME.into(), name.to_string());
    }
    let content_type = detect_content_type(path).unwrap_or(DEFAULT_CONTENT_TYPE);
    metadata.insert(METADATA_FILETYPE.into(), content_type.to_string());
    metadata
}

/// Guesses a content type from the file extension.
pub fn detect_content_type(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("webp") => Some("image/webp"),
        Some("pdf") => Some("application/pdf"),
        Some("zip") => Some("application/zip"),
        Some("json") => Some("application/json"),
        Some("txt" | "log") => Some("text/plain"),
        Some("csv") => Some("text/csv"),
        Some("mp4") => Some("video/mp4"),
        Some("mp3") => Some("audio/mpeg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_values() {
        let mut md = Metadata::new();
        md.insert("filename".into(), "world_domination_plan.pdf".into());
        md.insert("is_confidential".into(), String::new());
        let header = encode_metadata(&md).unwrap();
        assert_eq!(
            header,
            "filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==,is_confidential"
        );
    }

    #[test]
    fn decode_header_from_server() {
        let md = decode_metadata("filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==, flag").unwrap();
        assert_eq!(md["filename"], "world_domination_plan.pdf");
        assert_eq!(md["flag"], "");
    }

    #[test]
    fn key_with_space_rejected() {
        let mut md = Metadata::new();
        md.insert("bad key".into(), "v".into());
        assert_eq!(
            encode_metadata(&md),
            Err(MetadataError::InvalidKey("bad key".into()))
        );
    }

    #[test]
    fn empty_key_rejected() {
        let mut md = Metadata::new();
        md.insert(String::new(), "v".into());
        assert!(encode_metadata(&md).is_err());
    }

    #[test]
    fn invalid_base64_rejected() {
        assert_eq!(
            decode_metadata("name !!!"),
            Err(MetadataError::InvalidValue("name".into()))
        );
    }

    #[test]
    fn metadata_for_path_fills_name_and_type() {
        let md = metadata_for_path(Path::new("/tmp/report.PDF"));
        assert_eq!(md[METADATA_FILENAME], "report.PDF");
        assert_eq!(md[METADATA_FILETYPE], "application/pdf");
    }

    #[test]
    fn unknown_extension_falls_back() {
        let md = metadata_for_path(Path::new("blob.xyz"));
        assert_eq!(md[METADATA_FILETYPE], DEFAULT_CONTENT_TYPE);
        assert_eq!(detect_content_type(Path::new("noext")), None);
    }
}

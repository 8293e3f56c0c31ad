//! Attachment records and the on-disk metadata index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of the antivirus gate for a stored attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Scanner ran and reported the file clean.
    Clean,
    /// No scan was performed (mode off, or no scanner available).
    #[default]
    Skipped,
    /// Scanner ran but malfunctioned; the upload was accepted under the
    /// `optional` policy.
    Failed,
}

/// Identity of the user who uploaded an attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploaderInfo {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

/// Authenticated identity performing an operation.
#[derive(Clone, Debug)]
pub struct Actor {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub is_admin: bool,
}

impl Actor {
    pub fn uploader_info(&self) -> UploaderInfo {
        UploaderInfo {
            id: self.id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// One successfully ingested attachment.
///
/// `storage_name` is generated server-side and is the only name ever used
/// to address the blob on disk; `original_name` is the sanitized upload
/// name kept for display and download.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub id: Uuid,
    pub slug: String,
    pub storage_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub extension: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploader: UploaderInfo,
    #[serde(default)]
    pub scan_status: ScanStatus,
    #[serde(default)]
    pub scanner: Option<String>,
}

/// The attachment metadata document: `{ "attachments": [...] }`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttachmentIndex {
    pub attachments: Vec<AttachmentRecord>,
}

impl AttachmentIndex {
    /// Lenient load of a metadata document.
    ///
    /// Records that fail to parse are dropped with a warning rather than
    /// failing the whole index; unknown fields are ignored. Persisted data
    /// is input, not truth.
    pub fn normalize(value: serde_json::Value) -> AttachmentIndex {
        let Some(items) = value.get("attachments").and_then(|v| v.as_array()) else {
            if !value.is_null() {
                tracing::warn!("Attachment index has no attachments array; starting empty");
            }
            return AttachmentIndex::default();
        };

        let mut attachments = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<AttachmentRecord>(item.clone()) {
                Ok(record) => attachments.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed attachment record");
                }
            }
        }
        AttachmentIndex { attachments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_json() -> serde_json::Value {
        serde_json::json!({
            "id": "7b2ab274-40f0-43b7-bd33-07c2431f42f5",
            "slug": "budget",
            "storageName": "20260101120000000-a1b2c3d4.pdf",
            "originalName": "report.pdf",
            "mimeType": "application/pdf",
            "extension": "pdf",
            "sizeBytes": 10240,
            "sha256": "ab".repeat(32),
            "uploadedAt": "2026-01-01T12:00:00Z",
            "uploader": {"id": "u1", "username": "alice", "displayName": "Alice"},
            "scanStatus": "clean",
            "scanner": "clamscan"
        })
    }

    #[test]
    fn normalize_keeps_valid_records() {
        let index = AttachmentIndex::normalize(serde_json::json!({
            "attachments": [record_json()]
        }));
        assert_eq!(index.attachments.len(), 1);
        assert_eq!(index.attachments[0].slug, "budget");
        assert_eq!(index.attachments[0].scan_status, ScanStatus::Clean);
    }

    #[test]
    fn normalize_drops_malformed_records() {
        let mut broken = record_json();
        broken["sizeBytes"] = serde_json::json!("not-a-number");
        let index = AttachmentIndex::normalize(serde_json::json!({
            "attachments": [record_json(), broken, {"junk": true}]
        }));
        assert_eq!(index.attachments.len(), 1);
    }

    #[test]
    fn normalize_defaults_missing_scan_fields() {
        let mut minimal = record_json();
        minimal.as_object_mut().unwrap().remove("scanStatus");
        minimal.as_object_mut().unwrap().remove("scanner");
        let index = AttachmentIndex::normalize(serde_json::json!({
            "attachments": [minimal]
        }));
        assert_eq!(index.attachments[0].scan_status, ScanStatus::Skipped);
        assert!(index.attachments[0].scanner.is_none());
    }

    #[test]
    fn normalize_tolerates_non_document_input() {
        assert!(AttachmentIndex::normalize(serde_json::Value::Null)
            .attachments
            .is_empty());
        assert!(AttachmentIndex::normalize(serde_json::json!([1, 2]))
            .attachments
            .is_empty());
    }

    #[test]
    fn record_serializes_camel_case() {
        let index = AttachmentIndex::normalize(serde_json::json!({
            "attachments": [record_json()]
        }));
        let out = serde_json::to_value(&index.attachments[0]).unwrap();
        assert!(out.get("storageName").is_some());
        assert!(out.get("uploadedAt").is_some());
        assert_eq!(out["uploader"]["displayName"], "Alice");
    }
}

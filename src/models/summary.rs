//! Response projections. Each endpoint serializes one of these named
//! structs; `ObjectRecord` itself never crosses the HTTP boundary.

use super::object::ObjectRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned for each file that was stored and registered by an upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadedFile {
    pub id: Uuid,
    pub share_url: String,
    pub display_name: String,
    pub byte_size: i64,
    pub expires_at: DateTime<Utc>,
    pub has_password: bool,
    pub access_count: i64,
}

impl From<&ObjectRecord> for UploadedFile {
    fn from(record: &ObjectRecord) -> Self {
        Self {
            id: record.id,
            share_url: format!("/share/{}", record.id),
            display_name: record.display_name.clone(),
            byte_size: record.byte_size,
            expires_at: record.expires_at,
            has_password: record.is_protected(),
            access_count: record.access_count,
        }
    }
}

/// Per-file result of a multi-file upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Created(UploadedFile),
    Failed { display_name: String, error: String },
}

/// Metadata-only view of a shared object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FilePreview {
    pub display_name: String,
    pub byte_size: i64,
    pub content_type: String,
    pub has_password: bool,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}

impl FilePreview {
    pub fn from_record(record: &ObjectRecord, now: DateTime<Utc>) -> Self {
        Self {
            display_name: record.display_name.clone(),
            byte_size: record.byte_size,
            content_type: record.content_type.clone(),
            has_password: record.is_protected(),
            access_count: record.access_count,
            created_at: record.created_at,
            expires_at: record.expires_at,
            is_expired: record.is_expired_at(now),
        }
    }
}

/// Listing entry for the owner and admin file views.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileSummary {
    pub id: Uuid,
    pub owner_id: i64,
    pub display_name: String,
    pub byte_size: i64,
    pub content_type: String,
    pub has_password: bool,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}

impl FileSummary {
    pub fn from_record(record: &ObjectRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            display_name: record.display_name.clone(),
            byte_size: record.byte_size,
            content_type: record.content_type.clone(),
            has_password: record.is_protected(),
            access_count: record.access_count,
            created_at: record.created_at,
            expires_at: record.expires_at,
            is_expired: record.is_expired_at(now),
        }
    }
}

/// Aggregate counters read straight from the registry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub total_objects: i64,
    pub active_objects: i64,
    pub total_access_events: i64,
    /// Events since 00:00 UTC of the current day.
    pub today_access_events: i64,
    pub total_bytes_stored: i64,
}

//! Represents a shared object (one uploaded file) and its access log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The unit of sharing: metadata for one uploaded file.
///
/// The payload bytes live in the object store and are reached through
/// `storage_locator`; this struct never carries content.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ObjectRecord {
    /// Unguessable identifier used in share links.
    pub id: Uuid,

    /// Principal that uploaded the object.
    pub owner_id: i64,

    /// Original filename as supplied by the uploader. Informational only.
    pub display_name: String,

    /// Opaque reference the object store resolves to bytes.
    pub storage_locator: String,

    /// Payload size in bytes.
    pub byte_size: i64,

    /// MIME type captured at upload.
    pub content_type: String,

    /// Argon2 PHC string. Presence alone marks the object as protected.
    #[serde(skip_serializing)]
    pub password_verifier: Option<String>,

    /// Number of successful serves.
    pub access_count: i64,

    /// When the object was registered.
    pub created_at: DateTime<Utc>,

    /// Fixed at creation, never changed afterwards.
    pub expires_at: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn is_protected(&self) -> bool {
        self.password_verifier.is_some()
    }

    /// An object is expired strictly after its `expires_at` instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// One successful serve, appended after the bytes were handed out.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct AccessEvent {
    pub object_id: Uuid,

    /// Client network origin (first forwarded hop or socket peer).
    pub client_origin: String,

    /// Client `User-Agent`, empty when absent.
    pub client_agent: String,

    pub accessed_at: DateTime<Utc>,
}

/// Where a serve request came from.
#[derive(Clone, Debug, Default)]
pub struct AccessOrigin {
    pub client_origin: String,
    pub client_agent: String,
}

/// An expired record as seen by the sweeper.
#[derive(Clone, FromRow, Debug)]
pub struct ExpiredObject {
    pub id: Uuid,
    pub storage_locator: String,
}

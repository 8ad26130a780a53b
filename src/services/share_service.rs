//! src/services/share_service.rs
//!
//! ShareService ties the object store and the metadata registry together and
//! enforces the lifecycle of a shared object: create, optionally gate behind a
//! password, serve, delete. Every read path goes through `admit`, which checks
//! existence, then expiry, then the password, in that order.

use super::{
    object_store::{ObjectReader, ObjectStore, StoreError, StoredBlob},
    ownership::{Authorization, authorize_delete},
    password,
    registry::{MetadataRegistry, RegistryError},
};
use crate::{
    clock::Clock,
    models::{
        caller::Caller,
        object::{AccessEvent, AccessOrigin, ObjectRecord},
        summary::{FilePreview, FileSummary, UsageStats},
    },
};
use bytes::Bytes;
use chrono::Duration;
use futures::stream::BoxStream;
use std::{fmt, io, sync::Arc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_RETENTION_HOURS: i64 = 24;
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("file not found")]
    NotFound,
    #[error("file has expired")]
    Gone,
    #[error("password required")]
    PasswordRequired,
    #[error("invalid password")]
    Unauthorized,
    #[error("access denied")]
    Forbidden,
    #[error("storage conflict: {0}")]
    Conflict(String),
    #[error("password verifier error: {0}")]
    Verifier(String),
    #[error("expiry time out of range")]
    ExpiryOutOfRange,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for ShareError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ShareError::NotFound,
            RegistryError::Conflict(id) => ShareError::Conflict(format!("object id `{id}` already exists")),
            other => ShareError::Registry(other),
        }
    }
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Bytes already written to the store, waiting for their record.
#[derive(Clone, Debug)]
pub struct PendingUpload {
    pub display_name: String,
    pub content_type: String,
    pub blob: StoredBlob,
}

/// A record that passed the gate, together with its payload.
pub struct ServedObject {
    pub record: ObjectRecord,
    pub reader: ObjectReader,
}

impl fmt::Debug for ServedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServedObject")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ShareService {
    registry: Arc<dyn MetadataRegistry>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl ShareService {
    pub fn new(
        registry: Arc<dyn MetadataRegistry>,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            retention,
        }
    }

    pub fn registry(&self) -> Arc<dyn MetadataRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Derive the verifier for an upload password. Empty means unprotected.
    pub async fn password_verifier(&self, password: Option<&str>) -> ShareResult<Option<String>> {
        match password {
            Some(p) if !p.is_empty() => password::hash_password_blocking(p.to_string())
                .await
                .map(Some)
                .map_err(|err| ShareError::Verifier(err.to_string())),
            _ => Ok(None),
        }
    }

    /// Write an upload's bytes. The caller must follow up with
    /// `register_upload`, which owns cleanup from here on.
    pub async fn store_upload(
        &self,
        body: BoxStream<'_, io::Result<Bytes>>,
    ) -> ShareResult<StoredBlob> {
        Ok(self.store.put(body).await?)
    }

    /// Create the record for bytes already in the store.
    ///
    /// An id collision is retried once with a fresh id. Any failure that
    /// leaves no record removes the bytes again.
    pub async fn register_upload(
        &self,
        owner_id: i64,
        upload: PendingUpload,
        password_verifier: Option<String>,
    ) -> ShareResult<ObjectRecord> {
        let now = self.clock.now();
        let Some(expires_at) = now.checked_add_signed(self.retention) else {
            error!(retention = %self.retention, "retention pushes expiry past the representable range");
            if let Err(cleanup) = self.store.delete(&upload.blob.locator).await {
                warn!(locator = %upload.blob.locator, error = %cleanup, "failed to remove bytes for rejected upload");
            }
            return Err(ShareError::ExpiryOutOfRange);
        };
        let mut record = ObjectRecord {
            id: Uuid::new_v4(),
            owner_id,
            display_name: upload.display_name,
            storage_locator: upload.blob.locator,
            byte_size: upload.blob.byte_size,
            content_type: upload.content_type,
            password_verifier,
            access_count: 0,
            created_at: now,
            expires_at,
        };

        let mut result = self.registry.create(&record).await;
        if let Err(RegistryError::Conflict(id)) = &result {
            warn!(%id, "object id collision, retrying with a fresh id");
            record.id = Uuid::new_v4();
            result = self.registry.create(&record).await;
        }

        match result {
            Ok(()) => {
                info!(
                    id = %record.id,
                    owner_id,
                    byte_size = record.byte_size,
                    protected = record.is_protected(),
                    "registered shared object"
                );
                Ok(record)
            }
            Err(err) => {
                if let Err(cleanup) = self.store.delete(&record.storage_locator).await {
                    warn!(
                        locator = %record.storage_locator,
                        error = %cleanup,
                        "failed to remove bytes after registry insert failed; orphan scan will reclaim them"
                    );
                }
                if matches!(err, RegistryError::Conflict(_)) {
                    error!(id = %record.id, "object id collided twice");
                }
                Err(err.into())
            }
        }
    }

    /// Store and register a single file.
    pub async fn create_object(
        &self,
        owner_id: i64,
        display_name: impl Into<String>,
        content_type: Option<String>,
        body: BoxStream<'_, io::Result<Bytes>>,
        password: Option<&str>,
    ) -> ShareResult<ObjectRecord> {
        let verifier = self.password_verifier(password).await?;
        let blob = self.store_upload(body).await?;
        let upload = PendingUpload {
            display_name: display_name.into(),
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.into()),
            blob,
        };
        self.register_upload(owner_id, upload, verifier).await
    }

    /// Lookup, then expiry, then password. An expired object never reveals
    /// whether it was protected.
    async fn admit(&self, raw_id: &str, password: Option<&str>) -> ShareResult<ObjectRecord> {
        let id = parse_object_id(raw_id)?;
        let record = self.registry.get(id).await?;

        if record.is_expired_at(self.clock.now()) {
            return Err(ShareError::Gone);
        }

        if let Some(verifier) = record.password_verifier.as_deref() {
            let supplied = password
                .filter(|p| !p.is_empty())
                .ok_or(ShareError::PasswordRequired)?;
            match password::verify_password_blocking(supplied.to_string(), verifier.to_string()).await {
                Ok(true) => {}
                Ok(false) => return Err(ShareError::Unauthorized),
                Err(err) => {
                    error!(id = %record.id, error = %err, "stored password verifier is unusable");
                    return Err(ShareError::Verifier(err.to_string()));
                }
            }
        }

        Ok(record)
    }

    /// Metadata-only view. Same gate as `serve`, but no bytes are read and
    /// nothing is counted.
    pub async fn preview(&self, raw_id: &str, password: Option<&str>) -> ShareResult<FilePreview> {
        let record = self.admit(raw_id, password).await?;
        Ok(FilePreview::from_record(&record, self.clock.now()))
    }

    /// Full serve: gate, open the payload, then count the access.
    pub async fn serve(
        &self,
        raw_id: &str,
        password: Option<&str>,
        origin: AccessOrigin,
    ) -> ShareResult<ServedObject> {
        let mut record = self.admit(raw_id, password).await?;

        let reader = match self.store.get(&record.storage_locator).await {
            Ok(reader) => reader,
            Err(err @ (StoreError::NotFound(_) | StoreError::InvalidLocator)) => {
                error!(
                    id = %record.id,
                    locator = %record.storage_locator,
                    error = %err,
                    "registry references a payload the object store cannot resolve"
                );
                return Err(ShareError::Conflict(format!(
                    "payload for object `{}` is missing",
                    record.id
                )));
            }
            Err(err) => return Err(err.into()),
        };

        self.record_access(&mut record, origin).await;
        Ok(ServedObject { record, reader })
    }

    /// Counting is secondary to serving: failures are logged, never returned.
    async fn record_access(&self, record: &mut ObjectRecord, origin: AccessOrigin) {
        match self.registry.increment_access_count(record.id).await {
            Ok(count) => record.access_count = count,
            Err(err) => warn!(id = %record.id, error = %err, "failed to increment access count"),
        }

        let event = AccessEvent {
            object_id: record.id,
            client_origin: origin.client_origin,
            client_agent: origin.client_agent,
            accessed_at: self.clock.now(),
        };
        if let Err(err) = self.registry.append_access_event(&event).await {
            warn!(id = %record.id, error = %err, "failed to append access event");
        }
    }

    pub async fn list_owned(&self, owner_id: i64) -> ShareResult<Vec<FileSummary>> {
        let now = self.clock.now();
        Ok(self
            .registry
            .list_by_owner(owner_id)
            .await?
            .iter()
            .map(|record| FileSummary::from_record(record, now))
            .collect())
    }

    pub async fn list_all(&self) -> ShareResult<Vec<FileSummary>> {
        let now = self.clock.now();
        Ok(self
            .registry
            .list_all()
            .await?
            .iter()
            .map(|record| FileSummary::from_record(record, now))
            .collect())
    }

    pub async fn usage_stats(&self) -> ShareResult<UsageStats> {
        Ok(self.registry.usage_stats(self.clock.now()).await?)
    }

    /// Delete an object on behalf of `caller`.
    ///
    /// Bytes go first, then the record. A failed byte removal is logged and
    /// the record is removed anyway; the orphan scan reclaims the bytes.
    pub async fn delete(&self, raw_id: &str, caller: &Caller) -> ShareResult<()> {
        let id = parse_object_id(raw_id)?;
        let record = self.registry.get(id).await?;

        if authorize_delete(&record, caller) == Authorization::Denied {
            warn!(%id, user_id = caller.user_id, "delete denied: caller does not own object");
            return Err(ShareError::Forbidden);
        }

        if let Err(err) = self.store.delete(&record.storage_locator).await {
            warn!(
                %id,
                locator = %record.storage_locator,
                error = %err,
                "failed to delete payload; removing record anyway"
            );
        }

        let removed = self.registry.delete(id).await?;
        info!(%id, user_id = caller.user_id, admin = caller.is_admin, removed, "deleted shared object");
        Ok(())
    }
}

/// Anything that is not a UUID cannot name an object.
fn parse_object_id(raw: &str) -> ShareResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ShareError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        db::connect_in_memory,
        services::{
            fake::{FlakyRegistry, MemoryObjectStore},
            registry::SqliteRegistry,
        },
    };
    use chrono::Utc;
    use futures::{StreamExt, stream};
    use std::sync::atomic::Ordering;
    use tokio::io::AsyncReadExt;

    struct Harness {
        service: ShareService,
        store: MemoryObjectStore,
        registry: FlakyRegistry,
        clock: ManualClock,
    }

    async fn harness() -> Harness {
        let pool = connect_in_memory().await.unwrap();
        let registry = FlakyRegistry::new(Arc::new(SqliteRegistry::new(pool)));
        let store = MemoryObjectStore::new();
        let clock = ManualClock::new(Utc::now());
        let service = ShareService::new(
            Arc::new(registry.clone()),
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::hours(DEFAULT_RETENTION_HOURS),
        );
        Harness {
            service,
            store,
            registry,
            clock,
        }
    }

    fn body(bytes: &'static [u8]) -> BoxStream<'static, io::Result<Bytes>> {
        stream::iter(vec![Ok(Bytes::from_static(bytes))]).boxed()
    }

    fn origin() -> AccessOrigin {
        AccessOrigin {
            client_origin: "198.51.100.4".into(),
            client_agent: "test-agent".into(),
        }
    }

    async fn read_all(served: ServedObject) -> Vec<u8> {
        let mut reader = served.reader;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    async fn upload(h: &Harness, owner: i64, password: Option<&str>) -> ObjectRecord {
        h.service
            .create_object(owner, "notes.txt", Some("text/plain".into()), body(b"payload"), password)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn protected_object_walkthrough() {
        let h = harness().await;
        let record = upload(&h, 1, Some("secret")).await;
        assert!(record.is_protected());
        assert_eq!(record.access_count, 0);
        assert_eq!(record.expires_at, record.created_at + Duration::hours(24));
        let id = record.id.to_string();

        assert!(matches!(
            h.service.preview(&id, None).await,
            Err(ShareError::PasswordRequired)
        ));

        let preview = h.service.preview(&id, Some("secret")).await.unwrap();
        assert!(preview.has_password);
        assert_eq!(preview.access_count, 0);

        let served = h.service.serve(&id, Some("secret"), origin()).await.unwrap();
        assert_eq!(served.record.access_count, 1);
        assert_eq!(read_all(served).await, b"payload");

        h.clock.advance(Duration::hours(25));
        assert!(matches!(
            h.service.serve(&id, Some("secret"), origin()).await,
            Err(ShareError::Gone)
        ));
    }

    #[tokio::test]
    async fn public_object_counts_every_serve() {
        let h = harness().await;
        let record = upload(&h, 1, None).await;
        let id = record.id.to_string();

        let preview = h.service.preview(&id, None).await.unwrap();
        assert!(!preview.has_password);

        let first = h.service.serve(&id, None, origin()).await.unwrap();
        assert_eq!(first.record.access_count, 1);
        let second = h.service.serve(&id, None, origin()).await.unwrap();
        assert_eq!(second.record.access_count, 2);

        let stats = h.service.usage_stats().await.unwrap();
        assert_eq!(stats.total_access_events, 2);
    }

    #[tokio::test]
    async fn empty_upload_password_means_public() {
        let h = harness().await;
        let record = upload(&h, 1, Some("")).await;
        assert!(!record.is_protected());
    }

    #[tokio::test]
    async fn wrong_or_missing_password_is_rejected_without_counting() {
        let h = harness().await;
        let record = upload(&h, 1, Some("secret")).await;
        let id = record.id.to_string();

        assert!(matches!(
            h.service.serve(&id, None, origin()).await,
            Err(ShareError::PasswordRequired)
        ));
        assert!(matches!(
            h.service.serve(&id, Some(""), origin()).await,
            Err(ShareError::PasswordRequired)
        ));
        assert!(matches!(
            h.service.serve(&id, Some("guess"), origin()).await,
            Err(ShareError::Unauthorized)
        ));

        let preview = h.service.preview(&id, Some("secret")).await.unwrap();
        assert_eq!(preview.access_count, 0);
    }

    #[tokio::test]
    async fn expiry_wins_over_any_password() {
        let h = harness().await;
        let record = upload(&h, 1, Some("secret")).await;
        let id = record.id.to_string();
        h.clock.advance(Duration::hours(24) + Duration::milliseconds(1));

        for password in [None, Some("secret"), Some("wrong")] {
            assert!(matches!(
                h.service.serve(&id, password, origin()).await,
                Err(ShareError::Gone)
            ));
            assert!(matches!(
                h.service.preview(&id, password).await,
                Err(ShareError::Gone)
            ));
        }
    }

    #[tokio::test]
    async fn object_is_live_up_to_its_expiry_instant() {
        let h = harness().await;
        let record = upload(&h, 1, None).await;
        h.clock.set(record.expires_at);

        let preview = h.service.preview(&record.id.to_string(), None).await.unwrap();
        assert!(!preview.is_expired);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_not_found() {
        let h = harness().await;
        for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string(), "1".to_string()] {
            assert!(matches!(
                h.service.serve(&id, None, origin()).await,
                Err(ShareError::NotFound)
            ));
            assert!(matches!(
                h.service.preview(&id, None).await,
                Err(ShareError::NotFound)
            ));
        }
    }

    #[tokio::test]
    async fn registry_failure_rolls_back_written_bytes() {
        let h = harness().await;
        h.registry.fail_create.store(true, Ordering::SeqCst);

        let result = h
            .service
            .create_object(1, "a.bin", None, body(b"bytes"), None)
            .await;
        assert!(matches!(result, Err(ShareError::Registry(_))));
        assert_eq!(h.store.len(), 0);
        assert!(h.service.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_creates_no_record() {
        let h = harness().await;
        h.store.fail_put.store(true, Ordering::SeqCst);

        let result = h
            .service
            .create_object(1, "a.bin", None, body(b"bytes"), None)
            .await;
        assert!(matches!(result, Err(ShareError::Store(_))));
        assert!(h.service.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn id_collision_is_retried_once() {
        let h = harness().await;
        h.registry.conflicts_remaining.store(1, Ordering::SeqCst);

        let record = upload(&h, 1, None).await;
        assert!(h.store.contains(&record.storage_locator));
        assert_eq!(h.service.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_id_collision_surfaces_conflict_and_cleans_up() {
        let h = harness().await;
        h.registry.conflicts_remaining.store(2, Ordering::SeqCst);

        let result = h
            .service
            .create_object(1, "a.bin", None, body(b"bytes"), None)
            .await;
        assert!(matches!(result, Err(ShareError::Conflict(_))));
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn counting_failures_do_not_block_the_serve() {
        let h = harness().await;
        let record = upload(&h, 1, None).await;
        h.registry.fail_increment.store(true, Ordering::SeqCst);
        h.registry.fail_events.store(true, Ordering::SeqCst);

        let served = h
            .service
            .serve(&record.id.to_string(), None, origin())
            .await
            .unwrap();
        assert_eq!(read_all(served).await, b"payload");

        let preview = h.service.preview(&record.id.to_string(), None).await.unwrap();
        assert_eq!(preview.access_count, 0);
    }

    #[tokio::test]
    async fn missing_payload_is_a_conflict() {
        let h = harness().await;
        let record = upload(&h, 1, None).await;
        h.store.remove_silently(&record.storage_locator);

        assert!(matches!(
            h.service.serve(&record.id.to_string(), None, origin()).await,
            Err(ShareError::Conflict(_))
        ));
        let preview = h.service.preview(&record.id.to_string(), None).await.unwrap();
        assert_eq!(preview.access_count, 0);
    }

    #[tokio::test]
    async fn only_owner_or_admin_may_delete() {
        let h = harness().await;
        let mine = upload(&h, 1, None).await;
        let also_mine = upload(&h, 1, None).await;

        assert!(matches!(
            h.service.delete(&mine.id.to_string(), &Caller::user(2)).await,
            Err(ShareError::Forbidden)
        ));
        assert!(h.store.contains(&mine.storage_locator));

        h.service
            .delete(&mine.id.to_string(), &Caller::user(1))
            .await
            .unwrap();
        h.service
            .delete(&also_mine.id.to_string(), &Caller::admin(42))
            .await
            .unwrap();

        assert_eq!(h.store.len(), 0);
        assert!(matches!(
            h.service.preview(&mine.id.to_string(), None).await,
            Err(ShareError::NotFound)
        ));
    }

    #[tokio::test]
    async fn second_delete_reports_not_found() {
        let h = harness().await;
        let record = upload(&h, 1, None).await;
        let id = record.id.to_string();

        h.service.delete(&id, &Caller::user(1)).await.unwrap();
        assert!(matches!(
            h.service.delete(&id, &Caller::user(1)).await,
            Err(ShareError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_deletes_never_both_fail() {
        let h = harness().await;
        let record = upload(&h, 1, None).await;
        let id = record.id.to_string();
        let owner = Caller::user(1);

        let (a, b) = tokio::join!(h.service.delete(&id, &owner), h.service.delete(&id, &owner));
        for result in [&a, &b] {
            assert!(matches!(result, Ok(()) | Err(ShareError::NotFound)));
        }
        assert!(a.is_ok() || b.is_ok());
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn payload_delete_failure_still_removes_record() {
        let h = harness().await;
        let record = upload(&h, 1, None).await;
        h.store.fail_delete.store(true, Ordering::SeqCst);

        h.service
            .delete(&record.id.to_string(), &Caller::user(1))
            .await
            .unwrap();
        assert!(h.service.list_all().await.unwrap().is_empty());
        assert!(h.store.contains(&record.storage_locator));
    }

    #[tokio::test]
    async fn owner_listing_is_scoped_and_newest_first() {
        let h = harness().await;
        let older = upload(&h, 1, None).await;
        h.clock.advance(Duration::minutes(5));
        let newer = upload(&h, 1, Some("pw")).await;
        upload(&h, 2, None).await;

        let listed = h.service.list_owned(1).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert!(listed[0].has_password);
        assert!(!listed[1].has_password);
        assert_eq!(h.service.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unrepresentable_expiry_is_rejected_and_bytes_removed() {
        let h = harness().await;
        let service = ShareService::new(
            Arc::new(h.registry.clone()),
            Arc::new(h.store.clone()),
            Arc::new(h.clock.clone()),
            Duration::days(365 * 300_000),
        );

        let err = service
            .create_object(1, "a.txt", None, body(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::ExpiryOutOfRange));
        assert_eq!(h.store.len(), 0);
        assert!(service.list_all().await.unwrap().is_empty());
    }
}

//! In-memory and fault-injecting collaborators for unit tests.

use super::{
    object_store::{ObjectReader, ObjectStore, StoreError, StoreResult, StoredBlob},
    registry::{MetadataRegistry, RegistryError, RegistryResult},
};
use crate::models::{
    object::{AccessEvent, ExpiredObject, ObjectRecord},
    summary::UsageStats,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::{
    collections::HashMap,
    io::{self, Cursor},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

/// Payloads kept in a map, with switches to make individual calls fail.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    blobs: Arc<Mutex<HashMap<String, (Bytes, DateTime<Utc>)>>>,
    pub fail_put: Arc<AtomicBool>,
    pub fail_delete: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(locator)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    /// Drop a payload behind the registry's back.
    pub fn remove_silently(&self, locator: &str) {
        self.blobs.lock().unwrap().remove(locator);
    }

    /// Insert a payload that no record references, written at `written_at`.
    pub fn insert_orphan(&self, written_at: DateTime<Utc>) -> String {
        let locator = Uuid::new_v4().simple().to_string();
        self.blobs
            .lock()
            .unwrap()
            .insert(locator.clone(), (Bytes::from_static(b"orphan"), written_at));
        locator
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put<'a>(&self, body: BoxStream<'a, io::Result<Bytes>>) -> StoreResult<StoredBlob> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("disk full")));
        }
        let mut body = body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let locator = Uuid::new_v4().simple().to_string();
        let byte_size = buf.len() as i64;
        self.blobs
            .lock()
            .unwrap()
            .insert(locator.clone(), (buf.freeze(), Utc::now()));
        Ok(StoredBlob { locator, byte_size })
    }

    async fn get(&self, locator: &str) -> StoreResult<ObjectReader> {
        let bytes = self
            .blobs
            .lock()
            .unwrap()
            .get(locator)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(locator.to_string()))?;
        Ok(Box::pin(Cursor::new(bytes.to_vec())))
    }

    async fn delete(&self, locator: &str) -> StoreResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("device busy")));
        }
        self.blobs.lock().unwrap().remove(locator);
        Ok(())
    }

    async fn list_locators(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (_, written_at))| *written_at < cutoff)
            .map(|(locator, _)| locator.clone())
            .collect())
    }
}

/// Wraps a real registry and fails selected calls on demand.
#[derive(Clone)]
pub struct FlakyRegistry {
    inner: Arc<dyn MetadataRegistry>,
    /// Number of upcoming `create` calls that report an id collision.
    pub conflicts_remaining: Arc<AtomicUsize>,
    pub fail_create: Arc<AtomicBool>,
    pub fail_increment: Arc<AtomicBool>,
    pub fail_events: Arc<AtomicBool>,
    pub fail_delete: Arc<AtomicBool>,
}

impl FlakyRegistry {
    pub fn new(inner: Arc<dyn MetadataRegistry>) -> Self {
        Self {
            inner,
            conflicts_remaining: Arc::new(AtomicUsize::new(0)),
            fail_create: Arc::new(AtomicBool::new(false)),
            fail_increment: Arc::new(AtomicBool::new(false)),
            fail_events: Arc::new(AtomicBool::new(false)),
            fail_delete: Arc::new(AtomicBool::new(false)),
        }
    }

    fn unavailable() -> RegistryError {
        RegistryError::Sqlx(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl MetadataRegistry for FlakyRegistry {
    async fn create(&self, record: &ObjectRecord) -> RegistryResult<()> {
        if self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RegistryError::Conflict(record.id));
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.create(record).await
    }

    async fn get(&self, id: Uuid) -> RegistryResult<ObjectRecord> {
        self.inner.get(id).await
    }

    async fn increment_access_count(&self, id: Uuid) -> RegistryResult<i64> {
        if self.fail_increment.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.increment_access_count(id).await
    }

    async fn append_access_event(&self, event: &AccessEvent) -> RegistryResult<()> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.append_access_event(event).await
    }

    async fn delete(&self, id: Uuid) -> RegistryResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete(id).await
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> RegistryResult<Vec<ExpiredObject>> {
        self.inner.list_expired(now, after, limit).await
    }

    async fn list_by_owner(&self, owner_id: i64) -> RegistryResult<Vec<ObjectRecord>> {
        self.inner.list_by_owner(owner_id).await
    }

    async fn list_all(&self) -> RegistryResult<Vec<ObjectRecord>> {
        self.inner.list_all().await
    }

    async fn locator_in_use(&self, locator: &str) -> RegistryResult<bool> {
        self.inner.locator_in_use(locator).await
    }

    async fn usage_stats(&self, now: DateTime<Utc>) -> RegistryResult<UsageStats> {
        self.inner.usage_stats(now).await
    }
}

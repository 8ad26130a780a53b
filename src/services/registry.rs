//! src/services/registry.rs
//!
//! Metadata registry: the authoritative record for every shared object and
//! its append-only access log, backed by SQLite.

use crate::models::{
    object::{AccessEvent, ExpiredObject, ObjectRecord},
    summary::UsageStats,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("object `{0}` not found")]
    NotFound(Uuid),
    #[error("object id `{0}` already exists")]
    Conflict(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait MetadataRegistry: Send + Sync + 'static {
    /// Insert a new record. Fails with `Conflict` if the id is taken.
    async fn create(&self, record: &ObjectRecord) -> RegistryResult<()>;

    async fn get(&self, id: Uuid) -> RegistryResult<ObjectRecord>;

    /// Atomically add one to the access counter and return the new value.
    async fn increment_access_count(&self, id: Uuid) -> RegistryResult<i64>;

    async fn append_access_event(&self, event: &AccessEvent) -> RegistryResult<()>;

    /// Remove a record and its access events. Returns whether a row was
    /// removed; deleting an absent id is not an error.
    async fn delete(&self, id: Uuid) -> RegistryResult<bool>;

    /// One page of records with `expires_at < now`, ordered by id and
    /// starting strictly after `after`.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> RegistryResult<Vec<ExpiredObject>>;

    /// Records owned by `owner_id`, newest first.
    async fn list_by_owner(&self, owner_id: i64) -> RegistryResult<Vec<ObjectRecord>>;

    /// Every record, newest first.
    async fn list_all(&self) -> RegistryResult<Vec<ObjectRecord>>;

    /// Whether any record still points at `locator`.
    async fn locator_in_use(&self, locator: &str) -> RegistryResult<bool>;

    async fn usage_stats(&self, now: DateTime<Utc>) -> RegistryResult<UsageStats>;
}

const RECORD_COLUMNS: &str = "id, owner_id, display_name, storage_locator, byte_size, \
     content_type, password_verifier, access_count, created_at, expires_at";

#[derive(Clone)]
pub struct SqliteRegistry {
    db: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

#[async_trait]
impl MetadataRegistry for SqliteRegistry {
    async fn create(&self, record: &ObjectRecord) -> RegistryResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO objects (
                id, owner_id, display_name, storage_locator, byte_size,
                content_type, password_verifier, access_count, created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(&record.display_name)
        .bind(&record.storage_locator)
        .bind(record.byte_size)
        .bind(&record.content_type)
        .bind(&record.password_verifier)
        .bind(record.access_count)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(RegistryError::Conflict(record.id)),
            Err(err) => Err(RegistryError::Sqlx(err)),
        }
    }

    async fn get(&self, id: Uuid) -> RegistryResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM objects WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => RegistryError::NotFound(id),
            other => RegistryError::Sqlx(other),
        })
    }

    async fn increment_access_count(&self, id: Uuid) -> RegistryResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE objects SET access_count = access_count + 1 WHERE id = ? RETURNING access_count",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RegistryError::NotFound(id))
    }

    async fn append_access_event(&self, event: &AccessEvent) -> RegistryResult<()> {
        let result = sqlx::query(
            "INSERT INTO access_events (object_id, client_origin, client_agent, accessed_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(event.object_id)
        .bind(&event.client_origin)
        .bind(&event.client_agent)
        .bind(event.accessed_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            // The parent row vanished between serve and logging.
            Err(err) if is_foreign_key_violation(&err) => {
                Err(RegistryError::NotFound(event.object_id))
            }
            Err(err) => Err(RegistryError::Sqlx(err)),
        }
    }

    async fn delete(&self, id: Uuid) -> RegistryResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        after: Option<Uuid>,
        limit: i64,
    ) -> RegistryResult<Vec<ExpiredObject>> {
        let rows = match after {
            Some(after) => {
                sqlx::query_as::<_, ExpiredObject>(
                    "SELECT id, storage_locator FROM objects
                     WHERE expires_at < ? AND id > ?
                     ORDER BY id ASC LIMIT ?",
                )
                .bind(now)
                .bind(after)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, ExpiredObject>(
                    "SELECT id, storage_locator FROM objects
                     WHERE expires_at < ?
                     ORDER BY id ASC LIMIT ?",
                )
                .bind(now)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
        };
        Ok(rows)
    }

    async fn list_by_owner(&self, owner_id: i64) -> RegistryResult<Vec<ObjectRecord>> {
        let rows = sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM objects WHERE owner_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn list_all(&self) -> RegistryResult<Vec<ObjectRecord>> {
        let rows = sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM objects ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn locator_in_use(&self, locator: &str) -> RegistryResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM objects WHERE storage_locator = ?)",
        )
        .bind(locator)
        .fetch_one(&self.db)
        .await?;
        Ok(found != 0)
    }

    async fn usage_stats(&self, now: DateTime<Utc>) -> RegistryResult<UsageStats> {
        let (total_objects, active_objects, total_bytes_stored) =
            sqlx::query_as::<_, (i64, i64, i64)>(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN expires_at >= ? THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(byte_size), 0)
                 FROM objects",
            )
            .bind(now)
            .fetch_one(&self.db)
            .await?;

        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let (total_access_events, today_access_events) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN accessed_at >= ? THEN 1 ELSE 0 END), 0)
             FROM access_events",
        )
        .bind(start_of_day)
        .fetch_one(&self.db)
        .await?;

        Ok(UsageStats {
            total_objects,
            active_objects,
            total_access_events,
            today_access_events,
            total_bytes_stored,
        })
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation()
            || db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation()
    )
}

//! src/services/object_store.rs
//!
//! Byte-addressable payload storage. Knows nothing about expiry, owners or
//! passwords: it accepts a stream, hands back an opaque locator, and resolves
//! locators to readers. The disk implementation shards payloads beneath
//! `base_path/{shard}/{shard}/{locator}`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const LOCATOR_LEN: usize = 32;
const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no payload stored under locator `{0}`")]
    NotFound(String),
    #[error("invalid storage locator")]
    InvalidLocator,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Reader over a stored payload.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Result of a successful `put`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    pub locator: String,
    pub byte_size: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Persist the stream under a freshly generated locator.
    async fn put<'a>(&self, body: BoxStream<'a, io::Result<Bytes>>) -> StoreResult<StoredBlob>;

    /// Open the payload for reading. Fails with `NotFound` if absent.
    async fn get(&self, locator: &str) -> StoreResult<ObjectReader>;

    /// Remove the payload. Succeeds if it is already gone.
    async fn delete(&self, locator: &str) -> StoreResult<()>;

    /// Locators whose payload was last written before `cutoff`.
    async fn list_locators(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>>;
}

/// Payload storage on the local filesystem.
#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    base_path: PathBuf,
}

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Locators are lowercase 32-char hex strings; anything else is rejected
    /// before it can be turned into a path.
    fn ensure_locator_safe(locator: &str) -> StoreResult<()> {
        if locator.len() != LOCATOR_LEN
            || !locator
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(StoreError::InvalidLocator);
        }
        Ok(())
    }

    /// Two-level shard from MD5(locator), keeping directories small.
    fn shards(locator: &str) -> (String, String) {
        let digest = md5::compute(locator);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn payload_path(&self, locator: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(locator);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(locator);
        path
    }

    /// Recursively remove empty directories up to the store root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn subdirs(dir: &Path) -> StoreResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                out.push(entry.path());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    /// Stream into a temp file, fsync, then rename into the final location.
    /// The temp file is removed on any error.
    async fn put<'a>(&self, body: BoxStream<'a, io::Result<Bytes>>) -> StoreResult<StoredBlob> {
        let locator = Uuid::new_v4().simple().to_string();
        let file_path = self.payload_path(&locator);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("payload path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        // A concurrent delete may prune the shard between the two calls.
        let mut file = match File::create(&tmp_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&parent).await?;
                File::create(&tmp_path).await?
            }
            Err(err) => return Err(err.into()),
        };

        let mut byte_size: i64 = 0;
        let mut body = body;
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            byte_size += chunk.len() as i64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        debug!(locator = %locator, byte_size, "stored payload");
        Ok(StoredBlob { locator, byte_size })
    }

    async fn get(&self, locator: &str) -> StoreResult<ObjectReader> {
        Self::ensure_locator_safe(locator)?;
        let file = File::open(self.payload_path(locator))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::NotFound(locator.to_string())
                } else {
                    StoreError::Io(err)
                }
            })?;
        Ok(Box::pin(file))
    }

    async fn delete(&self, locator: &str) -> StoreResult<()> {
        Self::ensure_locator_safe(locator)?;
        let file_path = self.payload_path(locator);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Walks both shard levels. Abandoned temp files older than the cutoff
    /// are removed on the way.
    async fn list_locators(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let mut locators = Vec::new();
        for shard_a in Self::subdirs(&self.base_path).await? {
            for shard_b in Self::subdirs(&shard_a).await? {
                let mut entries = match fs::read_dir(&shard_b).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                while let Some(entry) = entries.next_entry().await? {
                    let metadata = match entry.metadata().await {
                        Ok(metadata) if metadata.is_file() => metadata,
                        Ok(_) => continue,
                        Err(err) if err.kind() == ErrorKind::NotFound => continue,
                        Err(err) => return Err(err.into()),
                    };
                    let modified: DateTime<Utc> = metadata.modified()?.into();
                    if modified >= cutoff {
                        continue;
                    }

                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with(TMP_PREFIX) {
                        debug!("removing abandoned temp file {}", entry.path().display());
                        let _ = fs::remove_file(entry.path()).await;
                    } else if Self::ensure_locator_safe(&name).is_ok() {
                        locators.push(name);
                    }
                }
            }
        }
        Ok(locators)
    }
}

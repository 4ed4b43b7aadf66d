//! Local-disk object store for development and tests.
//!
//! Objects are sharded beneath `base_path/{shard}/{shard}/{key}`; the content
//! type lives next to the payload in `<file>.content-type`. Locators use a
//! configurable public base URL so they look the same as S3 locators.

use crate::services::object_store::{
    LocatorBase, ObjectBody, ObjectStore, StorageError, StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const CONTENT_TYPE_SUFFIX: &str = ".content-type";

pub struct LocalObjectStore {
    base_path: PathBuf,
    locators: LocatorBase,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, public_url: &str) -> StorageResult<Self> {
        Ok(Self {
            base_path: base_path.into(),
            locators: LocatorBase::new(public_url)?,
        })
    }

    /// Reject keys that could escape `base_path`.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        let invalid = || StorageError::InvalidKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.split('/').any(|seg| seg == ".." || seg == ".") {
            return Err(invalid());
        }
        if key.ends_with(CONTENT_TYPE_SUFFIX) {
            return Err(invalid());
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(invalid());
        }
        Ok(())
    }

    /// Two-level shard identifiers: the first two bytes of MD5(key) in hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn content_type_path(file_path: &Path) -> PathBuf {
        let mut name = file_path.as_os_str().to_owned();
        name.push(CONTENT_TYPE_SUFFIX);
        PathBuf::from(name)
    }

    async fn write_durably(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = File::create(path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
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
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<String> {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        // The sidecar goes first so a visible payload always has its type.
        Self::write_durably(&Self::content_type_path(&file_path), content_type.as_bytes()).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = Self::write_durably(&tmp_path, &bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        debug!("stored {} bytes at {}", bytes.len(), file_path.display());
        Ok(self.locators.locate(key))
    }

    async fn get(&self, key: &str) -> StorageResult<ObjectBody> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        let content_type = match fs::read_to_string(Self::content_type_path(&file_path)).await {
            Ok(value) => Some(value),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(StorageError::Io(err)),
        };

        Ok(ObjectBody {
            content_type,
            reader: Box::pin(file),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);

        // Deleting a missing object succeeds, as it does on S3.
        for path in [Self::content_type_path(&file_path), file_path.clone()] {
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("file {} already missing", path.display());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    fn key_from_locator(&self, locator: &str) -> StorageResult<String> {
        self.locators.key_of(locator)
    }
}

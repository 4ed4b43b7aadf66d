//! src/services/image_service.rs
//!
//! ImageService: the only place that talks to both the object store and the
//! metadata store. Each operation is a fixed sequence of store calls that
//! stops at the first failure. There is no rollback between the two stores
//! and no per-record locking, so some failures leave them out of step:
//!
//! - create: metadata insert fails after the upload → orphaned object
//! - update: new upload fails after the old object was deleted → the record
//!   points at an object that no longer exists
//! - delete: record delete fails after the object was removed → same
//!
//! Concurrent requests for one id interleave freely and can produce the same
//! states. Callers see these as ordinary failures.

use crate::{
    models::image::ImageRecord,
    services::{
        metadata_store::MetadataStore,
        object_store::{ObjectStore, StorageError, object_key},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{pin::Pin, sync::Arc};
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file received from a client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// An object ready to be streamed back to a client.
pub struct Download {
    /// Object key, recovered from the record's locator.
    pub key: String,
    pub content_type: String,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("no file uploaded")]
    MissingFile,
    #[error("image `{0}` not found")]
    NotFound(String),
    #[error("uploading image failed: {0}")]
    UploadFailed(#[source] StorageError),
    #[error("deleting previous image failed: {0}")]
    DeleteOldFailed(#[source] StorageError),
    #[error("uploading replacement image failed: {0}")]
    UploadNewFailed(#[source] StorageError),
    #[error("deleting image failed: {0}")]
    DeleteFailed(#[source] StorageError),
    #[error("downloading image failed: {0}")]
    DownloadFailed(String),
    #[error(transparent)]
    Metadata(#[from] sqlx::Error),
}

pub type ImageResult<T> = Result<T, ImageError>;

#[derive(Clone)]
pub struct ImageService {
    objects: Arc<dyn ObjectStore>,
    metadata: MetadataStore,
    key_namespace: String,
}

impl ImageService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: MetadataStore,
        key_namespace: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            metadata,
            key_namespace: key_namespace.into(),
        }
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Ids that do not parse can never match a record, so they are not found.
    fn parse_id(id: &str) -> ImageResult<Uuid> {
        Uuid::parse_str(id).map_err(|_| ImageError::NotFound(id.to_string()))
    }

    async fn fetch(&self, id: &str) -> ImageResult<ImageRecord> {
        let uuid = Self::parse_id(id)?;
        self.metadata
            .find_by_id(uuid)
            .await?
            .ok_or_else(|| ImageError::NotFound(id.to_string()))
    }

    /// Upload `file`, then record its locator.
    pub async fn create(&self, file: Option<UploadedFile>) -> ImageResult<ImageRecord> {
        let file = file.ok_or(ImageError::MissingFile)?;
        let key = object_key(&self.key_namespace, &file.file_name, Utc::now());

        let locator = self
            .objects
            .put(&key, file.bytes, &file.content_type)
            .await
            .map_err(ImageError::UploadFailed)?;

        // No compensating delete: if this insert fails the object is orphaned.
        let record = self.metadata.insert(&locator).await?;
        info!(id = %record.id, key = %key, "image created");
        Ok(record)
    }

    pub async fn find(&self, id: &str) -> ImageResult<ImageRecord> {
        self.fetch(id).await
    }

    pub async fn list(&self) -> ImageResult<Vec<ImageRecord>> {
        Ok(self.metadata.find_all().await?)
    }

    /// Replace the image behind `id`: delete the old object, upload the new
    /// one, then repoint the record.
    pub async fn update(&self, id: &str, file: Option<UploadedFile>) -> ImageResult<ImageRecord> {
        let file = file.ok_or(ImageError::MissingFile)?;
        let record = self.fetch(id).await?;

        let old_key = self
            .objects
            .key_from_locator(&record.image_url)
            .map_err(ImageError::DeleteOldFailed)?;
        self.objects
            .delete(&old_key)
            .await
            .map_err(ImageError::DeleteOldFailed)?;

        // From here on a failure leaves the record pointing at a deleted object.
        let new_key = object_key(&self.key_namespace, &file.file_name, Utc::now());
        let locator = self
            .objects
            .put(&new_key, file.bytes, &file.content_type)
            .await
            .map_err(ImageError::UploadNewFailed)?;

        let updated = self
            .metadata
            .update_image_url(record.id, &locator)
            .await?
            .ok_or_else(|| ImageError::NotFound(id.to_string()))?;
        info!(id = %updated.id, old_key = %old_key, new_key = %new_key, "image replaced");
        Ok(updated)
    }

    /// Delete the object, then the record.
    pub async fn delete(&self, id: &str) -> ImageResult<()> {
        let record = self.fetch(id).await?;

        let key = self
            .objects
            .key_from_locator(&record.image_url)
            .map_err(ImageError::DeleteFailed)?;
        self.objects
            .delete(&key)
            .await
            .map_err(ImageError::DeleteFailed)?;

        if !self.metadata.delete(record.id).await? {
            debug!(id = %record.id, "record already removed by a concurrent request");
        }
        info!(id = %record.id, key = %key, "image deleted");
        Ok(())
    }

    /// Open the object behind `id` for streaming.
    pub async fn download(&self, id: &str) -> ImageResult<Download> {
        let uuid = Self::parse_id(id)?;
        let record = self
            .metadata
            .find_by_id(uuid)
            .await
            .map_err(|err| ImageError::DownloadFailed(err.to_string()))?
            .ok_or_else(|| ImageError::NotFound(id.to_string()))?;

        let key = self
            .objects
            .key_from_locator(&record.image_url)
            .map_err(|err| ImageError::DownloadFailed(err.to_string()))?;
        debug!(id = %record.id, key = %key, "resolved object key");

        let body = self
            .objects
            .get(&key)
            .await
            .map_err(|err| ImageError::DownloadFailed(err.to_string()))?;

        Ok(Download {
            key,
            content_type: body
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            reader: body.reader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{memory_store::MemoryObjectStore, metadata_store::memory_store};
    use tokio::io::AsyncReadExt;

    async fn service() -> (ImageService, Arc<MemoryObjectStore>) {
        let objects = Arc::new(MemoryObjectStore::default());
        let service = ImageService::new(objects.clone(), memory_store().await, "Raw-images");
        (service, objects)
    }

    fn png(name: &str, bytes: &'static [u8]) -> Option<UploadedFile> {
        Some(UploadedFile {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: Bytes::from_static(bytes),
        })
    }

    #[tokio::test]
    async fn create_then_find() {
        let (service, objects) = service().await;
        let before = Utc::now();

        let created = service.create(png("cat.png", b"meow!")).await.unwrap();
        let found = service.find(&created.id.to_string()).await.unwrap();

        assert_eq!(found, created);
        assert!(found.image_url.starts_with(MemoryObjectStore::BASE_URL));
        assert!(found.image_url.ends_with("-cat.png"));
        assert!(found.uploaded_at >= before);
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn create_without_file_touches_nothing() {
        let (service, objects) = service().await;

        let err = service.create(None).await.unwrap_err();

        assert!(matches!(err, ImageError::MissingFile));
        assert_eq!(objects.calls(), 0);
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_creates_no_record() {
        let (service, objects) = service().await;
        objects.fail_puts(true);

        let err = service.create(png("cat.png", b"meow!")).await.unwrap_err();

        assert!(matches!(err, ImageError::UploadFailed(_)));
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_leaves_orphaned_object() {
        let (service, objects) = service().await;
        service.metadata().pool().close().await;

        let err = service.create(png("cat.png", b"meow!")).await.unwrap_err();

        assert!(matches!(err, ImageError::Metadata(_)));
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_not_found() {
        let (service, _) = service().await;
        for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            assert!(matches!(
                service.find(&id).await,
                Err(ImageError::NotFound(_))
            ));
            assert!(matches!(
                service.delete(&id).await,
                Err(ImageError::NotFound(_))
            ));
            assert!(matches!(
                service.download(&id).await,
                Err(ImageError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn update_of_unknown_id_does_not_upload() {
        let (service, objects) = service().await;

        let err = service
            .update(&Uuid::new_v4().to_string(), png("dog.png", b"woof"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImageError::NotFound(_)));
        assert_eq!(objects.calls(), 0);
    }

    #[tokio::test]
    async fn update_without_file_is_rejected_first() {
        let (service, objects) = service().await;
        let err = service.update("not-a-uuid", None).await.unwrap_err();
        assert!(matches!(err, ImageError::MissingFile));
        assert_eq!(objects.calls(), 0);
    }

    #[tokio::test]
    async fn update_swaps_object_and_locator() {
        let (service, objects) = service().await;
        let created = service.create(png("cat.png", b"meow!")).await.unwrap();
        let old_key = objects.key_from_locator(&created.image_url).unwrap();

        let updated = service
            .update(&created.id.to_string(), png("dog.png", b"woof"))
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.uploaded_at, created.uploaded_at);
        assert!(updated.image_url.ends_with("-dog.png"));
        assert!(!objects.contains(&old_key));
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn update_stops_when_old_object_cannot_be_deleted() {
        let (service, objects) = service().await;
        let created = service.create(png("cat.png", b"meow!")).await.unwrap();
        objects.fail_deletes(true);
        let puts_before = objects.puts();

        let err = service
            .update(&created.id.to_string(), png("dog.png", b"woof"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImageError::DeleteOldFailed(_)));
        assert_eq!(objects.puts(), puts_before);
        assert_eq!(service.find(&created.id.to_string()).await.unwrap(), created);
    }

    #[tokio::test]
    async fn failed_replacement_upload_leaves_dangling_record() {
        let (service, objects) = service().await;
        let created = service.create(png("cat.png", b"meow!")).await.unwrap();
        objects.fail_puts(true);

        let err = service
            .update(&created.id.to_string(), png("dog.png", b"woof"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImageError::UploadNewFailed(_)));
        let record = service.find(&created.id.to_string()).await.unwrap();
        assert_eq!(record.image_url, created.image_url);
        assert_eq!(objects.len(), 0);
        assert!(matches!(
            service.download(&created.id.to_string()).await,
            Err(ImageError::DownloadFailed(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_object_and_record() {
        let (service, objects) = service().await;
        let created = service.create(png("cat.png", b"meow!")).await.unwrap();
        let id = created.id.to_string();

        service.delete(&id).await.unwrap();

        assert!(matches!(service.find(&id).await, Err(ImageError::NotFound(_))));
        assert_eq!(objects.len(), 0);
    }

    #[tokio::test]
    async fn failed_object_delete_keeps_record() {
        let (service, objects) = service().await;
        let created = service.create(png("cat.png", b"meow!")).await.unwrap();
        objects.fail_deletes(true);

        let err = service.delete(&created.id.to_string()).await.unwrap_err();

        assert!(matches!(err, ImageError::DeleteFailed(_)));
        assert_eq!(service.find(&created.id.to_string()).await.unwrap(), created);
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn download_streams_original_bytes() {
        let (service, _) = service().await;
        let created = service.create(png("my cat.png", b"meow!")).await.unwrap();

        let download = service.download(&created.id.to_string()).await.unwrap();

        assert!(download.key.starts_with("Raw-images/"));
        assert!(download.key.ends_with("-my cat.png"));
        assert_eq!(download.content_type, "image/png");
        let mut reader = download.reader;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"meow!");
    }

    #[tokio::test]
    async fn download_key_keeps_literal_percent_sequences() {
        let (service, _) = service().await;
        let created = service.create(png("a%20b.png", b"x")).await.unwrap();
        assert!(created.image_url.ends_with("-a%2520b.png"));

        let download = service.download(&created.id.to_string()).await.unwrap();
        assert!(download.key.ends_with("-a%20b.png"));
    }
}

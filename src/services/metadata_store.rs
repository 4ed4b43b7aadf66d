//! Metadata store for image records, backed by SQLite.

use crate::models::image::ImageRecord;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

pub type MetadataResult<T> = Result<T, sqlx::Error>;

/// CRUD over the `images` table.
///
/// Cloning is cheap: clones share the same connection pool.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Apply the embedded schema. Safe to run on every start.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert a record for `image_url`, assigning a fresh id and timestamp.
    pub async fn insert(&self, image_url: &str) -> MetadataResult<ImageRecord> {
        sqlx::query_as::<_, ImageRecord>(
            "INSERT INTO images (id, image_url, uploaded_at) VALUES (?, ?, ?)
             RETURNING id, image_url, uploaded_at",
        )
        .bind(Uuid::new_v4())
        .bind(image_url)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    /// `Ok(None)` when no record has this id.
    pub async fn find_by_id(&self, id: Uuid) -> MetadataResult<Option<ImageRecord>> {
        sqlx::query_as::<_, ImageRecord>(
            "SELECT id, image_url, uploaded_at FROM images WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn find_all(&self) -> MetadataResult<Vec<ImageRecord>> {
        sqlx::query_as::<_, ImageRecord>(
            "SELECT id, image_url, uploaded_at FROM images ORDER BY uploaded_at ASC",
        )
        .fetch_all(&*self.db)
        .await
    }

    /// Point the record at a new locator. `Ok(None)` if the record is gone.
    pub async fn update_image_url(
        &self,
        id: Uuid,
        image_url: &str,
    ) -> MetadataResult<Option<ImageRecord>> {
        sqlx::query_as::<_, ImageRecord>(
            "UPDATE images SET image_url = ? WHERE id = ?
             RETURNING id, image_url, uploaded_at",
        )
        .bind(image_url)
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: Uuid) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> MetadataStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = MetadataStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}

//! Represents an uploaded image tracked by the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for one stored image.
///
/// The record only points at the payload; the bytes themselves live in the
/// object store under the key encoded in `image_url`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Identifier assigned when the record is inserted.
    pub id: Uuid,

    /// Fully-qualified locator of the object (the URL returned by the store).
    pub image_url: String,

    /// When the record was created. Never changes afterwards.
    pub uploaded_at: DateTime<Utc>,
}

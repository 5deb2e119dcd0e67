//! Represents an object record: metadata for one owner's copy of some content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single object record, one per `(owner, storage_id)`.
///
/// The record never holds bytes. It either owns a backing file at the path
/// derived from `storage_id`, or it is a link whose `linked_object` names
/// the record that does.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Owner-scoped key, `sha256(owner + "/" + sha256sum)` in hex.
    pub storage_id: String,

    /// Account that pays quota for this record and may write it.
    pub owner: String,

    /// Hex SHA-256 of the content.
    pub sha256sum: String,

    /// Caller-supplied logical filename.
    pub objectname: String,

    /// Size in bytes. For links, a copy of the target's size at link time.
    pub size_int: i64,

    /// Informational MIME type.
    pub mime_type: String,

    /// Storage id of the record owning the bytes, empty if this record owns them.
    pub linked_object: String,

    /// Soft-delete marker.
    pub garbage: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn is_link(&self) -> bool {
        !self.linked_object.is_empty()
    }

    /// Storage id whose backing file holds this record's bytes.
    pub fn real_storage_id(&self) -> &str {
        if self.is_link() {
            &self.linked_object
        } else {
            &self.storage_id
        }
    }
}

/// Caller-supplied metadata for register and update.
///
/// `size` and `size_int` are both accepted for compatibility with older
/// SDKs; see `quota::normalize_size` for how they are reconciled.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectMetadata {
    #[serde(default)]
    pub objectname: Option<String>,

    #[serde(default)]
    pub size: Option<String>,

    #[serde(default)]
    pub size_int: Option<i64>,

    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Body of an update: new metadata and, optionally, new content.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectUpdate {
    #[serde(flatten)]
    pub metadata: ObjectMetadata,

    /// Replacement content hash; the record moves to a new storage id.
    #[serde(default)]
    pub sha256sum: Option<String>,
}

/// Wire representation of a record.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectView {
    pub id: Uuid,
    pub storage_id: String,
    pub owner: String,
    pub objectname: String,
    pub sha256sum: String,
    pub size: String,
    pub size_int: i64,
    pub mime_type: String,
    pub linked_object: String,
    pub garbage: bool,
}

impl From<&ObjectRecord> for ObjectView {
    fn from(rec: &ObjectRecord) -> Self {
        Self {
            id: rec.id,
            storage_id: rec.storage_id.clone(),
            owner: rec.owner.clone(),
            objectname: rec.objectname.clone(),
            sha256sum: rec.sha256sum.clone(),
            size: rec.size_int.to_string(),
            size_int: rec.size_int,
            mime_type: rec.mime_type.clone(),
            linked_object: rec.linked_object.clone(),
            garbage: rec.garbage,
        }
    }
}

/// Register/fetch/update response: the record plus signed transfer URLs.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectResponse {
    #[serde(flatten)]
    pub object: ObjectView,

    /// Upload URL; absent when no upload is needed or allowed.
    pub signed_puturl: Option<String>,

    /// Download URL; absent when there are no bytes to read yet.
    pub signed_geturl: Option<String>,

    pub now: DateTime<Utc>,

    pub expire_time: DateTime<Utc>,
}

//! Object records persisted in SQLite.
//!
//! Every query runs under the configured call timeout. Writes are upserts
//! keyed on `storage_id`, so retried or concurrent registrations converge on
//! one row instead of failing or duplicating.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::object::ObjectRecord,
    services::bounded,
};
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const RECORD_COLUMNS: &str = "id, storage_id, owner, sha256sum, objectname, size_int, \
     mime_type, linked_object, garbage, created_at, updated_at";

/// Values written by an upsert. The row is always left non-garbage.
#[derive(Clone, Debug)]
pub struct RecordUpsert {
    pub storage_id: String,
    pub owner: String,
    pub sha256sum: String,
    pub objectname: String,
    pub size_int: i64,
    pub mime_type: String,
    pub linked_object: String,
}

/// Structured predicate for listing an owner's records.
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub objectname: Option<String>,
    pub name_prefix: Option<String>,
    pub mime_type: Option<String>,
    pub sha256sum: Option<String>,
    /// `Some(true)` only links, `Some(false)` only content-owning records.
    pub linked: Option<bool>,
    /// Only records with a storage id strictly greater than this.
    pub after: Option<String>,
    pub limit: usize,
}

#[derive(Clone)]
pub struct MetadataStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    timeout: Duration,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Apply the embedded schema, statement by statement.
    pub async fn migrate(&self) -> ServiceResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Connectivity probe used by readiness checks.
    pub async fn ping(&self) -> ServiceResult<()> {
        bounded("metadata store ping", self.timeout, async {
            let one = sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&*self.db)
                .await?;
            if one == 1 {
                Ok(())
            } else {
                Err(ServiceError::Backend(format!("unexpected result: {}", one)))
            }
        })
        .await
    }

    /// Fetch a non-garbage record by storage id.
    pub async fn find(&self, storage_id: &str) -> ServiceResult<Option<ObjectRecord>> {
        bounded("metadata lookup", self.timeout, async {
            let sql = format!(
                "SELECT {} FROM objects WHERE storage_id = ? AND garbage = 0",
                RECORD_COLUMNS
            );
            Ok(sqlx::query_as::<_, ObjectRecord>(&sql)
                .bind(storage_id)
                .fetch_optional(&*self.db)
                .await?)
        })
        .await
    }

    /// Insert or overwrite the record for `rec.storage_id`.
    ///
    /// A garbage row with the same storage id is revived; `id` and
    /// `created_at` of an existing row are preserved.
    pub async fn upsert(&self, rec: RecordUpsert) -> ServiceResult<ObjectRecord> {
        bounded("metadata upsert", self.timeout, async {
            let now = Utc::now();
            let sql = format!(
                r#"
                INSERT INTO objects (
                    id, storage_id, owner, sha256sum, objectname, size_int,
                    mime_type, linked_object, garbage, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                ON CONFLICT(storage_id) DO UPDATE SET
                    objectname = excluded.objectname,
                    size_int = excluded.size_int,
                    mime_type = excluded.mime_type,
                    linked_object = excluded.linked_object,
                    garbage = 0,
                    updated_at = excluded.updated_at
                RETURNING {}
                "#,
                RECORD_COLUMNS
            );
            let stored = sqlx::query_as::<_, ObjectRecord>(&sql)
                .bind(Uuid::new_v4())
                .bind(&rec.storage_id)
                .bind(&rec.owner)
                .bind(&rec.sha256sum)
                .bind(&rec.objectname)
                .bind(rec.size_int)
                .bind(&rec.mime_type)
                .bind(&rec.linked_object)
                .bind(now)
                .bind(now)
                .fetch_one(&*self.db)
                .await?;
            debug!(
                "upserted {} for {} (link: {:?})",
                stored.storage_id,
                stored.owner,
                stored.is_link().then_some(&stored.linked_object)
            );
            Ok(stored)
        })
        .await
    }

    /// Soft-delete. Returns false when no live record matched.
    pub async fn mark_garbage(&self, storage_id: &str) -> ServiceResult<bool> {
        bounded("metadata delete", self.timeout, async {
            let result = sqlx::query(
                "UPDATE objects SET garbage = 1, updated_at = ? WHERE storage_id = ? AND garbage = 0",
            )
            .bind(Utc::now())
            .bind(storage_id)
            .execute(&*self.db)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// `SUM(size_int)` over the owner's live records, leaving out the
    /// records a pending write replaces.
    pub async fn usage(&self, owner: &str, excluding: &[&str]) -> ServiceResult<i64> {
        bounded("usage aggregation", self.timeout, async {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT COALESCE(SUM(size_int), 0) FROM objects WHERE owner = ",
            );
            builder.push_bind(owner.to_string());
            builder.push(" AND garbage = 0");
            if !excluding.is_empty() {
                builder.push(" AND storage_id NOT IN (");
                let mut ids = builder.separated(", ");
                for id in excluding {
                    ids.push_bind(id.to_string());
                }
                ids.push_unseparated(")");
            }
            Ok(builder
                .build_query_scalar::<i64>()
                .fetch_one(&*self.db)
                .await?)
        })
        .await
    }

    /// Live content-owning records of other owners holding `sha256sum`,
    /// oldest first.
    pub async fn link_candidates(
        &self,
        sha256sum: &str,
        excluding_owner: &str,
    ) -> ServiceResult<Vec<ObjectRecord>> {
        bounded("link candidate search", self.timeout, async {
            let sql = format!(
                "SELECT {} FROM objects
                 WHERE sha256sum = ? AND owner != ? AND garbage = 0 AND linked_object = ''
                 ORDER BY created_at ASC, storage_id ASC",
                RECORD_COLUMNS
            );
            Ok(sqlx::query_as::<_, ObjectRecord>(&sql)
                .bind(sha256sum)
                .bind(excluding_owner)
                .fetch_all(&*self.db)
                .await?)
        })
        .await
    }

    /// The owner's live records matching `filter`, ordered by storage id.
    pub async fn list(&self, owner: &str, filter: &ListFilter) -> ServiceResult<Vec<ObjectRecord>> {
        bounded("metadata list", self.timeout, async {
            let mut builder = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {} FROM objects WHERE owner = ",
                RECORD_COLUMNS
            ));
            builder.push_bind(owner.to_string());
            builder.push(" AND garbage = 0");

            if let Some(name) = &filter.objectname {
                builder.push(" AND objectname = ");
                builder.push_bind(name.clone());
            }
            if let Some(prefix) = &filter.name_prefix {
                builder.push(" AND substr(objectname, 1, length(");
                builder.push_bind(prefix.clone());
                builder.push(")) = ");
                builder.push_bind(prefix.clone());
            }
            if let Some(mime) = &filter.mime_type {
                builder.push(" AND mime_type = ");
                builder.push_bind(mime.clone());
            }
            if let Some(sha) = &filter.sha256sum {
                builder.push(" AND sha256sum = ");
                builder.push_bind(sha.to_ascii_lowercase());
            }
            match filter.linked {
                Some(true) => {
                    builder.push(" AND linked_object != ''");
                }
                Some(false) => {
                    builder.push(" AND linked_object = ''");
                }
                None => {}
            }
            if let Some(after) = &filter.after {
                builder.push(" AND storage_id > ");
                builder.push_bind(after.clone());
            }

            builder.push(" ORDER BY storage_id ASC LIMIT ");
            builder.push_bind(filter.limit as i64);

            Ok(builder
                .build_query_as::<ObjectRecord>()
                .fetch_all(&*self.db)
                .await?)
        })
        .await
    }
}

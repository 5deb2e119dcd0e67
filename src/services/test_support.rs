//! Shared fixtures for service tests: in-memory SQLite, a temp-dir backend
//! and a fixed quota table.

use crate::{
    errors::ServiceResult,
    models::{object::ObjectRecord, subscription::Plan},
    services::{
        backend::{BackingFiles, LocalBackend},
        link_resolver::LinkResolver,
        metadata_store::{MetadataStore, RecordUpsert},
        object_service::ObjectService,
        quota::{QuotaEngine, QuotaSource},
        storage_id::{ContentHash, storage_id, storage_path},
        token_issuer::TokenIssuer,
    },
};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "test-secret-that-is-long-enough-0123456789";
pub const DEFAULT_QUOTA: i64 = 1024 * 1024;

/// One connection only: every `sqlite::memory:` connection is its own database.
pub async fn memory_store() -> MetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = MetadataStore::new(Arc::new(pool), Duration::from_secs(5));
    store.migrate().await.unwrap();
    store
}

#[derive(Default)]
pub struct FixedQuota {
    plans: HashMap<String, i64>,
}

impl FixedQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, owner: &str, quota_bytes: i64) -> Self {
        self.plans.insert(owner.to_string(), quota_bytes);
        self
    }
}

#[async_trait]
impl QuotaSource for FixedQuota {
    async fn plan(&self, owner: &str) -> ServiceResult<Option<Plan>> {
        Ok(self
            .plans
            .get(owner)
            .map(|quota| Plan::new(format!("{}-plan", owner), *quota)))
    }
}

pub struct Fixture {
    pub store: MetadataStore,
    pub files: BackingFiles,
    pub quota: QuotaEngine,
    pub tokens: TokenIssuer,
    pub dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_source(FixedQuota::new()).await
    }

    pub async fn with_quota(owner: &str, quota_bytes: i64) -> Self {
        Self::with_source(FixedQuota::new().with(owner, quota_bytes)).await
    }

    pub async fn with_source(source: FixedQuota) -> Self {
        let store = memory_store().await;
        let dir = TempDir::new().unwrap();
        let files = BackingFiles::new(
            Arc::new(LocalBackend::new(dir.path())),
            Duration::from_secs(5),
        );
        let quota = QuotaEngine::new(
            store.clone(),
            Arc::new(source),
            Plan::new("default", DEFAULT_QUOTA),
            Duration::from_secs(5),
        );
        let tokens = TokenIssuer::new(
            TEST_SECRET,
            "fleet-object-store",
            chrono::Duration::seconds(30),
            "https://blobs.test",
        )
        .unwrap();
        Self {
            store,
            files,
            quota,
            tokens,
            dir,
        }
    }

    pub fn resolver(&self) -> LinkResolver {
        LinkResolver::new(self.store.clone(), self.files.clone(), self.quota.clone())
    }

    pub fn service(&self) -> ObjectService {
        ObjectService::new(
            self.store.clone(),
            self.files.clone(),
            self.quota.clone(),
            self.resolver(),
            self.tokens.clone(),
        )
    }

    /// Place bytes where the backend expects the file for `storage_id`.
    pub fn write_bytes(&self, storage_id: &str, data: &[u8]) {
        let path = self.dir.path().join(storage_path(storage_id));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    /// Drop the bytes for `storage_id`, leaving its record in place.
    pub fn remove_bytes(&self, storage_id: &str) {
        std::fs::remove_file(self.dir.path().join(storage_path(storage_id))).unwrap();
    }

    /// Insert a content-owning record directly, optionally with its bytes.
    pub async fn seed(
        &self,
        owner: &str,
        hash: &ContentHash,
        size: i64,
        with_bytes: bool,
    ) -> ObjectRecord {
        let sid = storage_id(owner, hash);
        let rec = self
            .store
            .upsert(RecordUpsert {
                storage_id: sid.clone(),
                owner: owner.to_string(),
                sha256sum: hash.to_hex(),
                objectname: format!("{}.bin", owner),
                size_int: size,
                mime_type: "application/octet-stream".into(),
                linked_object: String::new(),
            })
            .await
            .unwrap();
        if with_bytes {
            self.write_bytes(&sid, &vec![0u8; size as usize]);
        }
        // keep created_at strictly increasing between seeded records
        tokio::time::sleep(Duration::from_millis(2)).await;
        rec
    }
}

//! src/services/object_service.rs
//!
//! Register, fetch, update, delete and list object records,
//! handing out signed URLs for the byte transfers the client then performs
//! against the storage gateway. Quota is checked before every
//! size-increasing commit; duplicate content across owners is linked rather
//! than stored twice.
//!
//! Quota check and commit are two steps. Two concurrent writers for the same
//! owner can both pass the check and briefly leave the owner over quota;
//! the next write sees the true total and is rejected.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::{
        caller::Caller,
        object::{ObjectMetadata, ObjectRecord, ObjectResponse, ObjectUpdate, ObjectView},
    },
    services::{
        backend::BackingFiles,
        link_resolver::{LinkResolver, Resolution},
        metadata_store::{ListFilter, MetadataStore, RecordUpsert},
        quota::{QuotaEngine, normalize_size},
        storage_id::{ContentHash, storage_id},
        token_issuer::{AccessGrant, Method, TokenIssuer},
    },
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub const MAX_LIST_LIMIT: usize = 1000;

/// A record together with the transfer grants issued for it.
#[derive(Debug, Clone)]
pub struct Granted {
    pub record: ObjectRecord,
    pub read: Option<AccessGrant>,
    pub write: Option<AccessGrant>,
    pub now: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

/// Result of a register call.
#[derive(Debug, Clone)]
pub struct Registered {
    pub granted: Granted,
    /// False when the record already existed (idempotent retry or repair).
    pub created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub filter: ListFilter,
    pub continuation_token: Option<String>,
    pub max_keys: Option<usize>,
}

#[derive(Debug)]
pub struct ListPage {
    pub objects: Vec<ObjectRecord>,
    pub is_truncated: bool,
    /// Storage id to resume after.
    pub next_continuation_token: Option<String>,
}

#[derive(Clone)]
pub struct ObjectService {
    store: MetadataStore,
    files: BackingFiles,
    quota: QuotaEngine,
    resolver: LinkResolver,
    tokens: TokenIssuer,
}

impl ObjectService {
    pub fn new(
        store: MetadataStore,
        files: BackingFiles,
        quota: QuotaEngine,
        resolver: LinkResolver,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            store,
            files,
            quota,
            resolver,
            tokens,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn files(&self) -> &BackingFiles {
        &self.files
    }

    /// Create the record for `(caller.owner, sha256sum)`, or confirm/repair it.
    ///
    /// - known and backed: returned as-is, no upload URL;
    /// - known but missing bytes: re-affirmed with an upload URL (or linked,
    ///   with `auto_link`, when another owner holds the bytes);
    /// - unknown: linked if possible and requested, otherwise created with an
    ///   upload URL after the quota check.
    pub async fn register(
        &self,
        caller: &Caller,
        sha256sum: &str,
        metadata: ObjectMetadata,
        auto_link: bool,
    ) -> ServiceResult<Registered> {
        let hash = ContentHash::parse(sha256sum)?;
        let size = normalize_size(metadata.size.as_deref(), metadata.size_int)?;
        let sid = storage_id(&caller.owner, &hash);
        debug!(
            "register {} for {} ({} {}), {} bytes",
            hash, caller.owner, caller.calling_type, caller.subject, size
        );

        if let Some(existing) = self.store.find(&sid).await? {
            self.ensure_owner(caller, &existing)?;
            let granted = self
                .register_known(caller, &hash, existing, metadata, size, auto_link)
                .await?;
            return Ok(Registered {
                granted,
                created: false,
            });
        }

        if auto_link {
            match self
                .resolver
                .resolve_named(&caller.owner, &hash, true, metadata.objectname.as_deref())
                .await
            {
                Ok(resolution) => {
                    return Ok(Registered {
                        granted: self.grant_resolution(caller, &resolution)?,
                        created: true,
                    });
                }
                Err(ServiceError::NoBackingFile) => {}
                Err(err) => return Err(err),
            }
        }

        self.quota.check(&caller.owner, &[sid.as_str()], size).await?;
        let record = self
            .store
            .upsert(RecordUpsert {
                storage_id: sid,
                owner: caller.owner.clone(),
                sha256sum: hash.to_hex(),
                objectname: metadata.objectname.unwrap_or_default(),
                size_int: size,
                mime_type: metadata.mime_type.unwrap_or_default(),
                linked_object: String::new(),
            })
            .await?;
        info!(
            "registered {} for {} ({} bytes)",
            record.storage_id, record.owner, record.size_int
        );
        Ok(Registered {
            granted: self.grant(caller, record, None, true)?,
            created: true,
        })
    }

    async fn register_known(
        &self,
        caller: &Caller,
        hash: &ContentHash,
        existing: ObjectRecord,
        metadata: ObjectMetadata,
        size: i64,
        auto_link: bool,
    ) -> ServiceResult<Granted> {
        if existing.is_link() {
            if let Ok(target) = self.resolver.follow(&existing).await {
                if self.files.exists(&target.storage_id).await? {
                    debug!("{} already known as link to {}", existing.storage_id, target.storage_id);
                    let real = target.storage_id.clone();
                    return self.grant(caller, existing, Some(&real), false);
                }
            }
        } else if self.files.exists(&existing.storage_id).await? {
            debug!("{} already known and backed", existing.storage_id);
            let real = existing.storage_id.clone();
            return self.grant(caller, existing, Some(&real), false);
        }

        warn!(
            "{} is registered but its bytes are missing, repairing",
            existing.storage_id
        );

        if auto_link {
            match self
                .resolver
                .resolve_named(&caller.owner, hash, true, metadata.objectname.as_deref())
                .await
            {
                Ok(resolution) => return self.grant_resolution(caller, &resolution),
                Err(ServiceError::NoBackingFile) => {}
                Err(err) => return Err(err),
            }
        }

        let size = if metadata.size.is_none() && metadata.size_int.is_none() {
            existing.size_int
        } else {
            size
        };

        // Re-affirm as a content-owning record so the caller can upload again.
        self.quota
            .check(&caller.owner, &[existing.storage_id.as_str()], size)
            .await?;
        let record = self
            .store
            .upsert(RecordUpsert {
                storage_id: existing.storage_id.clone(),
                owner: existing.owner.clone(),
                sha256sum: existing.sha256sum.clone(),
                objectname: metadata.objectname.unwrap_or(existing.objectname),
                size_int: size,
                mime_type: metadata.mime_type.unwrap_or(existing.mime_type),
                linked_object: String::new(),
            })
            .await?;
        self.grant(caller, record, None, true)
    }

    /// Resolve the caller's record for `sha256sum` and grant access to it.
    ///
    /// Unknown content and content the caller has no record for both end in
    /// `NoAccess`. A record whose upload never happened comes back with an
    /// upload URL only.
    pub async fn fetch(
        &self,
        caller: &Caller,
        sha256sum: &str,
        auto_link: bool,
    ) -> ServiceResult<Granted> {
        let hash = ContentHash::parse(sha256sum)?;
        match self.resolver.resolve(&caller.owner, &hash, auto_link).await {
            Ok(resolution) => {
                self.ensure_owner(caller, resolution.record())?;
                self.grant_resolution(caller, &resolution)
            }
            Err(ServiceError::NoBackingFile) => {
                let sid = storage_id(&caller.owner, &hash);
                match self.store.find(&sid).await? {
                    Some(rec) if !rec.is_link() && rec.owner == caller.owner => {
                        warn!("{} has no backing file yet, offering upload", sid);
                        self.grant(caller, rec, None, true)
                    }
                    _ => Err(ServiceError::NoAccess),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Change a record's metadata, or move it to new content.
    ///
    /// The record's current size is left out of the usage total, so
    /// replacing an object with one of equal or smaller size always passes
    /// the quota check.
    pub async fn update(
        &self,
        caller: &Caller,
        sha256sum: &str,
        update: ObjectUpdate,
    ) -> ServiceResult<Granted> {
        let hash = ContentHash::parse(sha256sum)?;
        let new_hash = update
            .sha256sum
            .as_deref()
            .map(ContentHash::parse)
            .transpose()?;
        let sid = storage_id(&caller.owner, &hash);
        let existing = self
            .store
            .find(&sid)
            .await?
            .ok_or(ServiceError::NoAccess)?;
        self.ensure_owner(caller, &existing)?;

        let metadata = update.metadata;
        let size_given = metadata.size.is_some() || metadata.size_int.is_some();
        let size = if size_given {
            normalize_size(metadata.size.as_deref(), metadata.size_int)?
        } else {
            existing.size_int
        };

        if let Some(new_hash) = new_hash.filter(|h| *h != hash) {
            return self
                .move_content(caller, existing, &new_hash, metadata, size)
                .await;
        }

        if existing.is_link() {
            // Size and type mirror the link target; only the name is the owner's.
            let record = self
                .store
                .upsert(RecordUpsert {
                    storage_id: existing.storage_id.clone(),
                    owner: existing.owner.clone(),
                    sha256sum: existing.sha256sum.clone(),
                    objectname: metadata.objectname.unwrap_or(existing.objectname),
                    size_int: existing.size_int,
                    mime_type: existing.mime_type,
                    linked_object: existing.linked_object.clone(),
                })
                .await?;
            let real = record.real_storage_id().to_string();
            return self.grant(caller, record, Some(&real), false);
        }

        self.quota.check(&caller.owner, &[sid.as_str()], size).await?;
        let record = self
            .store
            .upsert(RecordUpsert {
                storage_id: sid.clone(),
                owner: existing.owner.clone(),
                sha256sum: existing.sha256sum.clone(),
                objectname: metadata.objectname.unwrap_or(existing.objectname),
                size_int: size,
                mime_type: metadata.mime_type.unwrap_or(existing.mime_type),
                linked_object: String::new(),
            })
            .await?;
        info!("updated {} for {}", record.storage_id, record.owner);
        self.grant(caller, record, Some(&sid), true)
    }

    async fn move_content(
        &self,
        caller: &Caller,
        old: ObjectRecord,
        new_hash: &ContentHash,
        metadata: ObjectMetadata,
        size: i64,
    ) -> ServiceResult<Granted> {
        let new_sid = storage_id(&caller.owner, new_hash);
        // The new content may already be registered; the upsert replaces it.
        self.quota
            .check(&caller.owner, &[old.storage_id.as_str(), new_sid.as_str()], size)
            .await?;
        let record = self
            .store
            .upsert(RecordUpsert {
                storage_id: new_sid.clone(),
                owner: caller.owner.clone(),
                sha256sum: new_hash.to_hex(),
                objectname: metadata.objectname.unwrap_or(old.objectname),
                size_int: size,
                mime_type: metadata.mime_type.unwrap_or(old.mime_type),
                linked_object: String::new(),
            })
            .await?;
        self.store.mark_garbage(&old.storage_id).await?;
        info!(
            "moved {} to new content {} for {}",
            old.storage_id, new_sid, caller.owner
        );
        let read = if self.files.exists(&new_sid).await? {
            Some(new_sid.as_str())
        } else {
            None
        };
        self.grant(caller, record, read, true)
    }

    /// Mark the caller's record garbage. Its bytes stay until collected.
    pub async fn delete(&self, caller: &Caller, sha256sum: &str) -> ServiceResult<ObjectRecord> {
        let hash = ContentHash::parse(sha256sum)?;
        let sid = storage_id(&caller.owner, &hash);
        let mut record = self
            .store
            .find(&sid)
            .await?
            .ok_or(ServiceError::NoAccess)?;
        self.ensure_owner(caller, &record)?;

        if !self.store.mark_garbage(&sid).await? {
            return Err(ServiceError::NoAccess);
        }
        info!("deleted {} for {}", sid, caller.owner);
        record.garbage = true;
        Ok(record)
    }

    /// The caller's live records, filtered and paged by storage id.
    pub async fn list(&self, caller: &Caller, params: ListParams) -> ServiceResult<ListPage> {
        let max_keys = params.max_keys.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let mut filter = params.filter;
        if let Some(sha) = &filter.sha256sum {
            filter.sha256sum = Some(ContentHash::parse(sha)?.to_hex());
        }
        if params.continuation_token.is_some() {
            filter.after = params.continuation_token;
        }
        filter.limit = max_keys + 1;

        let mut objects = self.store.list(&caller.owner, &filter).await?;
        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if objects.len() > max_keys {
            objects.truncate(max_keys);
            next_continuation_token = objects.last().map(|rec| rec.storage_id.clone());
            is_truncated = true;
        }

        Ok(ListPage {
            objects,
            is_truncated,
            next_continuation_token,
        })
    }

    /// Wire shape for a granted record, with the grants turned into URLs.
    pub fn to_response(&self, granted: &Granted) -> ObjectResponse {
        ObjectResponse {
            object: ObjectView::from(&granted.record),
            signed_puturl: granted.write.as_ref().map(|g| self.tokens.signed_url(g)),
            signed_geturl: granted.read.as_ref().map(|g| self.tokens.signed_url(g)),
            now: granted.now,
            expire_time: granted.expire_time,
        }
    }

    fn ensure_owner(&self, caller: &Caller, record: &ObjectRecord) -> ServiceResult<()> {
        if record.owner != caller.owner {
            warn!(
                "{} ({}) denied access to {}",
                caller.subject, caller.owner, record.storage_id
            );
            return Err(ServiceError::NoAccess);
        }
        Ok(())
    }

    fn grant_resolution(&self, caller: &Caller, resolution: &Resolution) -> ServiceResult<Granted> {
        let real = resolution.real_storage_id();
        match resolution {
            Resolution::Backed(rec) => self.grant(caller, rec.clone(), Some(real), true),
            Resolution::Link { link, .. } | Resolution::Linked { link, .. } => {
                self.grant(caller, link.clone(), Some(real), false)
            }
        }
    }

    /// Issue the read grant against `read_storage_id` and, for the owner of a
    /// content-owning record, the write grant against its own storage id.
    fn grant(
        &self,
        caller: &Caller,
        record: ObjectRecord,
        read_storage_id: Option<&str>,
        writable: bool,
    ) -> ServiceResult<Granted> {
        let read = read_storage_id
            .map(|sid| self.tokens.issue(Method::Get, sid, &caller.owner))
            .transpose()?;
        let write = if writable && !record.is_link() && record.owner == caller.owner {
            Some(
                self.tokens
                    .issue(Method::Put, &record.storage_id, &caller.owner)?,
            )
        } else {
            None
        };
        let now = read
            .as_ref()
            .or(write.as_ref())
            .map(|g| g.issued_at)
            .unwrap_or_else(Utc::now);
        Ok(Granted {
            record,
            read,
            write,
            now,
            expire_time: now + self.tokens.ttl(),
        })
    }
}

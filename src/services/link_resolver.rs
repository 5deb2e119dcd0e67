//! Link resolution: find usable bytes for `(owner, content_hash)`.
//!
//! Precedence:
//! 1. the owner's own content-owning record with a backing file;
//! 2. the owner's existing link, if its target is live and backed;
//! 3. with `auto_link`, a new link to another owner's record holding the
//!    same content and a backing file (oldest record first);
//! 4. otherwise `NoBackingFile`, and the caller uploads the bytes itself.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::object::ObjectRecord,
    services::{
        backend::BackingFiles,
        metadata_store::{MetadataStore, RecordUpsert},
        quota::QuotaEngine,
        storage_id::{ContentHash, storage_id},
    },
};
use tracing::{debug, info, warn};

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The owner's own record, backed by its own file.
    Backed(ObjectRecord),
    /// An existing link; the bytes live under `target`.
    Link {
        link: ObjectRecord,
        target: ObjectRecord,
    },
    /// A link created by this resolution.
    Linked {
        link: ObjectRecord,
        target: ObjectRecord,
    },
}

impl Resolution {
    /// The requesting owner's record.
    pub fn record(&self) -> &ObjectRecord {
        match self {
            Resolution::Backed(rec) => rec,
            Resolution::Link { link, .. } | Resolution::Linked { link, .. } => link,
        }
    }

    /// Storage id that actually holds the bytes.
    pub fn real_storage_id(&self) -> &str {
        match self {
            Resolution::Backed(rec) => &rec.storage_id,
            Resolution::Link { target, .. } | Resolution::Linked { target, .. } => {
                &target.storage_id
            }
        }
    }
}

#[derive(Clone)]
pub struct LinkResolver {
    store: MetadataStore,
    files: BackingFiles,
    quota: QuotaEngine,
}

impl LinkResolver {
    pub fn new(store: MetadataStore, files: BackingFiles, quota: QuotaEngine) -> Self {
        Self {
            store,
            files,
            quota,
        }
    }

    pub async fn resolve(
        &self,
        owner: &str,
        hash: &ContentHash,
        auto_link: bool,
    ) -> ServiceResult<Resolution> {
        self.resolve_named(owner, hash, auto_link, None).await
    }

    /// Like `resolve`, with the object name to give a newly created link.
    pub async fn resolve_named(
        &self,
        owner: &str,
        hash: &ContentHash,
        auto_link: bool,
        objectname: Option<&str>,
    ) -> ServiceResult<Resolution> {
        let sid = storage_id(owner, hash);
        let existing = self.store.find(&sid).await?;

        if let Some(rec) = &existing {
            if rec.is_link() {
                match self.follow(rec).await {
                    Ok(target) => {
                        if self.files.exists(&target.storage_id).await? {
                            debug!("{} is a link to {}", sid, target.storage_id);
                            return Ok(Resolution::Link {
                                link: rec.clone(),
                                target,
                            });
                        }
                        warn!(
                            "{} links to {} which has no backing file",
                            sid, target.storage_id
                        );
                    }
                    Err(ServiceError::NoBackingFile) => {
                        warn!("{} links to {} which is gone", sid, rec.linked_object);
                    }
                    Err(err) => return Err(err),
                }
            } else if self.files.exists(&sid).await? {
                return Ok(Resolution::Backed(rec.clone()));
            } else {
                warn!("{} is registered but has no backing file", sid);
            }
        }

        if !auto_link {
            return Err(ServiceError::NoBackingFile);
        }

        let sha = hash.to_hex();
        for candidate in self.store.link_candidates(&sha, owner).await? {
            if !self.files.exists(&candidate.storage_id).await? {
                debug!("candidate {} has no backing file", candidate.storage_id);
                continue;
            }

            let name = objectname
                .map(str::to_string)
                .or_else(|| existing.as_ref().map(|rec| rec.objectname.clone()))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| candidate.objectname.clone());

            self.quota
                .check(owner, &[sid.as_str()], candidate.size_int)
                .await?;

            let link = self
                .store
                .upsert(RecordUpsert {
                    storage_id: sid.clone(),
                    owner: owner.to_string(),
                    sha256sum: sha.clone(),
                    objectname: name,
                    size_int: candidate.size_int,
                    mime_type: candidate.mime_type.clone(),
                    linked_object: candidate.storage_id.clone(),
                })
                .await?;
            info!(
                "linked {} ({}) to {} owned by {}",
                link.storage_id, owner, candidate.storage_id, candidate.owner
            );
            return Ok(Resolution::Linked {
                link,
                target: candidate,
            });
        }

        debug!("no link candidate for {} anywhere", sha);
        Err(ServiceError::NoBackingFile)
    }

    /// Load the live, content-owning record a link points at.
    pub async fn follow(&self, link: &ObjectRecord) -> ServiceResult<ObjectRecord> {
        match self.store.find(&link.linked_object).await? {
            Some(target) if !target.is_link() && target.sha256sum == link.sha256sum => Ok(target),
            _ => Err(ServiceError::NoBackingFile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Fixture;

    #[tokio::test]
    async fn own_backed_record_wins() {
        let fx = Fixture::new().await;
        let hash = ContentHash::of(b"firmware-v1");
        let own = fx.seed("ownerB", &hash, 11, true).await;
        fx.seed("ownerA", &hash, 11, true).await;

        let res = fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        assert!(matches!(res, Resolution::Backed(ref rec) if rec.storage_id == own.storage_id));
    }

    #[tokio::test]
    async fn missing_everything_without_auto_link_is_no_backing() {
        let fx = Fixture::new().await;
        let hash = ContentHash::of(b"firmware-v1");
        fx.seed("ownerA", &hash, 11, true).await;

        let err = fx.resolver().resolve("ownerB", &hash, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoBackingFile));
        assert!(fx.store.find(&storage_id("ownerB", &hash)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_link_points_at_the_other_owners_bytes() {
        let fx = Fixture::new().await;
        let hash = ContentHash::of(b"firmware-v1");
        let a = fx.seed("ownerA", &hash, 11, true).await;

        let res = fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        let Resolution::Linked { link, target } = res else {
            panic!("expected a new link");
        };
        assert_eq!(link.owner, "ownerB");
        assert_eq!(link.storage_id, storage_id("ownerB", &hash));
        assert_eq!(link.linked_object, a.storage_id);
        assert_eq!(link.size_int, a.size_int);
        assert_eq!(link.mime_type, a.mime_type);
        assert_eq!(target.storage_id, a.storage_id);

        // a second resolve reuses the link instead of creating another
        let again = fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        assert!(matches!(again, Resolution::Link { ref target, .. } if target.storage_id == a.storage_id));
        assert_eq!(again.real_storage_id(), a.storage_id);
    }

    #[tokio::test]
    async fn candidates_without_bytes_are_skipped_oldest_backed_wins() {
        let fx = Fixture::new().await;
        let hash = ContentHash::of(b"firmware-v1");
        fx.seed("ownerA", &hash, 11, false).await;
        let c = fx.seed("ownerC", &hash, 11, true).await;
        fx.seed("ownerD", &hash, 11, true).await;

        let res = fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        assert_eq!(res.real_storage_id(), c.storage_id);
    }

    #[tokio::test]
    async fn dangling_own_record_is_turned_into_a_link() {
        let fx = Fixture::new().await;
        let hash = ContentHash::of(b"firmware-v1");
        let a = fx.seed("ownerA", &hash, 11, true).await;
        let b = fx.seed("ownerB", &hash, 11, false).await;

        let res = fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        assert_eq!(res.record().id, b.id);
        assert_eq!(res.record().linked_object, a.storage_id);
        assert_eq!(res.record().objectname, b.objectname);
    }

    #[tokio::test]
    async fn orphaned_link_is_repointed() {
        let fx = Fixture::new().await;
        let hash = ContentHash::of(b"firmware-v1");
        let a = fx.seed("ownerA", &hash, 11, true).await;
        fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        let c = fx.seed("ownerC", &hash, 11, true).await;
        fx.store.mark_garbage(&a.storage_id).await.unwrap();

        let err = fx.resolver().resolve("ownerB", &hash, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoBackingFile));

        let res = fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        assert_eq!(res.record().linked_object, c.storage_id);
    }

    #[tokio::test]
    async fn link_to_unbacked_target_is_repointed() {
        let fx = Fixture::new().await;
        let hash = ContentHash::of(b"firmware-v1");
        let a = fx.seed("ownerA", &hash, 11, true).await;
        fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        fx.remove_bytes(&a.storage_id);

        let err = fx.resolver().resolve("ownerB", &hash, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoBackingFile));

        let c = fx.seed("ownerC", &hash, 11, true).await;
        let res = fx.resolver().resolve("ownerB", &hash, true).await.unwrap();
        assert!(matches!(res, Resolution::Linked { .. }));
        assert_eq!(res.record().linked_object, c.storage_id);
        assert_eq!(res.real_storage_id(), c.storage_id);
    }

    #[tokio::test]
    async fn link_creation_respects_quota() {
        let fx = Fixture::with_quota("ownerB", 10).await;
        let hash = ContentHash::of(b"firmware-v1");
        fx.seed("ownerA", &hash, 11, true).await;

        let err = fx.resolver().resolve("ownerB", &hash, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExceeded { .. }));
        assert!(fx.store.find(&storage_id("ownerB", &hash)).await.unwrap().is_none());
    }
}

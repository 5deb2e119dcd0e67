//! Quota engine: per-owner usage against the owner's subscription plan.
//!
//! Usage is recomputed from the metadata store on every write. Concurrent
//! writers and the external garbage collector both change the true total
//! between requests, so no counter is kept here.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::subscription::Plan,
    services::{bounded, metadata_store::MetadataStore},
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Resolves an owner to its explicit plan, if it has one.
#[async_trait]
pub trait QuotaSource: Send + Sync {
    async fn plan(&self, owner: &str) -> ServiceResult<Option<Plan>>;
}

/// Plans stored in the `subscriptions` table.
pub struct SubscriptionQuotaSource {
    db: Arc<SqlitePool>,
}

impl SubscriptionQuotaSource {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QuotaSource for SubscriptionQuotaSource {
    async fn plan(&self, owner: &str) -> ServiceResult<Option<Plan>> {
        Ok(
            sqlx::query_as::<_, Plan>(
                "SELECT plan, quota_bytes FROM subscriptions WHERE owner = ?",
            )
            .bind(owner)
            .fetch_optional(&*self.db)
            .await?,
        )
    }
}

/// Reconcile the string and integer size forms into one byte count.
///
/// A non-zero `size_int` wins; otherwise `size` is parsed, with a missing
/// or empty string meaning zero.
pub fn normalize_size(size: Option<&str>, size_int: Option<i64>) -> ServiceResult<i64> {
    let size_int = size_int.unwrap_or(0);
    let normalized = if size_int != 0 {
        size_int
    } else {
        match size.map(str::trim) {
            None | Some("") => 0,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ServiceError::Validation(format!("size `{}` is not an integer", raw)))?,
        }
    };
    if normalized < 0 {
        return Err(ServiceError::Validation(format!(
            "size must not be negative, got {}",
            normalized
        )));
    }
    Ok(normalized)
}

#[derive(Clone)]
pub struct QuotaEngine {
    store: MetadataStore,
    source: Arc<dyn QuotaSource>,
    default_plan: Plan,
    timeout: Duration,
}

impl QuotaEngine {
    pub fn new(
        store: MetadataStore,
        source: Arc<dyn QuotaSource>,
        default_plan: Plan,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            default_plan,
            timeout,
        }
    }

    /// Bytes the owner would hold after writing `new_size` bytes, with the
    /// records being replaced left out of the current total.
    pub async fn usage_after_write(
        &self,
        owner: &str,
        excluding: &[&str],
        new_size: i64,
    ) -> ServiceResult<i64> {
        let current = self.store.usage(owner, excluding).await?;
        Ok(current.saturating_add(new_size))
    }

    /// Byte allowance for `owner`, falling back to the default plan.
    pub async fn quota(&self, owner: &str) -> ServiceResult<i64> {
        let plan = bounded("quota lookup", self.timeout, self.source.plan(owner)).await?;
        let plan = plan.unwrap_or_else(|| {
            debug!("{} has no plan, using default `{}`", owner, self.default_plan.plan);
            self.default_plan.clone()
        });
        Ok(plan.quota_bytes)
    }

    /// Reject the write if it would take the owner over quota.
    pub async fn check(
        &self,
        owner: &str,
        excluding: &[&str],
        new_size: i64,
    ) -> ServiceResult<()> {
        let usage = self
            .usage_after_write(owner, excluding, new_size)
            .await?;
        let quota = self.quota(owner).await?;
        debug!("quota check for {}: {} / {}", owner, usage, quota);
        if usage > quota {
            warn!("{} over quota: {} > {}", owner, usage, quota);
            return Err(ServiceError::QuotaExceeded { usage, quota });
        }
        Ok(())
    }
}

//! Object store control-plane services.
//!
//! Leaves first: `storage_id` (pure), `metadata_store` and `backend`
//! (external collaborators), then `quota`, `link_resolver`,
//! `token_issuer` and the `object_service` orchestrator.

pub mod backend;
pub mod link_resolver;
pub mod metadata_store;
pub mod object_service;
pub mod quota;
pub mod storage_id;
pub mod token_issuer;

#[cfg(test)]
pub(crate) mod test_support;

use crate::errors::{ServiceError, ServiceResult};
use std::{future::Future, time::Duration};

/// Run a call to an external collaborator under a deadline.
///
/// Elapsed deadlines become `ServiceError::Timeout`; nothing is retried here.
pub(crate) async fn bounded<T, F>(what: &'static str, limit: Duration, fut: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("{} exceeded {:?}", what, limit);
            Err(ServiceError::Timeout(what))
        }
    }
}

//! Subscription plans as seen by the quota engine.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A plan row in the `subscriptions` table, or the configured default.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Plan {
    /// Plan name (e.g. "free", "fleet-pro").
    pub plan: String,

    /// Maximum bytes the owner may keep registered.
    pub quota_bytes: i64,
}

impl Plan {
    pub fn new(plan: impl Into<String>, quota_bytes: i64) -> Self {
        Self {
            plan: plan.into(),
            quota_bytes,
        }
    }
}

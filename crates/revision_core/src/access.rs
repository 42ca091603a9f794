//! crates/revision_core/src/access.rs
//!
//! Thin authorization layer: combines the caller's tier with the quota gate,
//! and decides who may act as a grader.

use tracing::warn;

use crate::domain::{ContentType, Principal, QuotaStatus};
use crate::error::{EngineError, EngineResult};
use crate::quota::{QuotaGate, QuotaGrant};

pub struct AccessController {
    quota: QuotaGate,
}

impl AccessController {
    pub fn new(quota: QuotaGate) -> Self {
        Self { quota }
    }

    /// Must be called once per generation request, before the generator runs.
    pub async fn authorize_generation(
        &self,
        principal: &Principal,
        content_type: ContentType,
    ) -> EngineResult<QuotaGrant> {
        self.quota.check_and_consume(principal, content_type).await
    }

    /// Hands back a grant whose generation did not complete.
    pub async fn release(&self, grant: &QuotaGrant) -> EngineResult<()> {
        self.quota.release(grant).await
    }

    pub async fn quota_status(&self, principal: &Principal) -> EngineResult<Vec<QuotaStatus>> {
        self.quota.status(principal).await
    }

    pub fn require_grader(&self, principal: &Principal) -> EngineResult<()> {
        if principal.is_grader {
            Ok(())
        } else {
            warn!(user_id = %principal.user_id, "Non-grader attempted to review an answer");
            Err(EngineError::Forbidden)
        }
    }
}

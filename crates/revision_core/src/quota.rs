//! crates/revision_core/src/quota.rs
//!
//! The daily generation quota. The policy table is fixed; counters live in the
//! durable store and are only ever changed through its atomic consume/release.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ContentType, Principal, QuotaStatus};
use crate::error::{EngineError, EngineResult};
use crate::ports::{Clock, DatabaseService};

pub const FREE_FLASHCARD_SETS_PER_DAY: u32 = 1;
pub const FREE_QUIZZES_PER_DAY: u32 = 0;
pub const FREE_MOCK_EXAMS_PER_DAY: u32 = 3;

/// Daily limit for a content type and tier. `None` means unlimited.
pub fn daily_limit(content_type: ContentType, is_subscribed: bool) -> Option<u32> {
    if is_subscribed {
        return None;
    }
    Some(match content_type {
        ContentType::Flashcard => FREE_FLASHCARD_SETS_PER_DAY,
        ContentType::Quiz => FREE_QUIZZES_PER_DAY,
        ContentType::MockExam => FREE_MOCK_EXAMS_PER_DAY,
    })
}

/// Proof that a generation was allowed. Metered grants can be handed back
/// with [`QuotaGate::release`] when the generation does not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaGrant {
    pub user_id: Uuid,
    pub content_type: ContentType,
    pub day: NaiveDate,
    /// Generations left today after this one, `None` for unlimited.
    pub remaining: Option<u32>,
}

impl QuotaGrant {
    pub fn is_metered(&self) -> bool {
        self.remaining.is_some()
    }
}

pub struct QuotaGate {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl QuotaGate {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Allows and counts one generation, or fails with `QuotaExceeded`.
    pub async fn check_and_consume(
        &self,
        principal: &Principal,
        content_type: ContentType,
    ) -> EngineResult<QuotaGrant> {
        let today = self.clock.today();
        let limit = match daily_limit(content_type, principal.is_subscribed) {
            None => {
                return Ok(QuotaGrant {
                    user_id: principal.user_id,
                    content_type,
                    day: today,
                    remaining: None,
                })
            }
            Some(limit) => limit,
        };

        if limit == 0 {
            return Err(EngineError::QuotaExceeded { content_type, limit });
        }

        match self
            .db
            .try_consume_quota(principal.user_id, content_type, today, limit)
            .await?
        {
            Some(count) => {
                let remaining = limit.saturating_sub(count);
                info!(
                    user_id = %principal.user_id,
                    %content_type,
                    remaining,
                    "Quota consumed"
                );
                Ok(QuotaGrant {
                    user_id: principal.user_id,
                    content_type,
                    day: today,
                    remaining: Some(remaining),
                })
            }
            None => {
                info!(user_id = %principal.user_id, %content_type, limit, "Quota exceeded");
                Err(EngineError::QuotaExceeded { content_type, limit })
            }
        }
    }

    /// Returns a metered grant's unit to the counter.
    pub async fn release(&self, grant: &QuotaGrant) -> EngineResult<()> {
        if !grant.is_metered() {
            return Ok(());
        }
        self.db
            .release_quota(grant.user_id, grant.content_type, grant.day)
            .await
            .map_err(|e| {
                warn!(user_id = %grant.user_id, content_type = %grant.content_type, "Failed to release quota: {}", e);
                EngineError::from(e)
            })
    }

    /// Today's allowance for every content type.
    pub async fn status(&self, principal: &Principal) -> EngineResult<Vec<QuotaStatus>> {
        let today = self.clock.today();
        let mut statuses = Vec::with_capacity(ContentType::ALL.len());

        for content_type in ContentType::ALL {
            let used = match self.db.get_quota_state(principal.user_id, content_type).await? {
                Some(state) if state.reset_date >= today => state.count,
                _ => 0,
            };
            let limit = daily_limit(content_type, principal.is_subscribed);
            statuses.push(QuotaStatus {
                content_type,
                limit,
                used,
                remaining: limit.map(|l| l.saturating_sub(used)),
            });
        }

        Ok(statuses)
    }
}

//! crates/revision_core/src/ledger.rs
//!
//! The progress ledger: one immutable fact per generation and per grading.
//! Facts are written by the store in the same transaction as the change they
//! describe, so this type builds them and reads them back but never writes alone.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{ContentItem, LedgerEntry, LedgerEvent, NewLedgerEntry};
use crate::error::EngineResult;
use crate::ports::DatabaseService;

pub struct ProgressLedger {
    db: Arc<dyn DatabaseService>,
}

impl ProgressLedger {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    fn entry(
        item: &ContentItem,
        event: LedgerEvent,
        marks_earned: u32,
        marks_possible: u32,
        recorded_at: DateTime<Utc>,
    ) -> NewLedgerEntry {
        NewLedgerEntry {
            user_id: item.owner_user_id,
            item_id: item.id,
            subject: item.subject.clone(),
            topic: item.topic.clone(),
            content_type: item.content_type,
            event,
            marks_earned,
            marks_possible,
            recorded_at,
        }
    }

    pub fn generation_entry(&self, item: &ContentItem) -> NewLedgerEntry {
        Self::entry(item, LedgerEvent::Generated, 0, 0, item.created_at)
    }

    /// `marks_possible` only counts questions that received a mark, so answers
    /// pending review do not pull the average down.
    pub fn grading_entry(
        &self,
        item: &ContentItem,
        marks_earned: u32,
        marks_possible: u32,
        recorded_at: DateTime<Utc>,
    ) -> NewLedgerEntry {
        Self::entry(item, LedgerEvent::Graded, marks_earned, marks_possible, recorded_at)
    }

    pub async fn entries_after(&self, user_id: Uuid, after_seq: i64) -> EngineResult<Vec<LedgerEntry>> {
        Ok(self.db.get_ledger_entries(user_id, after_seq).await?)
    }
}

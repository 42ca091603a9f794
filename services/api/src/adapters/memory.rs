//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the `DatabaseService` port. Used when no
//! `DATABASE_URL` is configured and by the integration tests. Every operation
//! takes the single state lock, so each one is atomic the same way a database
//! transaction would be.

use async_trait::async_trait;
use chrono::NaiveDate;
use revision_core::domain::{
    AnswerRecord, AnswerReview, ContentFilter, ContentHeader, ContentItem, ContentType,
    GradeSource, LedgerEntry, NewLedgerEntry, QuotaState, Submission, SubscriptionEvent, User,
};
use revision_core::ports::{DatabaseService, PortError, PortResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    subscription_events: HashSet<String>,
    quota: HashMap<(Uuid, ContentType), QuotaState>,
    items: HashMap<Uuid, ContentItem>,
    answers: HashMap<Uuid, AnswerRecord>,
    reviews: HashMap<Uuid, AnswerReview>,
    ledger: HashMap<Uuid, Vec<LedgerEntry>>,
}

impl State {
    fn append_ledger(&mut self, entry: &NewLedgerEntry) -> PortResult<i64> {
        if !self.users.contains_key(&entry.user_id) {
            return Err(PortError::NotFound(format!("User {} not found", entry.user_id)));
        }
        let entries = self.ledger.entry(entry.user_id).or_default();
        let seq = entries.last().map_or(1, |e| e.seq + 1);
        entries.push(entry.clone().with_seq(seq));
        Ok(seq)
    }

    fn answer_with_review(&self, answer: &AnswerRecord) -> AnswerRecord {
        match self.reviews.get(&answer.id) {
            Some(review) if answer.marks_awarded.is_none() => AnswerRecord {
                marks_awarded: Some(review.marks_awarded),
                graded_by: Some(GradeSource::Reviewer { grader_id: review.grader_id }),
                ..answer.clone()
            },
            _ => answer.clone(),
        }
    }
}

/// A `DatabaseService` kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<State>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DatabaseService for MemoryDb {
    async fn get_or_create_user(&self, user_id: Uuid) -> PortResult<User> {
        let mut state = self.lock();
        let user = state.users.entry(user_id).or_insert_with(|| User {
            user_id,
            is_subscribed: false,
            created_at: chrono::Utc::now(),
        });
        Ok(user.clone())
    }

    async fn apply_subscription_event(&self, event: &SubscriptionEvent) -> PortResult<bool> {
        let mut state = self.lock();
        if !state.users.contains_key(&event.user_id) {
            return Err(PortError::NotFound(format!("User {} not found", event.user_id)));
        }
        if !state.subscription_events.insert(event.event_id.clone()) {
            return Ok(false);
        }
        if let Some(user) = state.users.get_mut(&event.user_id) {
            user.is_subscribed = event.kind.is_subscribed_after();
        }
        Ok(true)
    }

    async fn try_consume_quota(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        today: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>> {
        let mut state = self.lock();
        let counter = state
            .quota
            .entry((user_id, content_type))
            .or_insert_with(|| QuotaState {
                user_id,
                content_type,
                count: 0,
                reset_date: today,
            });

        if counter.reset_date < today {
            counter.count = 0;
            counter.reset_date = today;
        }
        if counter.count >= limit {
            return Ok(None);
        }
        counter.count += 1;
        Ok(Some(counter.count))
    }

    async fn release_quota(&self, user_id: Uuid, content_type: ContentType, day: NaiveDate) -> PortResult<()> {
        let mut state = self.lock();
        if let Some(counter) = state.quota.get_mut(&(user_id, content_type)) {
            if counter.reset_date == day && counter.count > 0 {
                counter.count -= 1;
            }
        }
        Ok(())
    }

    async fn get_quota_state(&self, user_id: Uuid, content_type: ContentType) -> PortResult<Option<QuotaState>> {
        Ok(self.lock().quota.get(&(user_id, content_type)).cloned())
    }

    async fn create_content(&self, item: &ContentItem, generation: &NewLedgerEntry) -> PortResult<()> {
        let mut state = self.lock();
        if state.items.contains_key(&item.id) {
            return Err(PortError::Conflict(format!("Content item {} already exists", item.id)));
        }
        state.append_ledger(generation)?;
        state.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_content(&self, item_id: Uuid) -> PortResult<ContentItem> {
        self.lock()
            .items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Content item {} not found", item_id)))
    }

    async fn list_content(&self, owner_user_id: Uuid, filter: &ContentFilter) -> PortResult<Vec<ContentHeader>> {
        let state = self.lock();
        let mut headers: Vec<ContentHeader> = state
            .items
            .values()
            .filter(|item| item.owner_user_id == owner_user_id)
            .filter(|item| filter.content_type.map_or(true, |t| item.content_type == t))
            .filter(|item| filter.subject.as_deref().map_or(true, |s| item.subject == s))
            .filter(|item| filter.topic.as_deref().map_or(true, |t| item.topic == t))
            .map(ContentItem::header)
            .collect();
        headers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(headers)
    }

    async fn record_submission(&self, submission: &Submission) -> PortResult<()> {
        let mut state = self.lock();
        let item = state
            .items
            .get(&submission.item_id)
            .filter(|item| item.owner_user_id == submission.user_id)
            .ok_or_else(|| PortError::NotFound(format!("Content item {} not found", submission.item_id)))?;
        if item.is_submitted() {
            return Err(PortError::Conflict(format!(
                "Content item {} is already submitted",
                submission.item_id
            )));
        }

        state.append_ledger(&submission.grading)?;
        if let Some(item) = state.items.get_mut(&submission.item_id) {
            item.submitted_at = Some(submission.submitted_at);
        }
        for answer in &submission.answers {
            state.answers.insert(answer.id, answer.clone());
        }
        Ok(())
    }

    async fn get_answers_for_item(&self, item_id: Uuid) -> PortResult<Vec<AnswerRecord>> {
        let state = self.lock();
        let mut answers: Vec<AnswerRecord> = state
            .answers
            .values()
            .filter(|a| a.item_id == item_id)
            .map(|a| state.answer_with_review(a))
            .collect();
        answers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(answers)
    }

    async fn get_answer(&self, answer_id: Uuid) -> PortResult<AnswerRecord> {
        let state = self.lock();
        state
            .answers
            .get(&answer_id)
            .map(|a| state.answer_with_review(a))
            .ok_or_else(|| PortError::NotFound(format!("Answer {} not found", answer_id)))
    }

    async fn record_review(&self, review: &AnswerReview, grading: &NewLedgerEntry) -> PortResult<()> {
        let mut state = self.lock();
        let answer = state
            .answers
            .get(&review.answer_id)
            .ok_or_else(|| PortError::NotFound(format!("Answer {} not found", review.answer_id)))?;
        if answer.marks_awarded.is_some() || state.reviews.contains_key(&review.answer_id) {
            return Err(PortError::Conflict(format!("Answer {} already has a mark", review.answer_id)));
        }

        state.append_ledger(grading)?;
        state.reviews.insert(review.answer_id, review.clone());
        Ok(())
    }

    async fn get_ledger_entries(&self, user_id: Uuid, after_seq: i64) -> PortResult<Vec<LedgerEntry>> {
        Ok(self
            .lock()
            .ledger
            .get(&user_id)
            .map(|entries| entries.iter().filter(|e| e.seq > after_seq).cloned().collect())
            .unwrap_or_default())
    }
}

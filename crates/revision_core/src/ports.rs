//! crates/revision_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::{
    AnswerRecord, AnswerReview, ContentFilter, ContentHeader, ContentItem, ContentType,
    GenerationRequest, LedgerEntry, NewLedgerEntry, QuotaState, Question, RawContent,
    Submission, SubscriptionEvent, User,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A conditional write lost: the row was already in the target state.
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The durable store. Every method that writes more than one row does so in a
/// single transaction.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn get_or_create_user(&self, user_id: Uuid) -> PortResult<User>;

    /// Applies a subscription event once. Returns `false` when `event_id` was
    /// already applied.
    async fn apply_subscription_event(&self, event: &SubscriptionEvent) -> PortResult<bool>;

    // --- Daily Quota ---

    /// Atomically resets the counter if `reset_date < today`, then increments it
    /// if `count < limit`. Returns the new count, or `None` when the limit is
    /// already reached.
    async fn try_consume_quota(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        today: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>>;

    /// Gives back one unit consumed on `day`. No-op once the counter has moved on.
    async fn release_quota(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        day: NaiveDate,
    ) -> PortResult<()>;

    async fn get_quota_state(
        &self,
        user_id: Uuid,
        content_type: ContentType,
    ) -> PortResult<Option<QuotaState>>;

    // --- Content Items ---

    /// Persists the item, all of its questions and its generation ledger entry.
    async fn create_content(&self, item: &ContentItem, generation: &NewLedgerEntry) -> PortResult<()>;

    async fn get_content(&self, item_id: Uuid) -> PortResult<ContentItem>;

    async fn list_content(&self, owner_user_id: Uuid, filter: &ContentFilter) -> PortResult<Vec<ContentHeader>>;

    // --- Answers ---

    /// Marks the item submitted and writes its answers and grading ledger entry.
    /// Fails with `PortError::Conflict` if the item was already submitted.
    async fn record_submission(&self, submission: &Submission) -> PortResult<()>;

    async fn get_answers_for_item(&self, item_id: Uuid) -> PortResult<Vec<AnswerRecord>>;

    async fn get_answer(&self, answer_id: Uuid) -> PortResult<AnswerRecord>;

    /// Stores a review for a pending answer together with its ledger entry.
    /// Fails with `PortError::Conflict` if the answer already has a mark.
    async fn record_review(&self, review: &AnswerReview, grading: &NewLedgerEntry) -> PortResult<()>;

    // --- Progress Ledger ---

    /// Returns the user's ledger entries with `seq > after_seq`, ordered by `seq`.
    async fn get_ledger_entries(&self, user_id: Uuid, after_seq: i64) -> PortResult<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait ContentGenerationService: Send + Sync {
    /// Produces raw, unvalidated study material for a request.
    async fn generate_content(&self, request: &GenerationRequest) -> PortResult<RawContent>;
}

#[async_trait]
pub trait MarkingService: Send + Sync {
    /// Proposes a mark for a free-text response from the question's stored rubric.
    /// `Ok(None)` leaves the answer pending review.
    async fn mark_answer(&self, question: &Question, response: &str) -> PortResult<Option<u32>>;
}

/// The server's clock. Quota days are UTC calendar days of `now()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

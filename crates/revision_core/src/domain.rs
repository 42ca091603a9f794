//! crates/revision_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Content Types and Grading Models
//=========================================================================================

/// The three kinds of generated study material. Each one is also a quota key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    Flashcard,
    Quiz,
    MockExam,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Flashcard, ContentType::Quiz, ContentType::MockExam];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Flashcard => "flashcard",
            ContentType::Quiz => "quiz",
            ContentType::MockExam => "mock_exam",
        }
    }

    /// Flashcard sets are study aids only; quizzes and mock exams are submitted for marks.
    pub fn is_gradable(&self) -> bool {
        !matches!(self, ContentType::Flashcard)
    }

    /// The grading model every question of this content type carries.
    pub fn grading_model(&self) -> GradingModel {
        match self {
            ContentType::Quiz => GradingModel::Auto,
            ContentType::Flashcard | ContentType::MockExam => GradingModel::Manual,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown content type '{0}'")]
pub struct UnknownContentType(pub String);

impl FromStr for ContentType {
    type Err = UnknownContentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flashcard" => Ok(ContentType::Flashcard),
            "quiz" => Ok(ContentType::Quiz),
            "mock_exam" => Ok(ContentType::MockExam),
            other => Err(UnknownContentType(other.to_string())),
        }
    }
}

/// `Auto` questions have a canonical correct option; `Manual` questions are free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingModel {
    Auto,
    Manual,
}

impl GradingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradingModel::Auto => "auto",
            GradingModel::Manual => "manual",
        }
    }
}

//=========================================================================================
// Content Items and Questions
//=========================================================================================

/// One labelled choice of a multiple-choice question (e.g. `A` → "Mitochondria").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOption {
    pub label: String,
    pub text: String,
}

/// The grading data attached to a question, tagged by grading model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grading {
    Auto {
        options: Vec<AnswerOption>,
        correct_option: String,
    },
    Manual {
        sample_answer: String,
        explanation: Option<String>,
        keywords: Vec<String>,
    },
}

impl Grading {
    pub fn model(&self) -> GradingModel {
        match self {
            Grading::Auto { .. } => GradingModel::Auto,
            Grading::Manual { .. } => GradingModel::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: Uuid,
    pub item_id: Uuid,
    pub number: u32,
    pub prompt: String,
    pub marks: u32,
    pub grading: Grading,
}

/// A generated flashcard set, quiz or mock exam together with its ordered questions.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub content_type: ContentType,
    pub subject: String,
    pub topic: String,
    pub exam_board: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub questions: Vec<Question>,
}

impl ContentItem {
    pub fn total_marks(&self) -> u32 {
        self.questions.iter().map(|q| q.marks).sum()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }

    pub fn question(&self, question_id: Uuid) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn header(&self) -> ContentHeader {
        ContentHeader {
            id: self.id,
            content_type: self.content_type,
            subject: self.subject.clone(),
            topic: self.topic.clone(),
            exam_board: self.exam_board.clone(),
            title: self.title.clone(),
            question_count: self.questions.len() as u32,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
        }
    }
}

/// A content item without its questions, as shown in listings.
#[derive(Debug, Clone)]
pub struct ContentHeader {
    pub id: Uuid,
    pub content_type: ContentType,
    pub subject: String,
    pub topic: String,
    pub exam_board: String,
    pub title: String,
    pub question_count: u32,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub content_type: Option<ContentType>,
    pub subject: Option<String>,
    pub topic: Option<String>,
}

/// What a user asked the generator for.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub content_type: ContentType,
    pub subject: String,
    pub topic: String,
    pub exam_board: String,
    pub count: u32,
}

//=========================================================================================
// Raw Generator Output
//=========================================================================================
// Everything is optional here: the generator is untrusted and its output is only
// turned into a `ContentItem` after validation.

#[derive(Debug, Clone, Default)]
pub struct RawContent {
    pub title: Option<String>,
    pub questions: Vec<RawQuestion>,
}

#[derive(Debug, Clone, Default)]
pub struct RawQuestion {
    pub number: Option<i64>,
    pub prompt: Option<String>,
    pub marks: Option<i64>,
    pub options: Vec<RawOption>,
    pub correct_option: Option<String>,
    pub answer: Option<String>,
    pub explanation: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawOption {
    pub label: Option<String>,
    pub text: Option<String>,
}

//=========================================================================================
// Users, Identity and Quota State
//=========================================================================================

#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub is_subscribed: bool,
    pub created_at: DateTime<Utc>,
}

/// A verified caller: identity from the identity provider, tier from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub is_subscribed: bool,
    pub is_grader: bool,
}

/// The daily counter kept per quota key `(user_id, content_type)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaState {
    pub user_id: Uuid,
    pub content_type: ContentType,
    pub count: u32,
    pub reset_date: NaiveDate,
}

/// Today's allowance for one content type. `None` limits mean unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub content_type: ContentType,
    pub limit: Option<u32>,
    pub used: u32,
    pub remaining: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEventKind {
    Activated,
    Cancelled,
    PaymentFailed,
}

impl SubscriptionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionEventKind::Activated => "activated",
            SubscriptionEventKind::Cancelled => "cancelled",
            SubscriptionEventKind::PaymentFailed => "payment_failed",
        }
    }

    /// The subscription flag a user holds after this event is applied.
    pub fn is_subscribed_after(&self) -> bool {
        matches!(self, SubscriptionEventKind::Activated)
    }
}

/// A subscription change reported by the payment processor.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub event_id: String,
    pub user_id: Uuid,
    pub kind: SubscriptionEventKind,
    pub received_at: DateTime<Utc>,
}

//=========================================================================================
// Answers and Submissions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeSource {
    /// Exact option match, or a blank free-text answer.
    Auto,
    /// Computed by the server-side marking service from the stored rubric.
    Marker,
    /// Supplied later by a trusted grader.
    Reviewer { grader_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStatus {
    Graded,
    PendingReview,
}

/// One submitted answer. Never mutated; a review is stored alongside it.
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub question_id: Uuid,
    pub attempt: u32,
    pub response: String,
    pub is_correct: Option<bool>,
    pub marks_awarded: Option<u32>,
    pub graded_by: Option<GradeSource>,
    pub created_at: DateTime<Utc>,
}

impl AnswerRecord {
    pub fn status(&self) -> AnswerStatus {
        if self.marks_awarded.is_some() {
            AnswerStatus::Graded
        } else {
            AnswerStatus::PendingReview
        }
    }
}

/// A trusted grader's mark for an answer that was left pending review.
#[derive(Debug, Clone)]
pub struct AnswerReview {
    pub answer_id: Uuid,
    pub grader_id: Uuid,
    pub marks_awarded: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubmittedAnswer {
    pub question_id: Uuid,
    pub response: String,
}

/// Everything written by one submission, persisted as a unit.
#[derive(Debug, Clone)]
pub struct Submission {
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub answers: Vec<AnswerRecord>,
    pub grading: NewLedgerEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreReport {
    pub total_marks: u32,
    pub earned_marks: u32,
    pub percentage: u32,
    pub pending_review: u32,
}

#[derive(Debug, Clone)]
pub struct QuestionResult {
    pub question: Question,
    pub answer: Option<AnswerRecord>,
}

#[derive(Debug, Clone)]
pub struct ItemResults {
    pub item_id: Uuid,
    pub content_type: ContentType,
    pub title: String,
    pub score: ScoreReport,
    pub questions: Vec<QuestionResult>,
}

//=========================================================================================
// Progress Ledger
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    Generated,
    Graded,
}

impl LedgerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEvent::Generated => "generated",
            LedgerEvent::Graded => "graded",
        }
    }
}

impl FromStr for LedgerEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(LedgerEvent::Generated),
            "graded" => Ok(LedgerEvent::Graded),
            other => Err(format!("unknown ledger event '{}'", other)),
        }
    }
}

/// A ledger fact before the store has assigned its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub subject: String,
    pub topic: String,
    pub content_type: ContentType,
    pub event: LedgerEvent,
    pub marks_earned: u32,
    pub marks_possible: u32,
    pub recorded_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    pub fn with_seq(self, seq: i64) -> LedgerEntry {
        LedgerEntry {
            seq,
            user_id: self.user_id,
            item_id: self.item_id,
            subject: self.subject,
            topic: self.topic,
            content_type: self.content_type,
            event: self.event,
            marks_earned: self.marks_earned,
            marks_possible: self.marks_possible,
            recorded_at: self.recorded_at,
        }
    }
}

/// An append-only ledger fact. `seq` increases per user in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub seq: i64,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub subject: String,
    pub topic: String,
    pub content_type: ContentType,
    pub event: LedgerEvent,
    pub marks_earned: u32,
    pub marks_possible: u32,
    pub recorded_at: DateTime<Utc>,
}

//=========================================================================================
// Progress Summaries (derived from the ledger)
//=========================================================================================

/// Folded statistics for one content type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentStats {
    pub generated: u64,
    pub graded_items: BTreeSet<Uuid>,
    pub marks_earned: u64,
    pub marks_possible: u64,
}

impl ContentStats {
    pub fn graded(&self) -> u64 {
        self.graded_items.len() as u64
    }

    /// Weighted average over every graded mark, `None` before anything was graded.
    pub fn average_percentage(&self) -> Option<f64> {
        if self.marks_possible == 0 {
            None
        } else {
            Some(self.marks_earned as f64 * 100.0 / self.marks_possible as f64)
        }
    }

    pub fn merge(&mut self, other: &ContentStats) {
        self.generated += other.generated;
        self.graded_items.extend(other.graded_items.iter().copied());
        self.marks_earned += other.marks_earned;
        self.marks_possible += other.marks_possible;
    }
}

pub type TypeBreakdown = BTreeMap<ContentType, ContentStats>;

#[derive(Debug, Clone, PartialEq)]
pub struct TopicProgress {
    pub subject: String,
    pub topic: String,
    pub by_type: TypeBreakdown,
}

impl TopicProgress {
    /// The lowest per-type average with graded data.
    pub fn lowest_average(&self) -> Option<f64> {
        self.by_type
            .values()
            .filter_map(ContentStats::average_percentage)
            .fold(None, |acc: Option<f64>, avg| Some(acc.map_or(avg, |a| a.min(avg))))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSummary {
    pub user_id: Uuid,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub totals: TypeBreakdown,
    pub topics: Vec<TopicProgress>,
    pub weak_topics: Vec<TopicProgress>,
}

/// Graded work recorded on one UTC day for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    pub by_type: TypeBreakdown,
}

/// The running result of one graded item. Later reviews add to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradedItem {
    pub item_id: Uuid,
    pub subject: String,
    pub topic: String,
    pub content_type: ContentType,
    pub marks_earned: u64,
    pub marks_possible: u64,
    pub submitted_at: DateTime<Utc>,
}

impl GradedItem {
    pub fn percentage(&self) -> Option<f64> {
        if self.marks_possible == 0 {
            None
        } else {
            Some(self.marks_earned as f64 * 100.0 / self.marks_possible as f64)
        }
    }
}

/// Topic breakdown plus the most recently graded items for one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectAnalytics {
    pub summary: ProgressSummary,
    pub recent: Vec<GradedItem>,
}

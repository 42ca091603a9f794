//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between the client and the REST API,
//! and their conversions from the core domain types.

use chrono::{DateTime, NaiveDate, Utc};
use revision_core::{
    domain::{
        AnswerRecord, AnswerStatus, ContentHeader, ContentItem, ContentStats, ContentType,
        DailyPerformance, GradeSource, GradedItem, Grading, ItemResults, ProgressSummary,
        Question, QuotaStatus, ScoreReport, SubjectAnalytics, SubmittedAnswer,
        SubscriptionEventKind, TopicProgress, TypeBreakdown,
    },
    Generated,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Requests Sent FROM the Client
//=========================================================================================

#[derive(Deserialize, Debug, ToSchema)]
pub struct GenerateRequest {
    /// One of `flashcard`, `quiz`, `mock_exam`.
    pub content_type: String,
    pub subject: String,
    pub topic: String,
    pub exam_board: String,
    /// Number of flashcards or questions.
    pub count: u32,
}

#[derive(Deserialize, Debug, IntoParams)]
pub struct ListQuery {
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub topic: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SubmitRequest {
    pub answers: Vec<AnswerPayload>,
}

/// Only the question and the response are accepted; marks are always computed server-side.
#[derive(Deserialize, Debug, ToSchema)]
pub struct AnswerPayload {
    pub question_id: Uuid,
    pub response: String,
}

impl From<AnswerPayload> for SubmittedAnswer {
    fn from(payload: AnswerPayload) -> Self {
        SubmittedAnswer {
            question_id: payload.question_id,
            response: payload.response,
        }
    }
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ReviewRequest {
    pub marks: u32,
}

#[derive(Deserialize, Debug, IntoParams)]
pub struct ProgressQuery {
    pub subject: Option<String>,
    pub topic: Option<String>,
}

#[derive(Deserialize, Debug, IntoParams)]
pub struct HistoryQuery {
    /// Days back from today, today included. Defaults to 30.
    pub days: Option<u32>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SubscriptionEventPayload {
    pub event_id: String,
    pub user_id: Uuid,
    /// One of `activated`, `cancelled`, `payment_failed`.
    pub kind: String,
}

pub fn parse_event_kind(kind: &str) -> Option<SubscriptionEventKind> {
    match kind {
        "activated" => Some(SubscriptionEventKind::Activated),
        "cancelled" => Some(SubscriptionEventKind::Cancelled),
        "payment_failed" => Some(SubscriptionEventKind::PaymentFailed),
        _ => None,
    }
}

//=========================================================================================
// Responses Sent TO the Client
//=========================================================================================

#[derive(Serialize, Debug, ToSchema)]
pub struct GenerateResponse {
    pub item_id: Uuid,
    pub content_type: String,
    pub question_count: u32,
    /// Generations of this type left today; absent when unlimited.
    pub remaining_today: Option<u32>,
}

impl From<Generated> for GenerateResponse {
    fn from(generated: Generated) -> Self {
        Self {
            item_id: generated.item_id,
            content_type: generated.content_type.as_str().to_string(),
            question_count: generated.question_count,
            remaining_today: generated.remaining,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ContentHeaderView {
    pub id: Uuid,
    pub content_type: String,
    pub subject: String,
    pub topic: String,
    pub exam_board: String,
    pub title: String,
    pub question_count: u32,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl From<ContentHeader> for ContentHeaderView {
    fn from(header: ContentHeader) -> Self {
        Self {
            id: header.id,
            content_type: header.content_type.as_str().to_string(),
            subject: header.subject,
            topic: header.topic,
            exam_board: header.exam_board,
            title: header.title,
            question_count: header.question_count,
            created_at: header.created_at,
            submitted_at: header.submitted_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OptionView {
    pub label: String,
    pub text: String,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QuestionView {
    pub id: Uuid,
    pub number: u32,
    pub prompt: String,
    pub marks: u32,
    pub grading_model: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl QuestionView {
    /// Answers are revealed for flashcards (their back) and for submitted items.
    fn from_question(question: &Question, reveal: bool) -> Self {
        let (options, correct_option, sample_answer, explanation) = match &question.grading {
            Grading::Auto { options, correct_option } => (
                options
                    .iter()
                    .map(|o| OptionView { label: o.label.clone(), text: o.text.clone() })
                    .collect(),
                reveal.then(|| correct_option.clone()),
                None,
                None,
            ),
            Grading::Manual { sample_answer, explanation, .. } => (
                Vec::new(),
                None,
                reveal.then(|| sample_answer.clone()),
                if reveal { explanation.clone() } else { None },
            ),
        };
        Self {
            id: question.id,
            number: question.number,
            prompt: question.prompt.clone(),
            marks: question.marks,
            grading_model: question.grading.model().as_str().to_string(),
            options,
            correct_option,
            sample_answer,
            explanation,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ContentView {
    pub id: Uuid,
    pub content_type: String,
    pub subject: String,
    pub topic: String,
    pub exam_board: String,
    pub title: String,
    pub total_marks: u32,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionView>,
}

impl From<ContentItem> for ContentView {
    fn from(item: ContentItem) -> Self {
        let reveal = item.content_type == ContentType::Flashcard || item.is_submitted();
        Self {
            id: item.id,
            content_type: item.content_type.as_str().to_string(),
            total_marks: item.total_marks(),
            questions: item
                .questions
                .iter()
                .map(|q| QuestionView::from_question(q, reveal))
                .collect(),
            subject: item.subject,
            topic: item.topic,
            exam_board: item.exam_board,
            title: item.title,
            created_at: item.created_at,
            submitted_at: item.submitted_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ScoreView {
    pub total_marks: u32,
    pub earned_marks: u32,
    pub percentage: u32,
    pub pending_review: u32,
}

impl From<ScoreReport> for ScoreView {
    fn from(score: ScoreReport) -> Self {
        Self {
            total_marks: score.total_marks,
            earned_marks: score.earned_marks,
            percentage: score.percentage,
            pending_review: score.pending_review,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct AnswerView {
    pub id: Uuid,
    pub question_id: Uuid,
    pub response: String,
    pub is_correct: Option<bool>,
    pub marks_awarded: Option<u32>,
    /// `graded` or `pending_review`.
    pub status: String,
    /// `auto`, `marker` or `reviewer`; absent while pending.
    pub graded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AnswerRecord> for AnswerView {
    fn from(answer: AnswerRecord) -> Self {
        let status = match answer.status() {
            AnswerStatus::Graded => "graded",
            AnswerStatus::PendingReview => "pending_review",
        };
        let graded_by = answer.graded_by.map(|source| {
            match source {
                GradeSource::Auto => "auto",
                GradeSource::Marker => "marker",
                GradeSource::Reviewer { .. } => "reviewer",
            }
            .to_string()
        });
        Self {
            id: answer.id,
            question_id: answer.question_id,
            response: answer.response,
            is_correct: answer.is_correct,
            marks_awarded: answer.marks_awarded,
            status: status.to_string(),
            graded_by,
            created_at: answer.created_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QuestionResultView {
    pub question: QuestionView,
    pub answer: Option<AnswerView>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ResultsView {
    pub item_id: Uuid,
    pub content_type: String,
    pub title: String,
    pub score: ScoreView,
    pub questions: Vec<QuestionResultView>,
}

impl From<ItemResults> for ResultsView {
    fn from(results: ItemResults) -> Self {
        Self {
            item_id: results.item_id,
            content_type: results.content_type.as_str().to_string(),
            title: results.title,
            score: results.score.into(),
            questions: results
                .questions
                .into_iter()
                .map(|r| QuestionResultView {
                    question: QuestionView::from_question(&r.question, true),
                    answer: r.answer.map(AnswerView::from),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QuotaView {
    pub content_type: String,
    /// Absent when unlimited.
    pub limit: Option<u32>,
    pub used: u32,
    pub remaining: Option<u32>,
}

impl From<QuotaStatus> for QuotaView {
    fn from(status: QuotaStatus) -> Self {
        Self {
            content_type: status.content_type.as_str().to_string(),
            limit: status.limit,
            used: status.used,
            remaining: status.remaining,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QuotaResponse {
    pub is_subscribed: bool,
    pub quotas: Vec<QuotaView>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct StatsView {
    pub generated: u64,
    pub graded: u64,
    pub marks_earned: u64,
    pub marks_possible: u64,
    /// Weighted average percentage; absent until something is graded.
    pub average_percentage: Option<f64>,
}

impl From<&ContentStats> for StatsView {
    fn from(stats: &ContentStats) -> Self {
        Self {
            generated: stats.generated,
            graded: stats.graded(),
            marks_earned: stats.marks_earned,
            marks_possible: stats.marks_possible,
            average_percentage: stats.average_percentage().map(|a| (a * 10.0).round() / 10.0),
        }
    }
}

fn breakdown_view(breakdown: &TypeBreakdown) -> BTreeMap<String, StatsView> {
    breakdown
        .iter()
        .map(|(content_type, stats)| (content_type.as_str().to_string(), stats.into()))
        .collect()
}

#[derive(Serialize, Debug, ToSchema)]
pub struct TopicView {
    pub subject: String,
    pub topic: String,
    pub by_type: BTreeMap<String, StatsView>,
}

impl From<&TopicProgress> for TopicView {
    fn from(topic: &TopicProgress) -> Self {
        Self {
            subject: topic.subject.clone(),
            topic: topic.topic.clone(),
            by_type: breakdown_view(&topic.by_type),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ProgressView {
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub totals: BTreeMap<String, StatsView>,
    pub topics: Vec<TopicView>,
    pub weak_topics: Vec<TopicView>,
}

impl From<ProgressSummary> for ProgressView {
    fn from(summary: ProgressSummary) -> Self {
        Self {
            totals: breakdown_view(&summary.totals),
            topics: summary.topics.iter().map(TopicView::from).collect(),
            weak_topics: summary.weak_topics.iter().map(TopicView::from).collect(),
            subject: summary.subject,
            topic: summary.topic,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct DailyPerformanceView {
    pub date: NaiveDate,
    pub by_type: BTreeMap<String, StatsView>,
}

impl From<DailyPerformance> for DailyPerformanceView {
    fn from(day: DailyPerformance) -> Self {
        Self {
            date: day.date,
            by_type: breakdown_view(&day.by_type),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct GradedItemView {
    pub item_id: Uuid,
    pub content_type: String,
    pub topic: String,
    pub marks_earned: u64,
    pub marks_possible: u64,
    /// Absent while every answer is still pending review.
    pub percentage: Option<f64>,
    pub submitted_at: DateTime<Utc>,
}

impl From<GradedItem> for GradedItemView {
    fn from(item: GradedItem) -> Self {
        Self {
            percentage: item.percentage().map(|p| (p * 10.0).round() / 10.0),
            item_id: item.item_id,
            content_type: item.content_type.as_str().to_string(),
            topic: item.topic,
            marks_earned: item.marks_earned,
            marks_possible: item.marks_possible,
            submitted_at: item.submitted_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct AnalyticsView {
    pub subject: String,
    pub totals: BTreeMap<String, StatsView>,
    pub topics: Vec<TopicView>,
    pub weak_topics: Vec<TopicView>,
    pub recent: Vec<GradedItemView>,
}

impl AnalyticsView {
    pub fn new(subject: String, analytics: SubjectAnalytics) -> Self {
        let summary = ProgressView::from(analytics.summary);
        Self {
            subject,
            totals: summary.totals,
            topics: summary.topics,
            weak_topics: summary.weak_topics,
            recent: analytics.recent.into_iter().map(GradedItemView::from).collect(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SubscriptionEventResponse {
    /// `false` when the event was a re-delivery and changed nothing.
    pub applied: bool,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `shutting_down` once graceful shutdown has begun.
    pub status: String,
    pub version: String,
}

//! crates/revision_core/src/engine.rs
//!
//! `StudyEngine` is the single entry point the HTTP layer talks to. It wires the
//! quota gate, content store, scoring engine and progress ledger together and
//! owns the two request flows:
//!
//! - generation: authorize → generator → validate + persist (with ledger entry),
//!   releasing the quota if anything after authorization fails;
//! - submission: ownership → grade → persist answers (with ledger entry).

use chrono::{Days, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access::AccessController;
use crate::content::{validate_request, ContentStore};
use crate::domain::{
    AnswerRecord, AnswerReview, ContentFilter, ContentHeader, ContentItem, ContentType,
    DailyPerformance, GenerationRequest, GradeSource, ItemResults, Principal, ProgressSummary, QuestionResult,
    QuotaStatus, RawContent, ScoreReport, SubjectAnalytics, SubmittedAnswer, SubscriptionEvent,
};
use crate::error::{EngineError, EngineResult};
use crate::ledger::ProgressLedger;
use crate::ports::{Clock, ContentGenerationService, DatabaseService, MarkingService, PortError};
use crate::progress::ProgressAggregator;
use crate::quota::QuotaGate;
use crate::scoring::{Mark, ScoringEngine};

/// The generator is called at most this many times per request.
const GENERATOR_ATTEMPTS: u32 = 2;
/// Longest performance history window, in days.
pub const MAX_HISTORY_DAYS: u32 = 365;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub generator_timeout: Duration,
    pub max_items_per_request: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            generator_timeout: Duration::from_secs(60),
            max_items_per_request: 20,
        }
    }
}

/// The outcome of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub item_id: Uuid,
    pub content_type: ContentType,
    pub question_count: u32,
    /// Generations of this type left today, `None` for unlimited.
    pub remaining: Option<u32>,
}

pub struct StudyEngine {
    db: Arc<dyn DatabaseService>,
    generator: Arc<dyn ContentGenerationService>,
    clock: Arc<dyn Clock>,
    access: AccessController,
    content: ContentStore,
    scoring: ScoringEngine,
    ledger: Arc<ProgressLedger>,
    progress: ProgressAggregator,
    settings: EngineSettings,
}

impl StudyEngine {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        generator: Arc<dyn ContentGenerationService>,
        marker: Option<Arc<dyn MarkingService>>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let ledger = Arc::new(ProgressLedger::new(db.clone()));
        Self {
            access: AccessController::new(QuotaGate::new(db.clone(), clock.clone())),
            content: ContentStore::new(db.clone(), clock.clone(), ledger.clone()),
            scoring: ScoringEngine::new(marker),
            progress: ProgressAggregator::new(ledger.clone()),
            ledger,
            db,
            generator,
            clock,
            settings,
        }
    }

    //=====================================================================================
    // Identity and Subscriptions
    //=====================================================================================

    /// Resolves a verified user id into a principal, creating the user on first sight.
    pub async fn principal(&self, user_id: Uuid, is_grader: bool) -> EngineResult<Principal> {
        let user = self.db.get_or_create_user(user_id).await?;
        Ok(Principal {
            user_id: user.user_id,
            is_subscribed: user.is_subscribed,
            is_grader,
        })
    }

    /// Applies a payment-processor event. Re-delivered events are ignored.
    pub async fn apply_subscription_event(&self, event: &SubscriptionEvent) -> EngineResult<bool> {
        self.db.get_or_create_user(event.user_id).await?;
        let applied = self.db.apply_subscription_event(event).await?;
        if applied {
            info!(event_id = %event.event_id, user_id = %event.user_id, kind = event.kind.as_str(), "Subscription event applied");
        } else {
            info!(event_id = %event.event_id, "Duplicate subscription event ignored");
        }
        Ok(applied)
    }

    pub async fn quota_status(&self, principal: &Principal) -> EngineResult<Vec<QuotaStatus>> {
        self.access.quota_status(principal).await
    }

    //=====================================================================================
    // Generation
    //=====================================================================================

    pub async fn generate(&self, principal: &Principal, request: GenerationRequest) -> EngineResult<Generated> {
        validate_request(&request, self.settings.max_items_per_request)?;

        let grant = self
            .access
            .authorize_generation(principal, request.content_type)
            .await?;

        let outcome = async {
            let raw = self.call_generator(&request).await?;
            self.content.create(principal.user_id, &request, raw).await
        }
        .await;

        match outcome {
            Ok(item) => Ok(Generated {
                item_id: item.id,
                content_type: item.content_type,
                question_count: item.questions.len() as u32,
                remaining: grant.remaining,
            }),
            Err(e) => {
                if let Err(release_err) = self.access.release(&grant).await {
                    error!(user_id = %principal.user_id, "Quota could not be released after failed generation: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn call_generator(&self, request: &GenerationRequest) -> EngineResult<RawContent> {
        let timeout = self.settings.generator_timeout;
        let mut last_error = String::new();

        for attempt in 1..=GENERATOR_ATTEMPTS {
            match tokio::time::timeout(timeout, self.generator.generate_content(request)).await {
                Ok(Ok(raw)) => return Ok(raw),
                Ok(Err(e)) => {
                    warn!(attempt, content_type = %request.content_type, "Content generator failed: {}", e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(attempt, content_type = %request.content_type, "Content generator timed out");
                    last_error = format!("timed out after {}s", timeout.as_secs());
                }
            }
        }

        Err(EngineError::Generator(last_error))
    }

    //=====================================================================================
    // Content Access
    //=====================================================================================

    pub async fn fetch(&self, item_id: Uuid, user_id: Uuid) -> EngineResult<ContentItem> {
        self.content.get(item_id, user_id).await
    }

    pub async fn list(&self, user_id: Uuid, filter: &ContentFilter) -> EngineResult<Vec<ContentHeader>> {
        self.content.list(user_id, filter).await
    }

    //=====================================================================================
    // Submission, Results and Review
    //=====================================================================================

    pub async fn submit(
        &self,
        item_id: Uuid,
        user_id: Uuid,
        answers: &[SubmittedAnswer],
    ) -> EngineResult<ScoreReport> {
        self.content
            .record_answers(item_id, user_id, answers, &self.scoring)
            .await
    }

    /// Per-question breakdown of a submitted item. `NotFound` before submission.
    pub async fn results(&self, item_id: Uuid, user_id: Uuid) -> EngineResult<ItemResults> {
        let item = self.content.get(item_id, user_id).await?;
        if !item.is_submitted() {
            return Err(EngineError::NotFound(format!("no submission for item {}", item_id)));
        }

        let answers = self.db.get_answers_for_item(item.id).await?;
        let score = ScoringEngine::score(&item, &answers);
        let questions = item
            .questions
            .iter()
            .map(|q| QuestionResult {
                question: q.clone(),
                answer: answers.iter().find(|a| a.question_id == q.id).cloned(),
            })
            .collect();

        Ok(ItemResults {
            item_id: item.id,
            content_type: item.content_type,
            title: item.title,
            score,
            questions,
        })
    }

    /// A trusted grader's mark for an answer left pending review.
    pub async fn review(&self, grader: &Principal, answer_id: Uuid, marks: u32) -> EngineResult<AnswerRecord> {
        self.access.require_grader(grader)?;

        let answer = match self.db.get_answer(answer_id).await {
            Ok(answer) => answer,
            Err(PortError::NotFound(_)) => return Err(EngineError::NotFound(format!("answer {}", answer_id))),
            Err(e) => return Err(e.into()),
        };
        if answer.marks_awarded.is_some() {
            return Err(EngineError::AlreadyGraded);
        }

        let item = self.db.get_content(answer.item_id).await?;
        let question = item.question(answer.question_id).ok_or_else(|| {
            EngineError::Internal(PortError::Unexpected(format!(
                "answer {} references a missing question",
                answer_id
            )))
        })?;
        let mark = Mark::new(marks, question.marks).ok_or_else(|| {
            EngineError::InvalidRequest(format!("marks must be between 0 and {}", question.marks))
        })?;

        let now = self.clock.now();
        let review = AnswerReview {
            answer_id,
            grader_id: grader.user_id,
            marks_awarded: mark.value(),
            created_at: now,
        };
        let grading = self.ledger.grading_entry(&item, mark.value(), question.marks, now);

        match self.db.record_review(&review, &grading).await {
            Ok(()) => {
                info!(%answer_id, grader_id = %grader.user_id, marks = mark.value(), "Answer reviewed");
                Ok(AnswerRecord {
                    marks_awarded: Some(mark.value()),
                    graded_by: Some(GradeSource::Reviewer { grader_id: grader.user_id }),
                    ..answer
                })
            }
            Err(PortError::Conflict(_)) => Err(EngineError::AlreadyGraded),
            Err(e) => Err(e.into()),
        }
    }

    //=====================================================================================
    // Progress
    //=====================================================================================

    pub async fn dashboard(&self, user_id: Uuid, subject: Option<&str>) -> EngineResult<ProgressSummary> {
        self.progress.summarize(user_id, subject, None).await
    }

    pub async fn summarize(
        &self,
        user_id: Uuid,
        subject: Option<&str>,
        topic: Option<&str>,
    ) -> EngineResult<ProgressSummary> {
        self.progress.summarize(user_id, subject, topic).await
    }

    /// Daily graded performance for a subject over the last `days` days, today included.
    pub async fn history(&self, user_id: Uuid, subject: &str, days: u32) -> EngineResult<Vec<DailyPerformance>> {
        if days == 0 || days > MAX_HISTORY_DAYS {
            return Err(EngineError::InvalidRequest(format!(
                "days must be between 1 and {}",
                MAX_HISTORY_DAYS
            )));
        }
        let to = self.clock.today();
        let from = to
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .unwrap_or(NaiveDate::MIN);
        self.progress.history(user_id, subject, from, to).await
    }

    /// Topic breakdown and recently graded items for one subject.
    pub async fn analytics(&self, user_id: Uuid, subject: &str) -> EngineResult<SubjectAnalytics> {
        self.progress.analytics(user_id, subject).await
    }

    /// Forgets the cached fold for a user; the next summary replays the ledger.
    pub async fn rebuild_progress(&self, user_id: Uuid) -> EngineResult<ProgressSummary> {
        self.progress.invalidate(user_id).await;
        self.progress.summarize(user_id, None, None).await
    }
}

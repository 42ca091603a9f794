//! crates/revision_core/src/content.rs
//!
//! Ownership-checked persistence of generated content, and the validation that
//! turns untrusted generator output into a strict `ContentItem`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    AnswerOption, ContentFilter, ContentHeader, ContentItem, ContentType, GenerationRequest,
    Grading, Question, RawContent, RawQuestion, ScoreReport, SubmittedAnswer, Submission,
};
use crate::error::{EngineError, EngineResult};
use crate::ledger::ProgressLedger;
use crate::ports::{Clock, DatabaseService, PortError};
use crate::scoring::ScoringEngine;

const MAX_FIELD_LEN: usize = 200;

/// Upper bound on the marks a single generated question may carry.
pub const MAX_MARKS_PER_QUESTION: u32 = 100;

//=========================================================================================
// Request and Generator Output Validation
//=========================================================================================

/// Checks a generation request before any quota is consumed.
pub fn validate_request(request: &GenerationRequest, max_count: u32) -> EngineResult<()> {
    for (name, value) in [
        ("subject", &request.subject),
        ("topic", &request.topic),
        ("exam_board", &request.exam_board),
    ] {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidRequest(format!("{} must not be empty", name)));
        }
        if trimmed.len() > MAX_FIELD_LEN {
            return Err(EngineError::InvalidRequest(format!(
                "{} must be at most {} characters",
                name, MAX_FIELD_LEN
            )));
        }
    }
    if request.count == 0 || request.count > max_count {
        return Err(EngineError::InvalidRequest(format!(
            "count must be between 1 and {}",
            max_count
        )));
    }
    Ok(())
}

fn required(value: &Option<String>, field: &str, index: usize) -> EngineResult<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(EngineError::MalformedContent(format!(
            "question {} is missing {}",
            index + 1,
            field
        ))),
    }
}

fn validate_grading(content_type: ContentType, raw: &RawQuestion, index: usize) -> EngineResult<Grading> {
    match content_type {
        ContentType::Quiz => {
            let mut options = Vec::with_capacity(raw.options.len());
            let mut labels = HashSet::new();
            for option in &raw.options {
                let label = required(&option.label, "an option label", index)?;
                let text = required(&option.text, "an option text", index)?;
                if !labels.insert(label.clone()) {
                    return Err(EngineError::MalformedContent(format!(
                        "question {} repeats option {}",
                        index + 1,
                        label
                    )));
                }
                options.push(AnswerOption { label, text });
            }
            if options.len() < 2 {
                return Err(EngineError::MalformedContent(format!(
                    "question {} needs at least two options",
                    index + 1
                )));
            }
            let correct_option = required(&raw.correct_option, "a correct option", index)?;
            if !labels.contains(&correct_option) {
                return Err(EngineError::MalformedContent(format!(
                    "question {} marks {} correct but has no such option",
                    index + 1,
                    correct_option
                )));
            }
            Ok(Grading::Auto { options, correct_option })
        }
        ContentType::Flashcard | ContentType::MockExam => {
            let sample_answer = required(&raw.answer, "an answer", index)?;
            let explanation = raw
                .explanation
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string);
            let keywords = raw
                .keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            Ok(Grading::Manual {
                sample_answer,
                explanation,
                keywords,
            })
        }
    }
}

/// Validates raw generator output against the request and builds the item.
/// Nothing here touches the store; a failure means nothing is persisted.
pub fn build_item(
    request: &GenerationRequest,
    raw: RawContent,
    owner_user_id: Uuid,
    created_at: DateTime<Utc>,
) -> EngineResult<ContentItem> {
    if raw.questions.len() != request.count as usize {
        return Err(EngineError::MalformedContent(format!(
            "expected {} questions, got {}",
            request.count,
            raw.questions.len()
        )));
    }

    let item_id = Uuid::new_v4();
    let mut numbers = HashSet::new();
    let mut questions = Vec::with_capacity(raw.questions.len());
    let mut total_marks: u32 = 0;

    for (index, rq) in raw.questions.iter().enumerate() {
        let number = match rq.number {
            None => index as u32 + 1,
            Some(n) if n > 0 && n <= u32::MAX as i64 => n as u32,
            Some(n) => {
                return Err(EngineError::MalformedContent(format!(
                    "question {} has invalid number {}",
                    index + 1,
                    n
                )))
            }
        };
        if !numbers.insert(number) {
            return Err(EngineError::MalformedContent(format!(
                "question number {} appears twice",
                number
            )));
        }

        let marks = match (request.content_type, rq.marks) {
            (ContentType::Flashcard, _) | (_, None) => 1,
            (_, Some(m)) if m > 0 && m <= MAX_MARKS_PER_QUESTION as i64 => m as u32,
            (_, Some(m)) => {
                return Err(EngineError::MalformedContent(format!(
                    "question {} has marks {} outside 1..={}",
                    index + 1,
                    m,
                    MAX_MARKS_PER_QUESTION
                )))
            }
        };
        total_marks = total_marks.checked_add(marks).ok_or_else(|| {
            EngineError::MalformedContent("total marks are too large".to_string())
        })?;

        questions.push(Question {
            id: Uuid::new_v4(),
            item_id,
            number,
            prompt: required(&rq.prompt, "a prompt", index)?,
            marks,
            grading: validate_grading(request.content_type, rq, index)?,
        });
    }
    questions.sort_by_key(|q| q.number);

    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_title(request));

    Ok(ContentItem {
        id: item_id,
        owner_user_id,
        content_type: request.content_type,
        subject: request.subject.trim().to_string(),
        topic: request.topic.trim().to_string(),
        exam_board: request.exam_board.trim().to_string(),
        title,
        created_at,
        submitted_at: None,
        questions,
    })
}

fn default_title(request: &GenerationRequest) -> String {
    let kind = match request.content_type {
        ContentType::Flashcard => "Flashcards",
        ContentType::Quiz => "Quiz",
        ContentType::MockExam => "Mock Exam",
    };
    format!("{} - {} {}", request.subject.trim(), request.topic.trim(), kind)
}

//=========================================================================================
// ContentStore
//=========================================================================================

pub struct ContentStore {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
    ledger: Arc<ProgressLedger>,
}

impl ContentStore {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>, ledger: Arc<ProgressLedger>) -> Self {
        Self { db, clock, ledger }
    }

    /// Validates generator output and persists it with its generation ledger entry.
    pub async fn create(
        &self,
        owner_user_id: Uuid,
        request: &GenerationRequest,
        raw: RawContent,
    ) -> EngineResult<ContentItem> {
        let item = build_item(request, raw, owner_user_id, self.clock.now()).map_err(|e| {
            warn!(user_id = %owner_user_id, content_type = %request.content_type, "Rejected generator output: {}", e);
            e
        })?;
        let generation = self.ledger.generation_entry(&item);
        self.db.create_content(&item, &generation).await?;
        info!(item_id = %item.id, user_id = %owner_user_id, questions = item.questions.len(), "Content item created");
        Ok(item)
    }

    /// Loads an item for its owner. Anything else, including a missing item, is `Forbidden`.
    pub async fn get(&self, item_id: Uuid, requester_id: Uuid) -> EngineResult<ContentItem> {
        match self.db.get_content(item_id).await {
            Ok(item) if item.owner_user_id == requester_id => Ok(item),
            Ok(_) => {
                warn!(%item_id, %requester_id, "Access to another user's item refused");
                Err(EngineError::Forbidden)
            }
            Err(PortError::NotFound(_)) => Err(EngineError::Forbidden),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self, owner_user_id: Uuid, filter: &ContentFilter) -> EngineResult<Vec<ContentHeader>> {
        Ok(self.db.list_content(owner_user_id, filter).await?)
    }

    /// Grades and records a one-time submission for an owned item.
    pub async fn record_answers(
        &self,
        item_id: Uuid,
        requester_id: Uuid,
        answers: &[SubmittedAnswer],
        scoring: &ScoringEngine,
    ) -> EngineResult<ScoreReport> {
        let item = self.get(item_id, requester_id).await?;
        if !item.content_type.is_gradable() {
            return Err(EngineError::InvalidRequest(format!(
                "{} items are not submitted for grading",
                item.content_type
            )));
        }
        if item.is_submitted() {
            return Err(EngineError::AlreadySubmitted);
        }

        let now = self.clock.now();
        let records = scoring.grade_submission(&item, answers, now).await?;
        let score = ScoringEngine::score(&item, &records);
        let graded_possible: u32 = records
            .iter()
            .filter(|r| r.marks_awarded.is_some())
            .filter_map(|r| item.question(r.question_id))
            .map(|q| q.marks)
            .sum();

        let submission = Submission {
            item_id: item.id,
            user_id: requester_id,
            submitted_at: now,
            grading: self.ledger.grading_entry(&item, score.earned_marks, graded_possible, now),
            answers: records,
        };

        match self.db.record_submission(&submission).await {
            Ok(()) => {
                info!(%item_id, user_id = %requester_id, earned = score.earned_marks, total = score.total_marks, "Submission recorded");
                Ok(score)
            }
            Err(PortError::Conflict(_)) => Err(EngineError::AlreadySubmitted),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawOption;

    fn request(content_type: ContentType, count: u32) -> GenerationRequest {
        GenerationRequest {
            content_type,
            subject: "Biology".to_string(),
            topic: "Cells".to_string(),
            exam_board: "AQA".to_string(),
            count,
        }
    }

    fn quiz_question(number: Option<i64>, marks: Option<i64>) -> RawQuestion {
        RawQuestion {
            number,
            prompt: Some("Powerhouse of the cell?".to_string()),
            marks,
            options: vec![
                RawOption { label: Some("A".to_string()), text: Some("Nucleus".to_string()) },
                RawOption { label: Some("B".to_string()), text: Some("Mitochondria".to_string()) },
            ],
            correct_option: Some("B".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn quiz_output_is_accepted_and_ordered() {
        let raw = RawContent {
            title: None,
            questions: vec![quiz_question(Some(2), Some(2)), quiz_question(Some(1), None)],
        };
        let item = build_item(&request(ContentType::Quiz, 2), raw, Uuid::new_v4(), Utc::now()).unwrap();

        assert_eq!(item.questions[0].number, 1);
        assert_eq!(item.questions[0].marks, 1);
        assert_eq!(item.questions[1].marks, 2);
        assert_eq!(item.total_marks(), 3);
        assert_eq!(item.title, "Biology - Cells Quiz");
        assert!(item.questions.iter().all(|q| q.item_id == item.id));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let raw = RawContent {
            title: None,
            questions: vec![quiz_question(None, None)],
        };
        let err = build_item(&request(ContentType::Quiz, 3), raw, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedContent(_)));
    }

    #[test]
    fn duplicate_numbers_are_rejected() {
        let raw = RawContent {
            title: None,
            questions: vec![quiz_question(Some(1), None), quiz_question(Some(1), None)],
        };
        let err = build_item(&request(ContentType::Quiz, 2), raw, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedContent(msg) if msg.contains("twice")));
    }

    #[test]
    fn non_positive_marks_are_rejected() {
        let raw = RawContent {
            title: None,
            questions: vec![quiz_question(None, Some(0))],
        };
        let err = build_item(&request(ContentType::Quiz, 1), raw, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedContent(_)));
    }

    #[test]
    fn oversized_marks_are_rejected_before_scoring() {
        let question = |number| RawQuestion {
            number: Some(number),
            prompt: Some("Describe osmosis.".to_string()),
            marks: Some(2_000_000_000),
            answer: Some("Water crosses a membrane.".to_string()),
            ..Default::default()
        };
        let raw = RawContent {
            title: None,
            questions: vec![question(1), question(2), question(3)],
        };
        let err = build_item(&request(ContentType::MockExam, 3), raw, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedContent(msg) if msg.contains("outside")));

        let mut at_cap = quiz_question(None, Some(MAX_MARKS_PER_QUESTION as i64));
        at_cap.number = Some(1);
        let raw = RawContent {
            title: None,
            questions: vec![at_cap],
        };
        let item = build_item(&request(ContentType::Quiz, 1), raw, Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(item.total_marks(), MAX_MARKS_PER_QUESTION);
    }

    #[test]
    fn correct_option_must_name_an_option() {
        let mut question = quiz_question(None, None);
        question.correct_option = Some("b".to_string());
        let raw = RawContent {
            title: None,
            questions: vec![question],
        };
        let err = build_item(&request(ContentType::Quiz, 1), raw, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedContent(_)));
    }

    #[test]
    fn mock_exam_questions_need_a_sample_answer() {
        let raw = RawContent {
            title: Some("Paper 1".to_string()),
            questions: vec![RawQuestion {
                prompt: Some("Describe osmosis.".to_string()),
                marks: Some(4),
                ..Default::default()
            }],
        };
        let err = build_item(&request(ContentType::MockExam, 1), raw, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedContent(msg) if msg.contains("answer")));
    }

    #[test]
    fn flashcards_always_carry_one_mark() {
        let raw = RawContent {
            title: None,
            questions: vec![RawQuestion {
                prompt: Some("What is ATP?".to_string()),
                answer: Some("The cell's energy currency".to_string()),
                marks: Some(5),
                ..Default::default()
            }],
        };
        let item = build_item(&request(ContentType::Flashcard, 1), raw, Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(item.questions[0].marks, 1);
        assert_eq!(item.questions[0].grading.model(), ContentType::Flashcard.grading_model());
    }

    #[test]
    fn requests_are_checked_before_generation() {
        let mut req = request(ContentType::Flashcard, 5);
        assert!(validate_request(&req, 20).is_ok());

        req.count = 0;
        assert!(matches!(validate_request(&req, 20), Err(EngineError::InvalidRequest(_))));

        req.count = 21;
        assert!(validate_request(&req, 20).is_err());

        req.count = 5;
        req.topic = "   ".to_string();
        assert!(validate_request(&req, 20).is_err());
    }
}

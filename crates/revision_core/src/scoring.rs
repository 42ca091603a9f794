//! crates/revision_core/src/scoring.rs
//!
//! Grading under the two models. Auto questions compare the chosen option
//! exactly; manual questions are marked by the server's `MarkingService` or left
//! pending for a trusted grader. A caller never supplies a mark for its own answer.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{AnswerRecord, ContentItem, GradeSource, Grading, Question, ScoreReport, SubmittedAnswer};
use crate::error::{EngineError, EngineResult};
use crate::ports::MarkingService;

const MAX_RESPONSE_LEN: usize = 10_000;

/// A mark that is known to lie within `0..=question.marks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(u32);

impl Mark {
    pub fn new(awarded: u32, max: u32) -> Option<Self> {
        (awarded <= max).then_some(Self(awarded))
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// `round(100 * earned / total)` with halves rounded up, and 0 for an empty total.
pub fn percentage(earned: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (earned, total) = (earned as u64, total as u64);
    ((200 * earned + total) / (2 * total)) as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Outcome {
    is_correct: Option<bool>,
    mark: Option<Mark>,
    source: Option<GradeSource>,
}

pub struct ScoringEngine {
    marker: Option<Arc<dyn MarkingService>>,
}

impl ScoringEngine {
    /// `marker` is `None` when every free-text answer goes to review.
    pub fn new(marker: Option<Arc<dyn MarkingService>>) -> Self {
        Self { marker }
    }

    fn grade_choice(question: &Question, correct_option: &str, response: &str) -> Outcome {
        let is_correct = response == correct_option;
        let mark = if is_correct { Mark(question.marks) } else { Mark::zero() };
        Outcome {
            is_correct: Some(is_correct),
            mark: Some(mark),
            source: Some(GradeSource::Auto),
        }
    }

    async fn grade_free_text(&self, question: &Question, response: &str) -> Outcome {
        let pending = Outcome {
            is_correct: None,
            mark: None,
            source: None,
        };

        if response.trim().is_empty() {
            return Outcome {
                is_correct: None,
                mark: Some(Mark::zero()),
                source: Some(GradeSource::Auto),
            };
        }

        let Some(marker) = &self.marker else {
            return pending;
        };

        match marker.mark_answer(question, response).await {
            Ok(Some(awarded)) => match Mark::new(awarded, question.marks) {
                Some(mark) => Outcome {
                    is_correct: None,
                    mark: Some(mark),
                    source: Some(GradeSource::Marker),
                },
                None => {
                    warn!(question_id = %question.id, awarded, max = question.marks, "Marker proposed an out-of-range mark; leaving for review");
                    pending
                }
            },
            Ok(None) => pending,
            Err(e) => {
                warn!(question_id = %question.id, "Marking failed, leaving for review: {}", e);
                pending
            }
        }
    }

    /// Grades every question of `item`. Unanswered questions are graded as blank.
    pub async fn grade_submission(
        &self,
        item: &ContentItem,
        answers: &[SubmittedAnswer],
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<AnswerRecord>> {
        let mut responses: HashMap<Uuid, &str> = HashMap::with_capacity(answers.len());
        let mut seen = HashSet::new();
        for answer in answers {
            if item.question(answer.question_id).is_none() {
                return Err(EngineError::InvalidRequest(format!(
                    "question {} does not belong to this item",
                    answer.question_id
                )));
            }
            if !seen.insert(answer.question_id) {
                return Err(EngineError::InvalidRequest(format!(
                    "question {} is answered twice",
                    answer.question_id
                )));
            }
            if answer.response.len() > MAX_RESPONSE_LEN {
                return Err(EngineError::InvalidRequest(format!(
                    "answer to question {} is too long",
                    answer.question_id
                )));
            }
            responses.insert(answer.question_id, answer.response.as_str());
        }

        let mut records = Vec::with_capacity(item.questions.len());
        for question in &item.questions {
            let response = responses.get(&question.id).copied().unwrap_or("");
            let outcome = match &question.grading {
                Grading::Auto { correct_option, .. } => Self::grade_choice(question, correct_option, response),
                Grading::Manual { .. } => self.grade_free_text(question, response).await,
            };
            records.push(AnswerRecord {
                id: Uuid::new_v4(),
                user_id: item.owner_user_id,
                item_id: item.id,
                question_id: question.id,
                attempt: 1,
                response: response.to_string(),
                is_correct: outcome.is_correct,
                marks_awarded: outcome.mark.map(|m| m.value()),
                graded_by: outcome.source,
                created_at: now,
            });
        }
        Ok(records)
    }

    /// Aggregates an item's score from its answer records.
    pub fn score(item: &ContentItem, answers: &[AnswerRecord]) -> ScoreReport {
        let by_question: HashMap<Uuid, &AnswerRecord> =
            answers.iter().map(|a| (a.question_id, a)).collect();

        let total_marks = item.total_marks();
        let mut earned_marks = 0;
        let mut pending_review = 0;
        for question in &item.questions {
            match by_question.get(&question.id).and_then(|a| a.marks_awarded) {
                Some(awarded) => earned_marks += awarded.min(question.marks),
                None => pending_review += 1,
            }
        }

        ScoreReport {
            total_marks,
            earned_marks,
            percentage: percentage(earned_marks, total_marks),
            pending_review,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnswerOption, ContentType};
    use crate::marking::KeywordMarker;
    use crate::ports::{PortError, PortResult};
    use async_trait::async_trait;

    fn quiz(marks: &[u32]) -> ContentItem {
        let item_id = Uuid::new_v4();
        ContentItem {
            id: item_id,
            owner_user_id: Uuid::new_v4(),
            content_type: ContentType::Quiz,
            subject: "Chemistry".to_string(),
            topic: "Bonding".to_string(),
            exam_board: "OCR".to_string(),
            title: "Bonding quiz".to_string(),
            created_at: Utc::now(),
            submitted_at: None,
            questions: marks
                .iter()
                .enumerate()
                .map(|(i, &m)| Question {
                    id: Uuid::new_v4(),
                    item_id,
                    number: i as u32 + 1,
                    prompt: format!("Question {}", i + 1),
                    marks: m,
                    grading: Grading::Auto {
                        options: vec![
                            AnswerOption { label: "A".to_string(), text: "Ionic".to_string() },
                            AnswerOption { label: "B".to_string(), text: "Covalent".to_string() },
                        ],
                        correct_option: "A".to_string(),
                    },
                })
                .collect(),
        }
    }

    fn mock_exam(marks: u32, keywords: &[&str]) -> ContentItem {
        let mut item = quiz(&[marks]);
        item.content_type = ContentType::MockExam;
        item.questions[0].grading = Grading::Manual {
            sample_answer: "Water moves across a partially permeable membrane".to_string(),
            explanation: None,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        };
        item
    }

    fn answer(question: &Question, response: &str) -> SubmittedAnswer {
        SubmittedAnswer {
            question_id: question.id,
            response: response.to_string(),
        }
    }

    struct FixedMarker(PortResult<Option<u32>>);

    #[async_trait]
    impl MarkingService for FixedMarker {
        async fn mark_answer(&self, _question: &Question, _response: &str) -> PortResult<Option<u32>> {
            match &self.0 {
                Ok(v) => Ok(*v),
                Err(e) => Err(PortError::Unexpected(e.to_string())),
            }
        }
    }

    #[test]
    fn percentage_rounds_half_up_and_handles_zero_total() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(3, 8), 38);
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(5, 5), 100);
    }

    #[test]
    fn marks_are_bounded_by_question_marks() {
        assert_eq!(Mark::new(3, 3).map(|m| m.value()), Some(3));
        assert!(Mark::new(4, 3).is_none());
    }

    #[tokio::test]
    async fn quiz_scenario_scores_one_of_three() {
        let item = quiz(&[1, 2]);
        let scoring = ScoringEngine::new(None);
        let answers = vec![answer(&item.questions[0], "A"), answer(&item.questions[1], "B")];

        let records = scoring.grade_submission(&item, &answers, Utc::now()).await.unwrap();
        let score = ScoringEngine::score(&item, &records);

        assert_eq!(score.earned_marks, 1);
        assert_eq!(score.total_marks, 3);
        assert_eq!(score.percentage, 33);
        assert_eq!(records[0].is_correct, Some(true));
        assert_eq!(records[1].marks_awarded, Some(0));
    }

    #[tokio::test]
    async fn option_comparison_is_case_sensitive() {
        let item = quiz(&[1]);
        let records = ScoringEngine::new(None)
            .grade_submission(&item, &[answer(&item.questions[0], "a")], Utc::now())
            .await
            .unwrap();
        assert_eq!(records[0].is_correct, Some(false));
        assert_eq!(records[0].marks_awarded, Some(0));
    }

    #[tokio::test]
    async fn unknown_and_duplicate_questions_are_rejected() {
        let item = quiz(&[1]);
        let scoring = ScoringEngine::new(None);

        let stray = SubmittedAnswer { question_id: Uuid::new_v4(), response: "A".to_string() };
        assert!(matches!(
            scoring.grade_submission(&item, &[stray], Utc::now()).await,
            Err(EngineError::InvalidRequest(_))
        ));

        let twice = vec![answer(&item.questions[0], "A"), answer(&item.questions[0], "B")];
        assert!(scoring.grade_submission(&item, &twice, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn free_text_without_marker_is_pending_review() {
        let item = mock_exam(4, &[]);
        let records = ScoringEngine::new(None)
            .grade_submission(&item, &[answer(&item.questions[0], "Osmosis is diffusion of water")], Utc::now())
            .await
            .unwrap();
        assert_eq!(records[0].marks_awarded, None);

        let score = ScoringEngine::score(&item, &records);
        assert_eq!(score.earned_marks, 0);
        assert_eq!(score.pending_review, 1);
    }

    #[tokio::test]
    async fn out_of_range_marker_output_is_not_trusted() {
        let item = mock_exam(4, &[]);
        let scoring = ScoringEngine::new(Some(Arc::new(FixedMarker(Ok(Some(9))))));
        let records = scoring
            .grade_submission(&item, &[answer(&item.questions[0], "anything")], Utc::now())
            .await
            .unwrap();
        assert_eq!(records[0].marks_awarded, None);
    }

    #[tokio::test]
    async fn failing_marker_leaves_answer_pending() {
        let item = mock_exam(4, &[]);
        let scoring = ScoringEngine::new(Some(Arc::new(FixedMarker(Err(PortError::Unexpected("down".into()))))));
        let records = scoring
            .grade_submission(&item, &[answer(&item.questions[0], "anything")], Utc::now())
            .await
            .unwrap();
        assert_eq!(records[0].marks_awarded, None);
    }

    #[tokio::test]
    async fn keyword_marker_awards_server_side_marks() {
        let item = mock_exam(4, &["water", "partially permeable", "membrane", "concentration"]);
        let scoring = ScoringEngine::new(Some(Arc::new(KeywordMarker)));
        let records = scoring
            .grade_submission(
                &item,
                &[answer(&item.questions[0], "Water crosses a partially-permeable membrane.")],
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(records[0].marks_awarded, Some(3));
        assert_eq!(records[0].graded_by, Some(GradeSource::Marker));
    }

    #[tokio::test]
    async fn blank_free_text_scores_zero() {
        let item = mock_exam(4, &["water"]);
        let records = ScoringEngine::new(None).grade_submission(&item, &[], Utc::now()).await.unwrap();
        assert_eq!(records[0].marks_awarded, Some(0));
        assert_eq!(records[0].response, "");
    }
}

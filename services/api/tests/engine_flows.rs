//! End-to-end engine flows against the in-memory store.

mod common;

use chrono::{Duration, Utc};
use common::{request, GeneratorMode, Harness};
use revision_core::{
    domain::{AnswerStatus, ContentFilter, ContentType, GradeSource, SubmittedAnswer, SubscriptionEvent, SubscriptionEventKind},
    marking::KeywordMarker,
    DatabaseService, EngineError,
};
use std::sync::Arc;
use tokio::sync::Barrier;
use uuid::Uuid;

async fn subscribe(harness: &Harness, user_id: Uuid) {
    let event = SubscriptionEvent {
        event_id: format!("evt_{}", Uuid::new_v4()),
        user_id,
        kind: SubscriptionEventKind::Activated,
        received_at: Utc::now(),
    };
    assert!(harness.engine.apply_subscription_event(&event).await.unwrap());
}

fn answers(item: &revision_core::ContentItem, responses: &[&str]) -> Vec<SubmittedAnswer> {
    item.questions
        .iter()
        .zip(responses)
        .map(|(q, r)| SubmittedAnswer {
            question_id: q.id,
            response: r.to_string(),
        })
        .collect()
}

//=========================================================================================
// Quota
//=========================================================================================

#[tokio::test]
async fn free_user_gets_one_flashcard_set_per_day() {
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();

    let first = harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Biology", "Cells", 5))
        .await
        .unwrap();
    assert_eq!(first.question_count, 5);
    assert_eq!(first.remaining, Some(0));

    let second = harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Biology", "Cells", 5))
        .await;
    assert!(matches!(
        second,
        Err(EngineError::QuotaExceeded { content_type: ContentType::Flashcard, limit: 1 })
    ));

    // Same day, late evening: still blocked.
    harness.clock.advance(Duration::hours(14));
    assert!(harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Biology", "Cells", 5))
        .await
        .is_err());

    // After midnight UTC the counter resets exactly once.
    harness.clock.advance(Duration::hours(2));
    harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Biology", "Cells", 5))
        .await
        .unwrap();
    assert!(harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Biology", "Cells", 5))
        .await
        .is_err());
}

#[tokio::test]
async fn free_user_gets_three_mock_exams_per_day() {
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let generated = harness
            .engine
            .generate(&user, request(ContentType::MockExam, "Biology", "Transport", 2))
            .await
            .unwrap();
        remaining.push(generated.remaining);
    }
    assert_eq!(remaining, vec![Some(2), Some(1), Some(0)]);

    let fourth = harness
        .engine
        .generate(&user, request(ContentType::MockExam, "Biology", "Transport", 2))
        .await;
    assert!(matches!(fourth, Err(EngineError::QuotaExceeded { limit: 3, .. })));

    // Quota keys are independent per content type.
    harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Biology", "Transport", 3))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_exceed_the_daily_limit() {
    const REQUESTS: usize = 8;
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();
    let start = Arc::new(Barrier::new(REQUESTS));

    let tasks: Vec<_> = (0..REQUESTS)
        .map(|_| {
            let engine = harness.engine.clone();
            let start = start.clone();
            tokio::spawn(async move {
                start.wait().await;
                engine
                    .generate(&user, request(ContentType::MockExam, "Chemistry", "Bonding", 2))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::QuotaExceeded { limit: 3, .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(successes, 3);
    let items = harness.engine.list(user.user_id, &ContentFilter::default()).await.unwrap();
    assert_eq!(items.len(), 3);
    let status = harness.engine.quota_status(&user).await.unwrap();
    let mock = status.iter().find(|s| s.content_type == ContentType::MockExam).unwrap();
    assert_eq!(mock.used, 3);
}

#[tokio::test]
async fn quizzes_are_premium_only_and_subscribers_are_unlimited() {
    let harness = Harness::new();
    let user_id = Uuid::new_v4();
    let free = harness.engine.principal(user_id, false).await.unwrap();

    let refused = harness
        .engine
        .generate(&free, request(ContentType::Quiz, "Physics", "Forces", 3))
        .await;
    assert!(matches!(
        refused,
        Err(EngineError::QuotaExceeded { content_type: ContentType::Quiz, limit: 0 })
    ));
    assert_eq!(harness.generator.calls(), 0);

    subscribe(&harness, user_id).await;
    let premium = harness.engine.principal(user_id, false).await.unwrap();
    assert!(premium.is_subscribed);

    for _ in 0..5 {
        let generated = harness
            .engine
            .generate(&premium, request(ContentType::Quiz, "Physics", "Forces", 3))
            .await
            .unwrap();
        assert_eq!(generated.remaining, None);
    }
    // Subscribers never touch the counters.
    assert!(harness.db.get_quota_state(user_id, ContentType::Quiz).await.unwrap().is_none());
}

//=========================================================================================
// Generator Failures
//=========================================================================================

#[tokio::test]
async fn generator_failure_does_not_burn_quota() {
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();

    harness.generator.set_mode(GeneratorMode::Failing);
    let failed = harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "History", "Tudors", 5))
        .await;
    assert!(matches!(failed, Err(EngineError::Generator(_))));
    // One retry before giving up.
    assert_eq!(harness.generator.calls(), 2);

    let status = harness.engine.quota_status(&user).await.unwrap();
    let flashcards = status
        .iter()
        .find(|s| s.content_type == ContentType::Flashcard)
        .unwrap();
    assert_eq!(flashcards.used, 0);
    assert_eq!(flashcards.remaining, Some(1));

    harness.generator.set_mode(GeneratorMode::Valid);
    harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "History", "Tudors", 5))
        .await
        .unwrap();
}

#[tokio::test]
async fn malformed_output_is_never_persisted() {
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();

    harness.generator.set_mode(GeneratorMode::WrongArity);
    let rejected = harness
        .engine
        .generate(&user, request(ContentType::MockExam, "Biology", "Cells", 3))
        .await;
    assert!(matches!(rejected, Err(EngineError::MalformedContent(_))));

    let items = harness.engine.list(user.user_id, &ContentFilter::default()).await.unwrap();
    assert!(items.is_empty());
    let summary = harness.engine.dashboard(user.user_id, None).await.unwrap();
    assert!(summary.totals.is_empty());

    let status = harness.engine.quota_status(&user).await.unwrap();
    assert!(status.iter().all(|s| s.used == 0));
}

#[tokio::test]
async fn out_of_range_counts_are_rejected_before_the_generator() {
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();

    for count in [0, 21] {
        let result = harness
            .engine
            .generate(&user, request(ContentType::Flashcard, "Biology", "Cells", count))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    }
    assert_eq!(harness.generator.calls(), 0);
}

//=========================================================================================
// Ownership, Submission and Scoring
//=========================================================================================

#[tokio::test]
async fn foreign_and_absent_items_are_equally_forbidden() {
    let harness = Harness::new();
    let owner = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();
    let other = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();

    let generated = harness
        .engine
        .generate(&owner, request(ContentType::Flashcard, "Biology", "Cells", 2))
        .await
        .unwrap();

    let foreign = harness.engine.fetch(generated.item_id, other.user_id).await;
    let absent = harness.engine.fetch(Uuid::new_v4(), other.user_id).await;
    assert!(matches!(foreign, Err(EngineError::Forbidden)));
    assert!(matches!(absent, Err(EngineError::Forbidden)));

    let foreign_submit = harness.engine.submit(generated.item_id, other.user_id, &[]).await;
    assert!(matches!(foreign_submit, Err(EngineError::Forbidden)));

    assert!(harness.engine.fetch(generated.item_id, owner.user_id).await.is_ok());
}

#[tokio::test]
async fn quiz_with_one_correct_answer_of_three_scores_33_percent() {
    let harness = Harness::new();
    let user_id = Uuid::new_v4();
    harness.engine.principal(user_id, false).await.unwrap();
    subscribe(&harness, user_id).await;
    let user = harness.engine.principal(user_id, false).await.unwrap();

    let generated = harness
        .engine
        .generate(&user, request(ContentType::Quiz, "Biology", "Cells", 3))
        .await
        .unwrap();
    let item = harness.engine.fetch(generated.item_id, user_id).await.unwrap();

    let score = harness
        .engine
        .submit(item.id, user_id, &answers(&item, &["A", "B", "a"]))
        .await
        .unwrap();
    assert_eq!(score.total_marks, 3);
    assert_eq!(score.earned_marks, 1);
    assert_eq!(score.percentage, 33);
    assert_eq!(score.pending_review, 0);

    let again = harness.engine.submit(item.id, user_id, &answers(&item, &["A", "A", "A"])).await;
    assert!(matches!(again, Err(EngineError::AlreadySubmitted)));

    let results = harness.engine.results(item.id, user_id).await.unwrap();
    assert_eq!(results.score, score);
    let correct: Vec<Option<bool>> = results
        .questions
        .iter()
        .map(|r| r.answer.as_ref().and_then(|a| a.is_correct))
        .collect();
    assert_eq!(correct, vec![Some(true), Some(false), Some(false)]);

    let summary = harness.engine.summarize(user_id, Some("Biology"), Some("Cells")).await.unwrap();
    let quiz = &summary.totals[&ContentType::Quiz];
    assert_eq!(quiz.generated, 1);
    assert_eq!(quiz.graded(), 1);
    assert_eq!((quiz.marks_earned, quiz.marks_possible), (1, 3));
}

#[tokio::test]
async fn results_are_not_found_before_submission() {
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();
    let generated = harness
        .engine
        .generate(&user, request(ContentType::MockExam, "Biology", "Cells", 1))
        .await
        .unwrap();

    let results = harness.engine.results(generated.item_id, user.user_id).await;
    assert!(matches!(results, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn flashcard_sets_cannot_be_submitted() {
    let harness = Harness::new();
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();
    let generated = harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Biology", "Cells", 2))
        .await
        .unwrap();

    let result = harness.engine.submit(generated.item_id, user.user_id, &[]).await;
    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
}

#[tokio::test]
async fn keyword_marker_grades_mock_exams_on_submission() {
    let harness = Harness::with_marker(Some(Arc::new(KeywordMarker)));
    let user = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();
    let generated = harness
        .engine
        .generate(&user, request(ContentType::MockExam, "Biology", "Transport", 2))
        .await
        .unwrap();
    let item = harness.engine.fetch(generated.item_id, user.user_id).await.unwrap();

    let score = harness
        .engine
        .submit(
            item.id,
            user.user_id,
            &answers(&item, &["It happens by Osmosis through a membrane.", "By osmosis."]),
        )
        .await
        .unwrap();

    assert_eq!(score.total_marks, 4);
    assert_eq!(score.earned_marks, 3);
    assert_eq!(score.percentage, 75);
    assert_eq!(score.pending_review, 0);
}

//=========================================================================================
// Review
//=========================================================================================

#[tokio::test]
async fn pending_answers_are_marked_once_by_a_grader() {
    let harness = Harness::new();
    let student = harness.engine.principal(Uuid::new_v4(), false).await.unwrap();
    let grader = harness.engine.principal(Uuid::new_v4(), true).await.unwrap();

    let generated = harness
        .engine
        .generate(&student, request(ContentType::MockExam, "Biology", "Transport", 2))
        .await
        .unwrap();
    let item = harness.engine.fetch(generated.item_id, student.user_id).await.unwrap();

    let score = harness
        .engine
        .submit(item.id, student.user_id, &answers(&item, &["Osmosis.", ""]))
        .await
        .unwrap();
    // The blank answer is graded at zero; the other waits for review.
    assert_eq!(score.pending_review, 1);
    assert_eq!(score.earned_marks, 0);

    let results = harness.engine.results(item.id, student.user_id).await.unwrap();
    let pending = results
        .questions
        .iter()
        .filter_map(|r| r.answer.as_ref())
        .find(|a| a.status() == AnswerStatus::PendingReview)
        .unwrap()
        .clone();

    let refused = harness.engine.review(&student, pending.id, 1).await;
    assert!(matches!(refused, Err(EngineError::Forbidden)));

    let too_many = harness.engine.review(&grader, pending.id, 3).await;
    assert!(matches!(too_many, Err(EngineError::InvalidRequest(_))));

    let missing = harness.engine.review(&grader, Uuid::new_v4(), 1).await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));

    let reviewed = harness.engine.review(&grader, pending.id, 1).await.unwrap();
    assert_eq!(reviewed.marks_awarded, Some(1));
    assert_eq!(reviewed.graded_by, Some(GradeSource::Reviewer { grader_id: grader.user_id }));

    let twice = harness.engine.review(&grader, pending.id, 2).await;
    assert!(matches!(twice, Err(EngineError::AlreadyGraded)));

    let results = harness.engine.results(item.id, student.user_id).await.unwrap();
    assert_eq!(results.score.earned_marks, 1);
    assert_eq!(results.score.pending_review, 0);
    assert_eq!(results.score.percentage, 25);

    let summary = harness.engine.dashboard(student.user_id, None).await.unwrap();
    let exams = &summary.totals[&ContentType::MockExam];
    assert_eq!((exams.marks_earned, exams.marks_possible), (1, 4));
    assert_eq!(exams.graded(), 1);
}

//=========================================================================================
// Progress
//=========================================================================================

#[tokio::test]
async fn dashboard_averages_are_weighted_by_marks() {
    let harness = Harness::new();
    let user_id = Uuid::new_v4();
    harness.engine.principal(user_id, false).await.unwrap();
    subscribe(&harness, user_id).await;
    let user = harness.engine.principal(user_id, false).await.unwrap();

    // 1/1 on a one-question quiz, then 0/4: weighted 20%, not the 50% mean of percentages.
    let small = harness
        .engine
        .generate(&user, request(ContentType::Quiz, "Chemistry", "Acids", 1))
        .await
        .unwrap();
    let small = harness.engine.fetch(small.item_id, user_id).await.unwrap();
    harness.engine.submit(small.id, user_id, &answers(&small, &["A"])).await.unwrap();

    let large = harness
        .engine
        .generate(&user, request(ContentType::Quiz, "Chemistry", "Acids", 4))
        .await
        .unwrap();
    let large = harness.engine.fetch(large.item_id, user_id).await.unwrap();
    harness
        .engine
        .submit(large.id, user_id, &answers(&large, &["B", "B", "B", "B"]))
        .await
        .unwrap();

    harness
        .engine
        .generate(&user, request(ContentType::Flashcard, "Physics", "Waves", 3))
        .await
        .unwrap();

    let dashboard = harness.engine.dashboard(user_id, None).await.unwrap();
    let quiz = &dashboard.totals[&ContentType::Quiz];
    assert_eq!(quiz.generated, 2);
    assert_eq!(quiz.graded(), 2);
    assert!((quiz.average_percentage().unwrap() - 20.0).abs() < 1e-9);
    assert_eq!(dashboard.topics.len(), 2);
    assert_eq!(dashboard.weak_topics.len(), 1);
    assert_eq!(dashboard.weak_topics[0].topic, "Acids");

    let chemistry = harness.engine.dashboard(user_id, Some("Chemistry")).await.unwrap();
    assert_eq!(chemistry.topics.len(), 1);
    assert!(!chemistry.totals.contains_key(&ContentType::Flashcard));

    // Rebuilding from the full ledger gives the same summary as the incremental cache.
    let rebuilt = harness.engine.rebuild_progress(user_id).await.unwrap();
    assert_eq!(rebuilt, dashboard);
}

#[tokio::test]
async fn history_and_analytics_follow_the_grading_days() {
    let harness = Harness::new();
    let user_id = Uuid::new_v4();
    subscribe(&harness, user_id).await;
    let user = harness.engine.principal(user_id, false).await.unwrap();

    let first = harness
        .engine
        .generate(&user, request(ContentType::Quiz, "Chemistry", "Acids", 2))
        .await
        .unwrap();
    let first = harness.engine.fetch(first.item_id, user_id).await.unwrap();
    harness.engine.submit(first.id, user_id, &answers(&first, &["A", "B"])).await.unwrap();

    harness.clock.advance(Duration::days(1));
    let second = harness
        .engine
        .generate(&user, request(ContentType::Quiz, "Chemistry", "Alkalis", 2))
        .await
        .unwrap();
    let second = harness.engine.fetch(second.item_id, user_id).await.unwrap();
    harness.engine.submit(second.id, user_id, &answers(&second, &["A", "A"])).await.unwrap();

    let history = harness.engine.history(user_id, "Chemistry", 7).await.unwrap();
    let averages: Vec<_> = history
        .iter()
        .map(|day| (day.date.to_string(), day.by_type[&ContentType::Quiz].average_percentage()))
        .collect();
    assert_eq!(
        averages,
        vec![("2024-09-02".to_string(), Some(50.0)), ("2024-09-03".to_string(), Some(100.0))]
    );
    assert_eq!(harness.engine.history(user_id, "Chemistry", 1).await.unwrap().len(), 1);
    assert!(harness.engine.history(user_id, "Physics", 7).await.unwrap().is_empty());
    assert!(matches!(
        harness.engine.history(user_id, "Chemistry", 0).await,
        Err(EngineError::InvalidRequest(_))
    ));

    let analytics = harness.engine.analytics(user_id, "Chemistry").await.unwrap();
    assert_eq!(analytics.summary.topics.len(), 2);
    let recent: Vec<_> = analytics.recent.iter().map(|item| item.item_id).collect();
    assert_eq!(recent, vec![second.id, first.id]);
    assert_eq!(analytics.recent[1].percentage(), Some(50.0));

    harness.clock.advance(Duration::days(10));
    assert!(harness.engine.history(user_id, "Chemistry", 7).await.unwrap().is_empty());
}

//=========================================================================================
// Subscriptions
//=========================================================================================

#[tokio::test]
async fn redelivered_subscription_events_are_ignored() {
    let harness = Harness::new();
    let user_id = Uuid::new_v4();

    let activated = SubscriptionEvent {
        event_id: "evt_activate".to_string(),
        user_id,
        kind: SubscriptionEventKind::Activated,
        received_at: Utc::now(),
    };
    let cancelled = SubscriptionEvent {
        event_id: "evt_cancel".to_string(),
        user_id,
        kind: SubscriptionEventKind::Cancelled,
        received_at: Utc::now(),
    };

    assert!(harness.engine.apply_subscription_event(&activated).await.unwrap());
    assert!(harness.engine.principal(user_id, false).await.unwrap().is_subscribed);

    assert!(harness.engine.apply_subscription_event(&cancelled).await.unwrap());
    // A late re-delivery of the activation must not resubscribe the user.
    assert!(!harness.engine.apply_subscription_event(&activated).await.unwrap());
    assert!(!harness.engine.principal(user_id, false).await.unwrap().is_subscribed);
}

//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use revision_core::domain::{
    AnswerOption, AnswerRecord, AnswerReview, ContentFilter, ContentHeader, ContentItem,
    ContentType, GradeSource, Grading, LedgerEntry, NewLedgerEntry, QuotaState, Question,
    Submission, SubscriptionEvent, User,
};
use revision_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_content_type(raw: &str) -> PortResult<ContentType> {
    raw.parse::<ContentType>()
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

fn non_negative(value: i32) -> u32 {
    value.max(0) as u32
}

/// Narrows a count or mark to an `INTEGER` column, refusing values it cannot hold.
fn to_column(value: u32) -> PortResult<i32> {
    i32::try_from(value).map_err(|_| PortError::Unexpected(format!("Value {} does not fit an integer column", value)))
}

/// Appends a ledger entry, taking the next per-user sequence number.
/// Must run inside the transaction that makes the change it records.
async fn append_ledger(conn: &mut PgConnection, entry: &NewLedgerEntry) -> PortResult<i64> {
    let seq: i64 = sqlx::query_scalar(
        "UPDATE users SET ledger_seq = ledger_seq + 1 WHERE user_id = $1 RETURNING ledger_seq",
    )
    .bind(entry.user_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", entry.user_id)),
        _ => unexpected(e),
    })?;

    sqlx::query(
        "INSERT INTO ledger_entries (user_id, seq, item_id, subject, topic, content_type, event, marks_earned, marks_possible, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(entry.user_id)
    .bind(seq)
    .bind(entry.item_id)
    .bind(&entry.subject)
    .bind(&entry.topic)
    .bind(entry.content_type.as_str())
    .bind(entry.event.as_str())
    .bind(to_column(entry.marks_earned)?)
    .bind(to_column(entry.marks_possible)?)
    .bind(entry.recorded_at)
    .execute(&mut *conn)
    .await
    .map_err(unexpected)?;

    Ok(seq)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    is_subscribed: bool,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            is_subscribed: self.is_subscribed,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct QuotaRecord {
    user_id: Uuid,
    content_type: String,
    count: i32,
    reset_date: NaiveDate,
}
impl QuotaRecord {
    fn to_domain(self) -> PortResult<QuotaState> {
        Ok(QuotaState {
            user_id: self.user_id,
            content_type: parse_content_type(&self.content_type)?,
            count: non_negative(self.count),
            reset_date: self.reset_date,
        })
    }
}

#[derive(FromRow)]
struct ContentItemRecord {
    id: Uuid,
    owner_user_id: Uuid,
    content_type: String,
    subject: String,
    topic: String,
    exam_board: String,
    title: String,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
}
impl ContentItemRecord {
    fn to_domain(self, questions: Vec<Question>) -> PortResult<ContentItem> {
        Ok(ContentItem {
            id: self.id,
            owner_user_id: self.owner_user_id,
            content_type: parse_content_type(&self.content_type)?,
            subject: self.subject,
            topic: self.topic,
            exam_board: self.exam_board,
            title: self.title,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
            questions,
        })
    }
}

#[derive(FromRow)]
struct ContentHeaderRecord {
    id: Uuid,
    content_type: String,
    subject: String,
    topic: String,
    exam_board: String,
    title: String,
    question_count: i64,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
}
impl ContentHeaderRecord {
    fn to_domain(self) -> PortResult<ContentHeader> {
        Ok(ContentHeader {
            id: self.id,
            content_type: parse_content_type(&self.content_type)?,
            subject: self.subject,
            topic: self.topic,
            exam_board: self.exam_board,
            title: self.title,
            question_count: self.question_count.max(0) as u32,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
        })
    }
}

#[derive(FromRow)]
struct QuestionRecord {
    id: Uuid,
    item_id: Uuid,
    number: i32,
    prompt: String,
    marks: i32,
    grading_model: String,
    option_labels: Vec<String>,
    option_texts: Vec<String>,
    correct_option: Option<String>,
    sample_answer: Option<String>,
    explanation: Option<String>,
    keywords: Vec<String>,
}
impl QuestionRecord {
    fn to_domain(self) -> PortResult<Question> {
        let grading = match (self.grading_model.as_str(), self.correct_option, self.sample_answer) {
            ("auto", Some(correct_option), _) => Grading::Auto {
                options: self
                    .option_labels
                    .into_iter()
                    .zip(self.option_texts)
                    .map(|(label, text)| AnswerOption { label, text })
                    .collect(),
                correct_option,
            },
            ("manual", _, Some(sample_answer)) => Grading::Manual {
                sample_answer,
                explanation: self.explanation,
                keywords: self.keywords,
            },
            (model, _, _) => {
                return Err(PortError::Unexpected(format!(
                    "Question {} has inconsistent '{}' grading data",
                    self.id, model
                )))
            }
        };
        Ok(Question {
            id: self.id,
            item_id: self.item_id,
            number: non_negative(self.number),
            prompt: self.prompt,
            marks: non_negative(self.marks),
            grading,
        })
    }
}

#[derive(FromRow)]
struct AnswerRecordRow {
    id: Uuid,
    user_id: Uuid,
    item_id: Uuid,
    question_id: Uuid,
    attempt: i32,
    response: String,
    is_correct: Option<bool>,
    marks_awarded: Option<i32>,
    graded_by: Option<String>,
    grader_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}
impl AnswerRecordRow {
    fn to_domain(self) -> AnswerRecord {
        let graded_by = match (self.grader_id, self.graded_by.as_deref()) {
            (Some(grader_id), _) => Some(GradeSource::Reviewer { grader_id }),
            (None, Some("auto")) => Some(GradeSource::Auto),
            (None, Some("marker")) => Some(GradeSource::Marker),
            _ => None,
        };
        AnswerRecord {
            id: self.id,
            user_id: self.user_id,
            item_id: self.item_id,
            question_id: self.question_id,
            attempt: non_negative(self.attempt),
            response: self.response,
            is_correct: self.is_correct,
            marks_awarded: self.marks_awarded.map(non_negative),
            graded_by,
            created_at: self.created_at,
        }
    }
}

const ANSWER_SELECT: &str = "SELECT a.id, a.user_id, a.item_id, a.question_id, a.attempt, a.response, a.is_correct, \
     COALESCE(a.marks_awarded, r.marks_awarded) AS marks_awarded, a.graded_by, r.grader_id, a.created_at \
     FROM answer_records a LEFT JOIN answer_reviews r ON r.answer_id = a.id";

#[derive(FromRow)]
struct LedgerRecord {
    seq: i64,
    user_id: Uuid,
    item_id: Uuid,
    subject: String,
    topic: String,
    content_type: String,
    event: String,
    marks_earned: i32,
    marks_possible: i32,
    recorded_at: DateTime<Utc>,
}
impl LedgerRecord {
    fn to_domain(self) -> PortResult<LedgerEntry> {
        Ok(LedgerEntry {
            seq: self.seq,
            user_id: self.user_id,
            item_id: self.item_id,
            subject: self.subject,
            topic: self.topic,
            content_type: parse_content_type(&self.content_type)?,
            event: self.event.parse().map_err(PortError::Unexpected)?,
            marks_earned: non_negative(self.marks_earned),
            marks_possible: non_negative(self.marks_possible),
            recorded_at: self.recorded_at,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_or_create_user(&self, user_id: Uuid) -> PortResult<User> {
        sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, is_subscribed, created_at FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
            _ => unexpected(e),
        })?;

        Ok(record.to_domain())
    }

    async fn apply_subscription_event(&self, event: &SubscriptionEvent) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let inserted = sqlx::query(
            "INSERT INTO subscription_events (event_id, user_id, kind, received_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(&event.event_id)
        .bind(event.user_id)
        .bind(event.kind.as_str())
        .bind(event.received_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?
        .rows_affected();

        if inserted == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE users SET is_subscribed = $1, updated_at = NOW() WHERE user_id = $2")
            .bind(event.kind.is_subscribed_after())
            .bind(event.user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(true)
    }

    async fn try_consume_quota(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        today: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>> {
        // One statement: reset on a new day, increment below the limit, or return nothing.
        let count: Option<i32> = sqlx::query_scalar(
            "INSERT INTO quota_usage (user_id, content_type, count, reset_date) VALUES ($1, $2, 1, $3) \
             ON CONFLICT (user_id, content_type) DO UPDATE SET \
                 count = CASE WHEN quota_usage.reset_date < EXCLUDED.reset_date THEN 1 ELSE quota_usage.count + 1 END, \
                 reset_date = GREATEST(quota_usage.reset_date, EXCLUDED.reset_date) \
             WHERE quota_usage.reset_date < EXCLUDED.reset_date OR quota_usage.count < $4 \
             RETURNING count",
        )
        .bind(user_id)
        .bind(content_type.as_str())
        .bind(today)
        .bind(to_column(limit)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(count.map(non_negative))
    }

    async fn release_quota(&self, user_id: Uuid, content_type: ContentType, day: NaiveDate) -> PortResult<()> {
        sqlx::query(
            "UPDATE quota_usage SET count = count - 1 \
             WHERE user_id = $1 AND content_type = $2 AND reset_date = $3 AND count > 0",
        )
        .bind(user_id)
        .bind(content_type.as_str())
        .bind(day)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_quota_state(&self, user_id: Uuid, content_type: ContentType) -> PortResult<Option<QuotaState>> {
        let record = sqlx::query_as::<_, QuotaRecord>(
            "SELECT user_id, content_type, count, reset_date FROM quota_usage WHERE user_id = $1 AND content_type = $2",
        )
        .bind(user_id)
        .bind(content_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(QuotaRecord::to_domain).transpose()
    }

    async fn create_content(&self, item: &ContentItem, generation: &NewLedgerEntry) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO content_items (id, owner_user_id, content_type, subject, topic, exam_board, title, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(item.id)
        .bind(item.owner_user_id)
        .bind(item.content_type.as_str())
        .bind(&item.subject)
        .bind(&item.topic)
        .bind(&item.exam_board)
        .bind(&item.title)
        .bind(item.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        for question in &item.questions {
            let (model, labels, texts, correct_option, sample_answer, explanation, keywords) =
                match &question.grading {
                    Grading::Auto { options, correct_option } => (
                        "auto",
                        options.iter().map(|o| o.label.clone()).collect::<Vec<_>>(),
                        options.iter().map(|o| o.text.clone()).collect::<Vec<_>>(),
                        Some(correct_option.clone()),
                        None,
                        None,
                        Vec::new(),
                    ),
                    Grading::Manual { sample_answer, explanation, keywords } => (
                        "manual",
                        Vec::new(),
                        Vec::new(),
                        None,
                        Some(sample_answer.clone()),
                        explanation.clone(),
                        keywords.clone(),
                    ),
                };

            sqlx::query(
                "INSERT INTO questions (id, item_id, number, prompt, marks, grading_model, option_labels, option_texts, \
                 correct_option, sample_answer, explanation, keywords) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(question.id)
            .bind(item.id)
            .bind(to_column(question.number)?)
            .bind(&question.prompt)
            .bind(to_column(question.marks)?)
            .bind(model)
            .bind(labels)
            .bind(texts)
            .bind(correct_option)
            .bind(sample_answer)
            .bind(explanation)
            .bind(keywords)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        append_ledger(&mut *tx, generation).await?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get_content(&self, item_id: Uuid) -> PortResult<ContentItem> {
        let record = sqlx::query_as::<_, ContentItemRecord>(
            "SELECT id, owner_user_id, content_type, subject, topic, exam_board, title, created_at, submitted_at \
             FROM content_items WHERE id = $1",
        )
        .bind(item_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Content item {} not found", item_id)),
            _ => unexpected(e),
        })?;

        let questions = sqlx::query_as::<_, QuestionRecord>(
            "SELECT id, item_id, number, prompt, marks, grading_model, option_labels, option_texts, \
             correct_option, sample_answer, explanation, keywords \
             FROM questions WHERE item_id = $1 ORDER BY number ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(QuestionRecord::to_domain)
        .collect::<PortResult<Vec<_>>>()?;

        record.to_domain(questions)
    }

    async fn list_content(&self, owner_user_id: Uuid, filter: &ContentFilter) -> PortResult<Vec<ContentHeader>> {
        let records = sqlx::query_as::<_, ContentHeaderRecord>(
            "SELECT c.id, c.content_type, c.subject, c.topic, c.exam_board, c.title, \
             (SELECT COUNT(*) FROM questions q WHERE q.item_id = c.id) AS question_count, \
             c.created_at, c.submitted_at \
             FROM content_items c \
             WHERE c.owner_user_id = $1 \
               AND ($2::TEXT IS NULL OR c.content_type = $2) \
               AND ($3::TEXT IS NULL OR c.subject = $3) \
               AND ($4::TEXT IS NULL OR c.topic = $4) \
             ORDER BY c.created_at DESC",
        )
        .bind(owner_user_id)
        .bind(filter.content_type.map(|t| t.as_str()))
        .bind(filter.subject.as_deref())
        .bind(filter.topic.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(ContentHeaderRecord::to_domain).collect()
    }

    async fn record_submission(&self, submission: &Submission) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let marked = sqlx::query(
            "UPDATE content_items SET submitted_at = $1 WHERE id = $2 AND owner_user_id = $3 AND submitted_at IS NULL",
        )
        .bind(submission.submitted_at)
        .bind(submission.item_id)
        .bind(submission.user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?
        .rows_affected();

        if marked == 0 {
            return Err(PortError::Conflict(format!(
                "Content item {} is already submitted",
                submission.item_id
            )));
        }

        for answer in &submission.answers {
            let graded_by = match answer.graded_by {
                Some(GradeSource::Auto) => Some("auto"),
                Some(GradeSource::Marker) => Some("marker"),
                Some(GradeSource::Reviewer { .. }) | None => None,
            };
            sqlx::query(
                "INSERT INTO answer_records (id, user_id, item_id, question_id, attempt, response, is_correct, \
                 marks_awarded, graded_by, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(answer.id)
            .bind(answer.user_id)
            .bind(answer.item_id)
            .bind(answer.question_id)
            .bind(to_column(answer.attempt)?)
            .bind(&answer.response)
            .bind(answer.is_correct)
            .bind(answer.marks_awarded.map(to_column).transpose()?)
            .bind(graded_by)
            .bind(answer.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    PortError::Conflict(format!("Answer for question {} already recorded", answer.question_id))
                }
                _ => unexpected(e),
            })?;
        }

        append_ledger(&mut *tx, &submission.grading).await?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get_answers_for_item(&self, item_id: Uuid) -> PortResult<Vec<AnswerRecord>> {
        let records = sqlx::query_as::<_, AnswerRecordRow>(&format!(
            "{} WHERE a.item_id = $1 ORDER BY a.created_at ASC",
            ANSWER_SELECT
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(AnswerRecordRow::to_domain).collect())
    }

    async fn get_answer(&self, answer_id: Uuid) -> PortResult<AnswerRecord> {
        let record = sqlx::query_as::<_, AnswerRecordRow>(&format!("{} WHERE a.id = $1", ANSWER_SELECT))
            .bind(answer_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Answer {} not found", answer_id)),
                _ => unexpected(e),
            })?;
        Ok(record.to_domain())
    }

    async fn record_review(&self, review: &AnswerReview, grading: &NewLedgerEntry) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let existing: Option<Option<i32>> = sqlx::query_scalar(
            "SELECT marks_awarded FROM answer_records WHERE id = $1 FOR UPDATE",
        )
        .bind(review.answer_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        match existing {
            None => return Err(PortError::NotFound(format!("Answer {} not found", review.answer_id))),
            Some(Some(_)) => {
                return Err(PortError::Conflict(format!("Answer {} already has a mark", review.answer_id)))
            }
            Some(None) => {}
        }

        let inserted = sqlx::query(
            "INSERT INTO answer_reviews (answer_id, grader_id, marks_awarded, created_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (answer_id) DO NOTHING",
        )
        .bind(review.answer_id)
        .bind(review.grader_id)
        .bind(to_column(review.marks_awarded)?)
        .bind(review.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?
        .rows_affected();

        if inserted == 0 {
            return Err(PortError::Conflict(format!("Answer {} was already reviewed", review.answer_id)));
        }

        append_ledger(&mut *tx, grading).await?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get_ledger_entries(&self, user_id: Uuid, after_seq: i64) -> PortResult<Vec<LedgerEntry>> {
        let records = sqlx::query_as::<_, LedgerRecord>(
            "SELECT seq, user_id, item_id, subject, topic, content_type, event, marks_earned, marks_possible, recorded_at \
             FROM ledger_entries WHERE user_id = $1 AND seq > $2 ORDER BY seq ASC",
        )
        .bind(user_id)
        .bind(after_seq)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(LedgerRecord::to_domain).collect()
    }
}

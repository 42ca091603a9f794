pub mod access;
pub mod clock;
pub mod content;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod marking;
pub mod ports;
pub mod progress;
pub mod quota;
pub mod scoring;

pub use domain::{
    AnswerOption, AnswerRecord, AnswerReview, AnswerStatus, ContentFilter, ContentHeader,
    ContentItem, ContentStats, ContentType, DailyPerformance, GenerationRequest, GradedItem, GradeSource, Grading,
    GradingModel, ItemResults, LedgerEntry, LedgerEvent, NewLedgerEntry, Principal,
    ProgressSummary, Question, QuestionResult, QuotaState, QuotaStatus, RawContent, RawOption,
    RawQuestion, ScoreReport, SubjectAnalytics, SubmittedAnswer, Submission, SubscriptionEvent,
    SubscriptionEventKind, TopicProgress, User,
};
pub use engine::{EngineSettings, Generated, StudyEngine};
pub use error::{EngineError, EngineResult};
pub use ports::{
    Clock, ContentGenerationService, DatabaseService, MarkingService, PortError, PortResult,
};

//! Shared fixtures for the integration tests: a scripted content generator and
//! an engine wired to the in-memory store and a manual clock.

#![allow(dead_code)]

use api_lib::adapters::MemoryDb;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use revision_core::{
    clock::ManualClock,
    domain::{ContentType, GenerationRequest, RawContent, RawOption, RawQuestion},
    ports::{ContentGenerationService, MarkingService, PortError, PortResult},
    EngineSettings, StudyEngine,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the stub generator does on its next calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorMode {
    Valid,
    Failing,
    /// Returns one question fewer than requested.
    WrongArity,
}

/// A content generator that builds well-formed content from the request alone.
///
/// Quiz questions always have `A` as the correct option. Mock exam questions are
/// worth 2 marks with the keywords `osmosis` and `membrane`.
pub struct StubGenerator {
    mode: Mutex<GeneratorMode>,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(GeneratorMode::Valid),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: GeneratorMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn question(content_type: ContentType, number: i64) -> RawQuestion {
        match content_type {
            ContentType::Flashcard => RawQuestion {
                number: Some(number),
                prompt: Some(format!("Term {}", number)),
                answer: Some(format!("Definition {}", number)),
                ..Default::default()
            },
            ContentType::Quiz => RawQuestion {
                number: Some(number),
                prompt: Some(format!("Question {}", number)),
                marks: Some(1),
                options: ["A", "B", "C", "D"]
                    .iter()
                    .map(|label| RawOption {
                        label: Some(label.to_string()),
                        text: Some(format!("Option {}", label)),
                    })
                    .collect(),
                correct_option: Some("A".to_string()),
                explanation: Some("A is right.".to_string()),
                ..Default::default()
            },
            ContentType::MockExam => RawQuestion {
                number: Some(number),
                prompt: Some(format!("Explain process {}", number)),
                marks: Some(2),
                answer: Some("Water moves by osmosis across a partially permeable membrane.".to_string()),
                keywords: vec!["osmosis".to_string(), "membrane".to_string()],
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl ContentGenerationService for StubGenerator {
    async fn generate_content(&self, request: &GenerationRequest) -> PortResult<RawContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Suspend like a network call so concurrent requests overlap.
        tokio::task::yield_now().await;
        let mode = *self.mode.lock().unwrap();
        let count = match mode {
            GeneratorMode::Failing => {
                return Err(PortError::Unexpected("upstream model unavailable".to_string()))
            }
            GeneratorMode::Valid => request.count as i64,
            GeneratorMode::WrongArity => request.count as i64 - 1,
        };
        Ok(RawContent {
            title: None,
            questions: (1..=count)
                .map(|n| Self::question(request.content_type, n))
                .collect(),
        })
    }
}

pub struct Harness {
    pub engine: Arc<StudyEngine>,
    pub db: MemoryDb,
    pub generator: Arc<StubGenerator>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// An engine that leaves every free-text answer for a human grader.
    pub fn new() -> Self {
        Self::with_marker(None)
    }

    pub fn with_marker(marker: Option<Arc<dyn MarkingService>>) -> Self {
        let db = MemoryDb::new();
        let generator = Arc::new(StubGenerator::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap(),
        ));
        let settings = EngineSettings {
            generator_timeout: Duration::from_secs(5),
            max_items_per_request: 20,
        };
        let engine = Arc::new(StudyEngine::new(
            Arc::new(db.clone()),
            generator.clone(),
            marker,
            clock.clone(),
            settings,
        ));
        Self {
            engine,
            db,
            generator,
            clock,
        }
    }
}

pub fn request(content_type: ContentType, subject: &str, topic: &str, count: u32) -> GenerationRequest {
    GenerationRequest {
        content_type,
        subject: subject.to_string(),
        topic: topic.to_string(),
        exam_board: "AQA".to_string(),
        count,
    }
}

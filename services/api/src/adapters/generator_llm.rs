//! services/api/src/adapters/generator_llm.rs
//!
//! This module contains the adapter for the content-generating LLM.
//! It implements the `ContentGenerationService` port from the `core` crate.
//!
//! The model is asked for a single JSON document. Its reply is parsed leniently
//! into `RawContent`; the core validates it before anything is stored.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client, error::OpenAIError,
};
use async_trait::async_trait;
use regex::Regex;
use revision_core::{
    domain::{ContentType, GenerationRequest, RawContent, RawOption, RawQuestion},
    ports::{ContentGenerationService, PortError, PortResult},
};
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

const SYSTEM_INSTRUCTIONS: &str = r#"You write revision material for secondary school exam students.
Reply with ONE JSON object and nothing else. No prose, no markdown.

Shape:
{
  "title": "short title",
  "questions": [
    {
      "number": 1,
      "prompt": "question text or flashcard front",
      "marks": 1,
      "options": [{"label": "A", "text": "..."}],
      "correct_option": "A",
      "answer": "model answer or flashcard back",
      "explanation": "why the answer is right",
      "keywords": ["mark scheme point"]
    }
  ]
}

Rules:
- Produce exactly the number of questions asked for, numbered from 1.
- Match the style and difficulty of the named exam board."#;

fn type_instructions(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Flashcard => {
            "Write flashcards. Put the front in \"prompt\" and the back in \"answer\". \
             Leave \"options\" empty and omit \"correct_option\". Every card is worth 1 mark."
        }
        ContentType::Quiz => {
            "Write multiple-choice questions with four options labelled A to D. \
             \"correct_option\" must be the label of the single correct option. \
             Give a one-sentence \"explanation\". Every question is worth 1 mark."
        }
        ContentType::MockExam => {
            "Write exam-style written questions worth between 1 and 6 marks. \
             \"answer\" is a model answer that would earn full marks. \
             \"keywords\" lists one mark-scheme point per available mark. \
             Leave \"options\" empty."
        }
    }
}

//=========================================================================================
// Wire Format
//=========================================================================================
// Every field defaults so a partially wrong reply still reaches validation,
// which then reports precisely what is missing.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneratedContent {
    title: Option<String>,
    questions: Vec<GeneratedQuestion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneratedQuestion {
    number: Option<i64>,
    #[serde(alias = "question", alias = "text", alias = "front")]
    prompt: Option<String>,
    marks: Option<i64>,
    options: Vec<GeneratedOption>,
    #[serde(alias = "correct", alias = "correct_answer")]
    correct_option: Option<String>,
    #[serde(alias = "sample_answer", alias = "back")]
    answer: Option<String>,
    explanation: Option<String>,
    keywords: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneratedOption {
    label: Option<String>,
    text: Option<String>,
}

impl GeneratedContent {
    fn into_raw(self) -> RawContent {
        RawContent {
            title: self.title,
            questions: self
                .questions
                .into_iter()
                .map(|q| RawQuestion {
                    number: q.number,
                    prompt: q.prompt,
                    marks: q.marks,
                    options: q
                        .options
                        .into_iter()
                        .map(|o| RawOption { label: o.label, text: o.text })
                        .collect(),
                    correct_option: q.correct_option,
                    answer: q.answer,
                    explanation: q.explanation,
                    keywords: q.keywords,
                })
                .collect(),
        }
    }
}

fn code_fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").ok())
        .as_ref()
}

/// Parses the model's reply, tolerating a surrounding markdown code fence.
pub(crate) fn parse_reply(reply: &str) -> PortResult<RawContent> {
    let body = code_fence()
        .and_then(|fence| fence.captures(reply))
        .and_then(|c| c.get(1))
        .map_or(reply.trim(), |m| m.as_str());

    serde_json::from_str::<GeneratedContent>(body)
        .map(GeneratedContent::into_raw)
        .map_err(|e| PortError::Unexpected(format!("Generator reply is not valid JSON: {}", e)))
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ContentGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiContentGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiContentGenerator {
    /// Creates a new `OpenAiContentGenerator`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `ContentGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ContentGenerationService for OpenAiContentGenerator {
    async fn generate_content(&self, request: &GenerationRequest) -> PortResult<RawContent> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!(
                    "{}\n\nSUBJECT: {}\nTOPIC: {}\nEXAM BOARD: {}\nNUMBER OF QUESTIONS: {}",
                    type_instructions(request.content_type),
                    request.subject,
                    request.topic,
                    request.exam_board,
                    request.count
                ))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Generator LLM response contained no text content.".to_string())
            })?;

        debug!(content_type = %request.content_type, bytes = content.len(), "Generator reply received");
        parse_reply(&content)
    }
}

//! crates/revision_core/src/marking.rs
//!
//! A deterministic rubric marker: a free-text answer earns marks in proportion
//! to the mark-scheme keywords it mentions.

use async_trait::async_trait;

use crate::domain::{Grading, Question};
use crate::ports::{MarkingService, PortResult};

#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordMarker;

/// Lowercases and collapses everything that is not alphanumeric into single spaces,
/// padded so whole-word phrases can be matched with `contains`.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

impl KeywordMarker {
    /// `None` when the question has no keywords to mark against.
    pub fn mark(&self, question: &Question, response: &str) -> Option<u32> {
        let Grading::Manual { keywords, .. } = &question.grading else {
            return None;
        };
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| normalize(k))
            .filter(|k| !k.trim().is_empty())
            .collect();
        if keywords.is_empty() {
            return None;
        }

        let response = normalize(response);
        let found = keywords.iter().filter(|k| response.contains(k.as_str())).count() as u64;
        Some((found * question.marks as u64 / keywords.len() as u64) as u32)
    }
}

#[async_trait]
impl MarkingService for KeywordMarker {
    async fn mark_answer(&self, question: &Question, response: &str) -> PortResult<Option<u32>> {
        Ok(self.mark(question, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn question(marks: u32, keywords: &[&str]) -> Question {
        Question {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            number: 1,
            prompt: "Explain diffusion.".to_string(),
            marks,
            grading: Grading::Manual {
                sample_answer: "Net movement of particles down a concentration gradient".to_string(),
                explanation: None,
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            },
        }
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let q = question(2, &["net", "gradient"]);
        assert_eq!(KeywordMarker.mark(&q, "The network is graded"), Some(0));
        assert_eq!(KeywordMarker.mark(&q, "Net movement down a GRADIENT."), Some(2));
    }

    #[test]
    fn marks_never_exceed_question_marks() {
        let q = question(3, &["particles", "particles", "random"]);
        let awarded = KeywordMarker.mark(&q, "particles move at random").unwrap();
        assert!(awarded <= 3);
    }

    #[test]
    fn no_keywords_means_no_mark() {
        let q = question(3, &[]);
        assert_eq!(KeywordMarker.mark(&q, "anything"), None);
    }
}

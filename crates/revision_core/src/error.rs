//! crates/revision_core/src/error.rs
//!
//! The error taxonomy surfaced by the engine to the HTTP layer.

use crate::domain::ContentType;
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The free tier's daily allowance for this content type is used up.
    #[error("Daily limit of {limit} reached for {content_type}")]
    QuotaExceeded { content_type: ContentType, limit: u32 },

    /// The caller's request was malformed (bad parameters, unknown questions, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The content generator returned something that failed validation.
    #[error("Generated content was malformed: {0}")]
    MalformedContent(String),

    /// The content generator failed or timed out.
    #[error("Content generator failed: {0}")]
    Generator(String),

    /// Not the caller's item, or no such item. Deliberately indistinguishable.
    #[error("Forbidden")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Item has already been submitted")]
    AlreadySubmitted,

    #[error("Answer has already been graded")]
    AlreadyGraded,

    /// Any failure of the durable store.
    #[error("Internal error: {0}")]
    Internal(#[from] PortError),
}

pub type EngineResult<T> = Result<T, EngineError>;

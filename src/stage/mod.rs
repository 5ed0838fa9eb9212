//! Pipeline stages
//!
//! Each stage reads state persisted by an earlier stage, calls the model
//! gateway, and writes its results back through the store. Stages that
//! process several items report item-by-item progress on a
//! [`ProgressStream`]; every item commits before its `complete` event.
//!
//! - `Extractor`: chapters → metaphors
//! - `Organizer`: selected metaphors → topics and subtopics
//! - `Writer`: topics → paper sections
//! - `Translator`: paper sections → translated text slots

mod extract;
mod organize;
mod progress;
mod translate;
mod write;

pub use extract::Extractor;
pub use organize::{Organizer, TopicBudget, WordBudget};
pub use progress::{spawn_stage, ProgressEvent, ProgressSender, ProgressStatus, ProgressStream};
pub use translate::Translator;
pub use write::{body_target_words, PaperRequest, Writer, DEFAULT_TITLE};

use crate::gateway::GatewayError;
use crate::render::RenderError;
use crate::segment::SegmentError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors surfaced by pipeline stages and the facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Ingestion failed: {0}")]
    Ingestion(#[from] SegmentError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// A progress-producing stage was started outside a tokio runtime.
    #[error("No async runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// An earlier stage has not produced the state this one consumes.
    #[error("{0}")]
    MissingPrerequisite(String),
}

impl PipelineError {
    /// True if a structured call came back without the required tool call.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Gateway(e) if e.is_protocol())
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Truncate to at most `max` characters without splitting a character.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

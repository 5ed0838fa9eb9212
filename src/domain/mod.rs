//! Persisted project state: chapters, metaphors, topics and papers
//!
//! These are plain data types. They carry no behavior beyond small
//! conversions; every mutation goes through a [`crate::storage::ProjectStore`].

mod chapter;
mod metaphor;
mod paper;
mod topic;

pub use chapter::{word_count, Chapter, ExtractionStats};
pub use metaphor::{Assignment, Metaphor, MetaphorUpdate, MetaphorView, NewMetaphor};
pub use paper::{Language, NewSection, Paper, PaperSection, PaperStatus, PaperWithSections, SectionKind};
pub use topic::{Reorganization, Subtopic, SubtopicDraft, Topic, TopicDraft, TopicSummary};

/// Error returned when a stored or user-supplied enum label is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseLabelError {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

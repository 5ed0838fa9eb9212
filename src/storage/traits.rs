//! Storage trait definitions

use crate::domain::{
    Chapter, ExtractionStats, Language, Metaphor, MetaphorUpdate, MetaphorView, NewMetaphor,
    NewSection, Paper, PaperSection, PaperStatus, ParseLabelError, Reorganization, Subtopic,
    Topic, TopicDraft, TopicSummary,
};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] ParseLabelError),

    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for querying metaphors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaphorFilter {
    pub chapter_id: Option<i64>,
    pub topic_id: Option<i64>,
    pub selected: Option<bool>,
    pub min_confidence: Option<f64>,
}

impl MetaphorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chapter(mut self, chapter_id: i64) -> Self {
        self.chapter_id = Some(chapter_id);
        self
    }

    pub fn with_topic(mut self, topic_id: i64) -> Self {
        self.topic_id = Some(topic_id);
        self
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = Some(selected);
        self
    }

    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    /// Shorthand for the metaphors visible to downstream stages.
    pub fn selected() -> Self {
        Self::new().with_selected(true)
    }
}

/// Trait for project storage backends
///
/// Implementations must be thread-safe (Send + Sync): stages run on spawned
/// tasks. Methods that change more than one row apply all of it or none of it.
pub trait ProjectStore: Send + Sync {
    // === Chapters ===

    fn chapter_count(&self) -> StorageResult<usize>;

    /// Insert every chapter in one transaction.
    fn insert_chapters(&self, chapters: &[Chapter]) -> StorageResult<()>;

    /// All chapters in ascending id order.
    fn list_chapters(&self) -> StorageResult<Vec<Chapter>>;

    fn get_chapter(&self, id: i64) -> StorageResult<Option<Chapter>>;

    /// Chapters with `processed = false`, ascending id order.
    fn unprocessed_chapters(&self) -> StorageResult<Vec<Chapter>>;

    fn extraction_stats(&self) -> StorageResult<ExtractionStats>;

    // === Metaphors ===

    /// Append `metaphors` to the chapter and mark it processed, atomically.
    fn commit_extraction(&self, chapter_id: i64, metaphors: &[NewMetaphor]) -> StorageResult<Vec<Metaphor>>;

    fn get_metaphor(&self, id: i64) -> StorageResult<Option<Metaphor>>;

    /// Metaphors matching `filter`, ordered by chapter then id.
    fn find_metaphors(&self, filter: &MetaphorFilter) -> StorageResult<Vec<Metaphor>>;

    /// Like `find_metaphors`, with chapter label and topic name resolved.
    fn find_metaphor_views(&self, filter: &MetaphorFilter) -> StorageResult<Vec<MetaphorView>>;

    /// Selected metaphors ordered by quote text.
    fn selected_metaphors_by_quote(&self) -> StorageResult<Vec<Metaphor>>;

    /// Apply a partial update. `Ok(None)` if the metaphor does not exist.
    fn update_metaphor(&self, id: i64, update: &MetaphorUpdate) -> StorageResult<Option<Metaphor>>;

    /// Flip `selected`; returns the new value.
    fn toggle_metaphor(&self, id: i64) -> StorageResult<Option<bool>>;

    // === Topics ===

    /// Delete every topic and subtopic, clear all metaphor assignments, then
    /// create `drafts` in order and apply their assignments.
    fn replace_topics(&self, drafts: &[TopicDraft]) -> StorageResult<Reorganization>;

    /// Topics in sort order.
    fn list_topics(&self) -> StorageResult<Vec<Topic>>;

    fn topic_summaries(&self) -> StorageResult<Vec<TopicSummary>>;

    fn get_topic(&self, id: i64) -> StorageResult<Option<Topic>>;

    /// Subtopics of a topic in sort order.
    fn list_subtopics(&self, topic_id: i64) -> StorageResult<Vec<Subtopic>>;

    fn get_subtopic(&self, id: i64) -> StorageResult<Option<Subtopic>>;

    /// Create a topic after all existing ones.
    fn create_topic(&self, name: &str, description: &str) -> StorageResult<Topic>;

    fn update_topic(&self, id: i64, name: &str, description: &str) -> StorageResult<Option<Topic>>;

    /// Give each listed topic its position as sort order; unknown ids are skipped.
    fn reorder_topics(&self, ids: &[i64]) -> StorageResult<usize>;

    // === Papers ===

    fn create_paper(&self, title: &str, author: &str, target_pages: u32, status: PaperStatus) -> StorageResult<Paper>;

    fn set_paper_status(&self, id: i64, status: PaperStatus) -> StorageResult<bool>;

    fn get_paper(&self, id: i64) -> StorageResult<Option<Paper>>;

    /// Papers, newest first.
    fn list_papers(&self) -> StorageResult<Vec<Paper>>;

    /// Insert a section; `actual_words` is the word count of `section.content`.
    fn insert_section(&self, paper_id: i64, section: &NewSection) -> StorageResult<PaperSection>;

    /// Sections of a paper in sort order.
    fn list_sections(&self, paper_id: i64) -> StorageResult<Vec<PaperSection>>;

    /// Overwrite one translation slot.
    fn set_translation(&self, section_id: i64, language: Language, content: &str) -> StorageResult<bool>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: ProjectStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}

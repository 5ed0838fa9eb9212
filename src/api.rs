//! Transport-independent API layer.
//!
//! `Metaphorizer` is the single entry point for all consumer-facing
//! operations. Front ends (the CLI, an HTTP server, tests) call its methods;
//! they never drive the stages or the store directly.
//!
//! Lookups and edits on unknown ids return `Ok(None)`.

use std::sync::Arc;

use tracing::info;

use crate::domain::{
    Assignment, Chapter, ExtractionStats, Language, Metaphor, MetaphorUpdate, MetaphorView, Paper,
    PaperWithSections, Reorganization, Subtopic, Topic, TopicSummary,
};
use crate::gateway::ModelGateway;
use crate::render::{RenderDocument, Renderer};
use crate::sanitize::sanitize_user_input;
use crate::segment::{fetch_source, segment};
use crate::stage::{
    Extractor, Organizer, PaperRequest, PipelineResult, ProgressStream, Translator, WordBudget, Writer,
};
use crate::storage::{MetaphorFilter, ProjectStore};

/// Single entry point for all consumer-facing operations.
#[derive(Clone)]
pub struct Metaphorizer {
    store: Arc<dyn ProjectStore>,
    gateway: Arc<dyn ModelGateway>,
}

impl Metaphorizer {
    /// Create a new API instance over a store and a model gateway.
    pub fn new(store: Arc<dyn ProjectStore>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self { store, gateway }
    }

    fn extractor(&self) -> Extractor {
        Extractor::new(self.store.clone(), self.gateway.clone())
    }

    fn organizer(&self) -> Organizer {
        Organizer::new(self.store.clone(), self.gateway.clone())
    }

    // --- Ingestion ---

    /// Segment `raw` into chapters and store them.
    ///
    /// If any chapter already exists nothing is parsed and the stored
    /// chapters are returned. Nothing is written unless segmentation finds
    /// at least one chapter.
    pub fn ingest_text(&self, raw: &str) -> PipelineResult<Vec<Chapter>> {
        if self.store.chapter_count()? > 0 {
            info!("Chapters already ingested; keeping existing set");
            return Ok(self.store.list_chapters()?);
        }
        let chapters = segment(raw)?;
        self.store.insert_chapters(&chapters)?;
        info!(chapters = chapters.len(), "Ingested source");
        Ok(chapters)
    }

    /// Download the book from `url` and ingest it. No request is made if
    /// chapters already exist.
    pub async fn ingest_from(&self, url: &str) -> PipelineResult<Vec<Chapter>> {
        if self.store.chapter_count()? > 0 {
            info!("Chapters already ingested; skipping fetch");
            return Ok(self.store.list_chapters()?);
        }
        let text = fetch_source(url).await?;
        self.ingest_text(&text)
    }

    pub fn chapters(&self) -> PipelineResult<Vec<Chapter>> {
        Ok(self.store.list_chapters()?)
    }

    pub fn chapter(&self, id: i64) -> PipelineResult<Option<Chapter>> {
        Ok(self.store.get_chapter(id)?)
    }

    pub fn extraction_stats(&self) -> PipelineResult<ExtractionStats> {
        Ok(self.store.extraction_stats()?)
    }

    // --- Extraction ---

    /// Extract one chapter. Re-extracting appends duplicate rows.
    pub async fn extract_chapter(&self, chapter_id: i64) -> PipelineResult<Option<Vec<Metaphor>>> {
        self.extractor().extract_chapter(chapter_id).await
    }

    /// Extract every unprocessed chapter, reporting progress per chapter.
    pub fn extract_all(&self) -> PipelineResult<ProgressStream> {
        self.extractor().extract_all()
    }

    // --- Metaphors ---

    pub fn metaphors(&self, filter: &MetaphorFilter) -> PipelineResult<Vec<MetaphorView>> {
        Ok(self.store.find_metaphor_views(filter)?)
    }

    pub fn metaphor(&self, id: i64) -> PipelineResult<Option<Metaphor>> {
        Ok(self.store.get_metaphor(id)?)
    }

    /// Apply a user edit. Free-text fields are sanitized before they are
    /// stored.
    pub fn update_metaphor(&self, id: i64, update: MetaphorUpdate) -> PipelineResult<Option<Metaphor>> {
        let update = update.map_text(sanitize_user_input);
        Ok(self.store.update_metaphor(id, &update)?)
    }

    /// Flip selection; returns the new state.
    pub fn toggle_metaphor(&self, id: i64) -> PipelineResult<Option<bool>> {
        Ok(self.store.toggle_metaphor(id)?)
    }

    /// Move a metaphor to a topic or subtopic. A topic-only assignment
    /// clears the subtopic.
    pub fn assign_metaphor(&self, id: i64, assignment: Assignment) -> PipelineResult<Option<Metaphor>> {
        let update = MetaphorUpdate::new().with_assignment(assignment);
        Ok(self.store.update_metaphor(id, &update)?)
    }

    // --- Topics ---

    /// Replace all topics with a fresh clustering of the selected metaphors.
    pub async fn organize(&self) -> PipelineResult<Reorganization> {
        self.organizer().organize().await
    }

    /// Advisory per-section word counts for a paper of `pages` pages.
    pub async fn suggest_word_counts(&self, pages: u32) -> PipelineResult<WordBudget> {
        self.organizer().suggest_word_counts(pages).await
    }

    /// Topics in sort order with their member counts.
    pub fn topics(&self) -> PipelineResult<Vec<TopicSummary>> {
        Ok(self.store.topic_summaries()?)
    }

    pub fn subtopics(&self, topic_id: i64) -> PipelineResult<Vec<Subtopic>> {
        Ok(self.store.list_subtopics(topic_id)?)
    }

    pub fn create_topic(&self, name: &str, description: &str) -> PipelineResult<Topic> {
        Ok(self
            .store
            .create_topic(&sanitize_user_input(name), &sanitize_user_input(description))?)
    }

    pub fn update_topic(&self, id: i64, name: &str, description: &str) -> PipelineResult<Option<Topic>> {
        Ok(self
            .store
            .update_topic(id, &sanitize_user_input(name), &sanitize_user_input(description))?)
    }

    /// Positions in `ids` become sort orders. Returns how many topics moved.
    pub fn reorder_topics(&self, ids: &[i64]) -> PipelineResult<usize> {
        Ok(self.store.reorder_topics(ids)?)
    }

    // --- Papers ---

    /// Create a paper and stream its generation.
    pub fn generate_paper(&self, request: PaperRequest) -> PipelineResult<ProgressStream> {
        Writer::new(self.store.clone(), self.gateway.clone()).generate(request)
    }

    /// A paper with its sections in document order.
    pub fn paper(&self, id: i64) -> PipelineResult<Option<PaperWithSections>> {
        let Some(paper) = self.store.get_paper(id)? else {
            return Ok(None);
        };
        let sections = self.store.list_sections(id)?;
        Ok(Some(PaperWithSections { paper, sections }))
    }

    /// Papers, newest first.
    pub fn papers(&self) -> PipelineResult<Vec<Paper>> {
        Ok(self.store.list_papers()?)
    }

    /// Translate a paper, overwriting any earlier translation in `language`.
    pub fn translate_paper(&self, paper_id: i64, language: Language) -> PipelineResult<Option<ProgressStream>> {
        Translator::new(self.store.clone(), self.gateway.clone()).translate(paper_id, language)
    }

    /// Render a paper in `language` with `renderer`.
    pub fn render_paper(
        &self,
        paper_id: i64,
        language: Language,
        renderer: &dyn Renderer,
    ) -> PipelineResult<Option<Vec<u8>>> {
        let Some(paper) = self.paper(paper_id)? else {
            return Ok(None);
        };
        let document = RenderDocument::from_paper(&paper, language);
        Ok(Some(renderer.render(&document)?))
    }
}

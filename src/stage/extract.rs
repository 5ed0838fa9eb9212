//! Extraction: one structured model call per chapter

use super::progress::{spawn_stage, ProgressEvent, ProgressStatus, ProgressStream};
use super::PipelineResult;
use crate::domain::{Chapter, Metaphor, NewMetaphor};
use crate::gateway::{request_structured, CompletionRequest, ModelGateway, StructuredOutput};
use crate::sanitize::sanitize_book_text;
use crate::storage::ProjectStore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a literary scholar who identifies figurative language with \
academic precision. You read each passage closely, attend to the historical setting of the \
novel, and quote the text exactly.";

/// Typed result of the `record_metaphors` tool.
#[derive(Debug, Deserialize)]
struct ExtractedMetaphors {
    metaphors: Vec<ExtractedMetaphor>,
}

#[derive(Debug, Deserialize)]
struct ExtractedMetaphor {
    exact_quote: String,
    explanation: String,
    meaning: String,
    #[serde(default)]
    confidence: f64,
    suggested_topic: String,
}

impl From<ExtractedMetaphor> for NewMetaphor {
    fn from(item: ExtractedMetaphor) -> Self {
        Self {
            exact_quote: item.exact_quote,
            explanation: item.explanation,
            meaning: item.meaning,
            suggested_topic: item.suggested_topic,
            confidence: item.confidence.clamp(0.0, 1.0),
        }
    }
}

impl StructuredOutput for ExtractedMetaphors {
    const TOOL_NAME: &'static str = "record_metaphors";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "metaphors": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "exact_quote": {
                                "type": "string",
                                "description": "The passage, verbatim"
                            },
                            "explanation": {
                                "type": "string",
                                "description": "Which figurative device is used and how"
                            },
                            "meaning": {
                                "type": "string",
                                "description": "What it means in the novel's setting and themes"
                            },
                            "confidence": {
                                "type": "number",
                                "description": "Confidence from 0.0 to 1.0",
                                "default": 0.0
                            },
                            "suggested_topic": {
                                "type": "string",
                                "description": "Short thematic label"
                            }
                        },
                        "required": ["exact_quote", "explanation", "meaning", "confidence", "suggested_topic"]
                    }
                }
            },
            "required": ["metaphors"]
        })
    }
}

fn extraction_request(chapter: &Chapter) -> CompletionRequest {
    let prompt = format!(
        "Analyze Chapter {number} of the novel below. Extract every metaphor, including:\n\
         - Similes, extended metaphors, implied metaphors and symbolic imagery\n\
         - Obvious and subtle figurative language alike\n\
         - Personification, metonymy and synecdoche where they work metaphorically\n\n\
         Record each one with the tool provided. Include every instance, even when the same \
         image recurs, and quote the exact text.\n\n\
         Chapter {number} text:\n---\n{text}\n---",
        number = chapter.number,
        text = sanitize_book_text(&chapter.text),
    );
    CompletionRequest::new(prompt)
        .with_system(SYSTEM_PROMPT)
        .with_max_tokens(8192)
        .with_temperature(0.2)
}

/// Extracts metaphors from chapters.
#[derive(Clone)]
pub struct Extractor {
    store: Arc<dyn ProjectStore>,
    gateway: Arc<dyn ModelGateway>,
}

impl Extractor {
    pub fn new(store: Arc<dyn ProjectStore>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self { store, gateway }
    }

    /// Extract one chapter, appending to any metaphors it already has.
    ///
    /// Returns `Ok(None)` for an unknown chapter. A response without the
    /// tool call fails with a protocol error and writes nothing.
    pub async fn extract_chapter(&self, chapter_id: i64) -> PipelineResult<Option<Vec<Metaphor>>> {
        let Some(chapter) = self.store.get_chapter(chapter_id)? else {
            return Ok(None);
        };
        self.extract(&chapter).await.map(Some)
    }

    async fn extract(&self, chapter: &Chapter) -> PipelineResult<Vec<Metaphor>> {
        let request = extraction_request(chapter);
        let result: ExtractedMetaphors = request_structured(self.gateway.as_ref(), &request).await?;

        let metaphors: Vec<NewMetaphor> = result.metaphors.into_iter().map(NewMetaphor::from).collect();
        let created = self.store.commit_extraction(chapter.id, &metaphors)?;
        info!(chapter = %chapter.number, metaphors = created.len(), "Extracted chapter");
        Ok(created)
    }

    /// Extract every unprocessed chapter in ascending order.
    ///
    /// A failed chapter is reported with a `failed` event and left
    /// unprocessed; the run continues with the next chapter.
    pub fn extract_all(&self) -> PipelineResult<ProgressStream> {
        let chapters = self.store.unprocessed_chapters()?;
        info!(chapters = chapters.len(), "Starting extraction run");

        let extractor = self.clone();
        spawn_stage(move |progress| async move {
            for chapter in chapters {
                progress.emit(ProgressEvent::chapter(ProgressStatus::Processing, &chapter.number));
                match extractor.extract(&chapter).await {
                    Ok(_) => progress.emit(ProgressEvent::chapter(ProgressStatus::Complete, &chapter.number)),
                    Err(e) => {
                        warn!(chapter = %chapter.number, error = %e, "Extraction failed");
                        progress.emit(
                            ProgressEvent::chapter(ProgressStatus::Failed, &chapter.number).with_error(e.to_string()),
                        );
                    }
                }
            }
        })
    }
}

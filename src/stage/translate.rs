//! Translator: fills one language slot of every written section

use super::progress::{spawn_stage, ProgressEvent, ProgressStatus, ProgressStream};
use super::{PipelineError, PipelineResult};
use crate::domain::{Language, PaperSection};
use crate::gateway::{CompletionRequest, ModelGateway};
use crate::storage::ProjectStore;
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a professional academic translator specializing in literary \
analysis. Translate with precision and keep the formal register of the original.";

fn translation_request(section: &PaperSection, language: Language) -> CompletionRequest {
    let mut rules = String::from(
        "- Maintain the academic register and formal tone\n\
         - For direct quotes from the novel, give your translation followed by the original \
         English in brackets: \"translation\" [\"original English\"]\n\
         - Preserve all formatting (headings, paragraphs, block quotes)\n\
         - For literary terms with no direct equivalent, use the closest term and add a brief \
         parenthetical explanation",
    );
    if language == Language::Zh {
        rules.push_str("\n- Use Simplified Chinese characters throughout");
    }

    let prompt = format!(
        "Translate the following academic paper section from English to {language}.\n\n\
         Rules:\n{rules}\n\n\
         Section title: {title}\n\n\
         Text to translate:\n---\n{text}\n---",
        language = language.display_name(),
        rules = rules,
        title = section.title,
        text = section.content_en,
    );
    CompletionRequest::new(prompt)
        .with_system(SYSTEM_PROMPT)
        .with_max_tokens(8192)
        .with_temperature(0.2)
}

/// Translates papers section by section.
#[derive(Clone)]
pub struct Translator {
    store: Arc<dyn ProjectStore>,
    gateway: Arc<dyn ModelGateway>,
}

impl Translator {
    pub fn new(store: Arc<dyn ProjectStore>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self { store, gateway }
    }

    /// Translate every non-empty section of a paper into `language`,
    /// overwriting any earlier translation.
    ///
    /// Returns `Ok(None)` for an unknown paper. Sections with no source text
    /// produce no events; a failed section is reported and skipped.
    pub fn translate(&self, paper_id: i64, language: Language) -> PipelineResult<Option<ProgressStream>> {
        if !language.is_translation_target() {
            return Err(PipelineError::UnsupportedLanguage(language.code().to_string()));
        }
        if self.store.get_paper(paper_id)?.is_none() {
            return Ok(None);
        }

        let sections: Vec<PaperSection> = self
            .store
            .list_sections(paper_id)?
            .into_iter()
            .filter(|s| !s.content_en.trim().is_empty())
            .collect();
        info!(paper_id, lang = %language, sections = sections.len(), "Starting translation");

        let translator = self.clone();
        let stream = spawn_stage(move |progress| async move {
            for section in sections {
                let event = |status| ProgressEvent::section(status, &section.title).with_lang(language);
                progress.emit(event(ProgressStatus::Translating));

                match translator.translate_section(&section, language).await {
                    Ok(()) => progress.emit(event(ProgressStatus::Complete)),
                    Err(e) => {
                        warn!(section = %section.title, lang = %language, error = %e, "Translation failed");
                        progress.emit(event(ProgressStatus::Failed).with_error(e.to_string()));
                    }
                }
            }
        })?;
        Ok(Some(stream))
    }

    async fn translate_section(&self, section: &PaperSection, language: Language) -> PipelineResult<()> {
        let completion = self.gateway.complete(&translation_request(section, language)).await?;
        self.store.set_translation(section.id, language, &completion.content)?;
        info!(section = %section.title, lang = %language, "Translated section");
        Ok(())
    }
}

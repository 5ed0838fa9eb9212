//! Writer: one paper per run, one model call per section

use super::progress::{spawn_stage, ProgressEvent, ProgressSender, ProgressStatus, ProgressStream};
use super::{truncate_chars, PipelineError, PipelineResult};
use crate::domain::{NewSection, Paper, PaperStatus, SectionKind, Topic};
use crate::gateway::{CompletionRequest, ModelGateway};
use crate::sanitize::sanitize;
use crate::storage::{MetaphorFilter, ProjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are an academic writer producing a scholarly paper that analyzes \
metaphor in a novel. Write in a formal academic register with precise literary analysis, reference \
specific passages, and cite chapters when quoting.";

const EXEC_SUMMARY_WORDS: i64 = super::organize::EXEC_SUMMARY_WORDS;
const INTRODUCTION_WORDS: i64 = 300;
const CONCLUSION_WORDS: i64 = 300;

/// Sort order of the first body section.
const FIRST_BODY_ORDER: i64 = 2;
/// Lowest sort order the conclusion takes.
const MIN_CONCLUSION_ORDER: i64 = 99;
/// Characters of meaning shown per index line.
const INDEX_MEANING_CHARS: usize = 80;

pub const DEFAULT_TITLE: &str = "Metaphorical Architecture of the Novel";

/// What to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperRequest {
    pub title: String,
    pub author: String,
    pub target_pages: u32,
}

impl Default for PaperRequest {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            author: String::new(),
            target_pages: 10,
        }
    }
}

/// Target words for the body section at `sort_order` (2 for the first
/// topic, 3 for the second, ...). Earlier topics get longer sections.
pub fn body_target_words(sort_order: i64) -> i64 {
    (1700 / sort_order.max(1)).max(200)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ExecSummary,
    Introduction,
    Body(usize),
    Conclusion,
    Index,
}

fn plan(topic_count: usize) -> Vec<Step> {
    let mut steps = vec![Step::ExecSummary, Step::Introduction];
    steps.extend((0..topic_count).map(Step::Body));
    steps.extend([Step::Conclusion, Step::Index]);
    steps
}

fn conclusion_order(topic_count: usize) -> i64 {
    MIN_CONCLUSION_ORDER.max(FIRST_BODY_ORDER + topic_count as i64)
}

impl Step {
    /// Name used in progress events.
    fn label<'a>(&self, topics: &'a [Topic]) -> &'a str {
        match self {
            Self::ExecSummary => "exec_summary",
            Self::Introduction => "introduction",
            Self::Body(i) => &topics[*i].name,
            Self::Conclusion => "conclusion",
            Self::Index => "index",
        }
    }

    fn sort_order(&self, topic_count: usize) -> i64 {
        match self {
            Self::ExecSummary => 0,
            Self::Introduction => 1,
            Self::Body(i) => FIRST_BODY_ORDER + *i as i64,
            Self::Conclusion => conclusion_order(topic_count),
            Self::Index => conclusion_order(topic_count) + 1,
        }
    }
}

/// Generates papers from the current topics.
#[derive(Clone)]
pub struct Writer {
    store: Arc<dyn ProjectStore>,
    gateway: Arc<dyn ModelGateway>,
}

impl Writer {
    pub fn new(store: Arc<dyn ProjectStore>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self { store, gateway }
    }

    /// Create a paper and write its sections in order.
    ///
    /// The paper row exists (status `generating`) before this returns; every
    /// event carries its id. If a step fails the run stops there with a
    /// `failed` event and the paper stays `generating`.
    pub fn generate(&self, request: PaperRequest) -> PipelineResult<ProgressStream> {
        let topics = self.store.list_topics()?;
        if topics.is_empty() {
            return Err(PipelineError::MissingPrerequisite(
                "no topics to write about; run organization first".to_string(),
            ));
        }
        // No paper row unless its stage can actually be spawned.
        Handle::try_current()?;

        let paper = self.store.create_paper(
            &request.title,
            &request.author,
            request.target_pages,
            PaperStatus::Generating,
        )?;
        info!(paper_id = paper.id, topics = topics.len(), "Starting paper");

        let writer = self.clone();
        spawn_stage(move |progress| async move {
            if let Err(e) = writer.run(&paper, &topics, &progress).await {
                warn!(paper_id = paper.id, error = %e, "Paper generation stopped");
            }
        })
    }

    async fn run(&self, paper: &Paper, topics: &[Topic], progress: &ProgressSender) -> PipelineResult<()> {
        for step in plan(topics.len()) {
            let label = step.label(topics);
            progress.emit(ProgressEvent::section(ProgressStatus::Generating, label).with_paper(paper.id));

            let written = match self.section_for(paper, topics, step).await {
                Ok(section) => self.store.insert_section(paper.id, &section).map_err(PipelineError::from),
                Err(e) => Err(e),
            };
            match written {
                Ok(section) => {
                    info!(
                        paper_id = paper.id,
                        section = label,
                        target_words = section.target_words,
                        actual_words = section.actual_words,
                        "Wrote section"
                    );
                    progress.emit(ProgressEvent::section(ProgressStatus::Complete, label).with_paper(paper.id));
                }
                Err(e) => {
                    progress.emit(
                        ProgressEvent::section(ProgressStatus::Failed, label)
                            .with_paper(paper.id)
                            .with_error(e.to_string()),
                    );
                    return Err(e);
                }
            }
        }

        self.store.set_paper_status(paper.id, PaperStatus::Complete)?;
        info!(paper_id = paper.id, "Paper complete");
        Ok(())
    }

    async fn section_for(&self, paper: &Paper, topics: &[Topic], step: Step) -> PipelineResult<NewSection> {
        let sort_order = step.sort_order(topics.len());
        let section = match step {
            Step::ExecSummary => {
                let content = self.exec_summary(paper, topics).await?;
                NewSection {
                    kind: SectionKind::ExecSummary,
                    topic_id: None,
                    title: "Executive Summary".to_string(),
                    content,
                    target_words: EXEC_SUMMARY_WORDS,
                    sort_order,
                }
            }
            Step::Introduction => NewSection {
                kind: SectionKind::Introduction,
                topic_id: None,
                title: "Introduction".to_string(),
                content: self.introduction(paper, topics).await?,
                target_words: INTRODUCTION_WORDS,
                sort_order,
            },
            Step::Body(i) => {
                let target_words = body_target_words(sort_order);
                let previous = i.checked_sub(1).map(|p| topics[p].name.as_str());
                let next = topics.get(i + 1).map(|t| t.name.as_str());
                NewSection {
                    kind: SectionKind::Body,
                    topic_id: Some(topics[i].id),
                    title: topics[i].name.clone(),
                    content: self.body(paper, &topics[i], target_words, previous, next).await?,
                    target_words,
                    sort_order,
                }
            }
            Step::Conclusion => NewSection {
                kind: SectionKind::Conclusion,
                topic_id: None,
                title: "Conclusion".to_string(),
                content: self.conclusion(paper, topics).await?,
                target_words: CONCLUSION_WORDS,
                sort_order,
            },
            Step::Index => NewSection {
                kind: SectionKind::Index,
                topic_id: None,
                title: "Index of Metaphors".to_string(),
                content: self.index()?,
                target_words: 0,
                sort_order,
            },
        };
        Ok(section)
    }

    async fn generate_text(&self, prompt: String, max_tokens: u32) -> PipelineResult<String> {
        let request = CompletionRequest::new(prompt)
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(max_tokens);
        Ok(self.gateway.complete(&request).await?.content)
    }

    async fn exec_summary(&self, paper: &Paper, topics: &[Topic]) -> PipelineResult<String> {
        let systems = topics
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Write a {words}-word executive summary of an academic paper titled \"{title}\".\n\n\
             The paper analyzes these metaphor systems in the novel:\n{systems}\n\n\
             Requirements:\n\
             - Exactly {words} words (±5)\n\
             - One or two paragraphs, no headers\n\
             - State the thesis first, then the key metaphor systems and their significance\n\
             - End with why this analysis matters",
            words = EXEC_SUMMARY_WORDS,
            title = paper.title,
            systems = systems,
        );
        self.generate_text(prompt, 1024).await
    }

    async fn introduction(&self, paper: &Paper, topics: &[Topic]) -> PipelineResult<String> {
        let prompt = format!(
            "Write the introduction (~{words} words) for an academic paper titled \"{title}\".\n\n\
             The paper will analyze these metaphor systems: {names}\n\n\
             Requirements:\n\
             - State the thesis clearly\n\
             - Preview every metaphor system listed above\n\
             - Establish why metaphor matters in this novel\n\
             - Approximately {words} words",
            words = INTRODUCTION_WORDS,
            title = paper.title,
            names = topic_names(topics),
        );
        self.generate_text(prompt, 2048).await
    }

    async fn body(
        &self,
        paper: &Paper,
        topic: &Topic,
        target_words: i64,
        previous: Option<&str>,
        next: Option<&str>,
    ) -> PipelineResult<String> {
        let metaphors = self
            .store
            .find_metaphors(&MetaphorFilter::selected().with_topic(topic.id))?;
        let context = metaphors
            .iter()
            .map(|m| {
                let mut entry = format!(
                    "  - Quote: \"{}\" (Chapter {})\n    Meaning: {}",
                    sanitize(&m.exact_quote),
                    m.chapter_id,
                    sanitize(&m.meaning)
                );
                if let Some(notes) = m.user_notes.as_deref().filter(|n| !n.trim().is_empty()) {
                    entry.push_str(&format!("\n    Notes: {}", sanitize(notes)));
                }
                entry
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut transitions = String::new();
        if let Some(previous) = previous {
            transitions.push_str(&format!("\n- Transition smoothly from the previous section on \"{}\"", previous));
        }
        if let Some(next) = next {
            transitions.push_str(&format!("\n- End with a transition toward \"{}\"", next));
        }

        let prompt = format!(
            "Write the \"{name}\" section (~{words} words) of the paper \"{title}\".\n\n\
             Topic description: {description}\n\n\
             Metaphors to analyze in this section:\n{context}\n\n\
             Requirements:\n\
             - Reference each metaphor by quoting it directly\n\
             - Analyze its significance in the novel's historical setting\n\
             - Cite chapters when quoting\n\
             - Approximately {words} words{transitions}",
            name = topic.name,
            words = target_words,
            title = paper.title,
            description = topic.description,
            context = context,
            transitions = transitions,
        );
        self.generate_text(prompt, 4096).await
    }

    async fn conclusion(&self, paper: &Paper, topics: &[Topic]) -> PipelineResult<String> {
        let prompt = format!(
            "Write the conclusion (~{words} words) for the paper \"{title}\".\n\n\
             Topics analyzed: {names}\n\n\
             Requirements:\n\
             - Synthesize insights; do not restate the sections\n\
             - Address the author's craft with metaphor\n\
             - End with genuine insight, not summary\n\
             - Approximately {words} words",
            words = CONCLUSION_WORDS,
            title = paper.title,
            names = topic_names(topics),
        );
        self.generate_text(prompt, 2048).await
    }

    /// Built from the store alone; no model call.
    fn index(&self) -> PipelineResult<String> {
        let lines: Vec<String> = self
            .store
            .selected_metaphors_by_quote()?
            .iter()
            .map(|m| {
                format!(
                    "\"{}\" — Chapter {}: {}",
                    m.exact_quote,
                    m.chapter_id,
                    truncate_chars(&m.meaning, INDEX_MEANING_CHARS)
                )
            })
            .collect();
        Ok(format!("## Index of Metaphors\n\n{}", lines.join("\n\n")))
    }
}

fn topic_names(topics: &[Topic]) -> String {
    topics.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{word_count, Chapter, NewMetaphor, TopicDraft};
    use crate::gateway::ScriptedGateway;
    use crate::storage::{OpenStore, SqliteStore};
    use futures::StreamExt;

    #[test]
    fn body_budget_front_loads_early_topics() {
        assert_eq!(body_target_words(2), 850);
        assert_eq!(body_target_words(3), 566);
        assert_eq!(body_target_words(8), 212);
        assert_eq!(body_target_words(9), 200);
        assert_eq!(body_target_words(20), 200);
    }

    #[test]
    fn conclusion_stays_after_every_body_section() {
        assert_eq!(Step::Conclusion.sort_order(3), 99);
        assert_eq!(Step::Index.sort_order(3), 100);
        assert_eq!(Step::Body(99).sort_order(100), 101);
        assert_eq!(Step::Conclusion.sort_order(100), 102);
    }

    fn organized_store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_chapters(&[Chapter::new(1, "I", "text")]).unwrap();
        let metaphor = |quote: &str| NewMetaphor {
            exact_quote: quote.to_string(),
            explanation: "e".to_string(),
            meaning: "a meaning that is deliberately long enough to be cut off somewhere past the eightieth character"
                .to_string(),
            suggested_topic: "t".to_string(),
            confidence: 0.7,
        };
        let ids: Vec<i64> = store
            .commit_extraction(1, &[metaphor("green light"), metaphor("boats against the current")])
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        store
            .replace_topics(&[
                TopicDraft {
                    name: "Light".to_string(),
                    description: "Longing".to_string(),
                    subtopics: vec![],
                    metaphor_ids: vec![ids[0]],
                },
                TopicDraft {
                    name: "Water".to_string(),
                    description: "Time".to_string(),
                    subtopics: vec![],
                    metaphor_ids: vec![ids[1]],
                },
            ])
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn generate_writes_every_section_in_order() {
        let store = organized_store();
        let gateway = Arc::new(ScriptedGateway::new().with_fallback_text("five words of fixed text"));
        let writer = Writer::new(store.clone(), gateway.clone());

        let events: Vec<ProgressEvent> = writer.generate(PaperRequest::default()).unwrap().collect().await;
        let labels: Vec<(ProgressStatus, Option<&str>)> =
            events.iter().map(|e| (e.status, e.section.as_deref())).collect();
        assert_eq!(labels.len(), 13);
        assert_eq!(labels[0], (ProgressStatus::Generating, Some("exec_summary")));
        assert_eq!(labels[5], (ProgressStatus::Complete, Some("Light")));
        assert_eq!(labels[11], (ProgressStatus::Complete, Some("index")));
        assert_eq!(labels[12], (ProgressStatus::Done, None));

        let paper_id = events[0].paper_id.unwrap();
        assert!(events[..12].iter().all(|e| e.paper_id == Some(paper_id)));
        assert_eq!(store.get_paper(paper_id).unwrap().unwrap().status, PaperStatus::Complete);

        let sections = store.list_sections(paper_id).unwrap();
        let orders: Vec<i64> = sections.iter().map(|s| s.sort_order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 99, 100]);
        assert!(sections.iter().all(|s| s.actual_words == word_count(&s.content_en) as i64));
        assert_eq!(sections[2].target_words, 850);
        assert_eq!(sections[3].target_words, 566);

        // five model calls: the index needs none
        assert_eq!(gateway.calls().len(), 5);
        let first_body = &gateway.calls()[2].prompt;
        assert!(first_body.contains("green light"));
        assert!(first_body.contains("toward \"Water\""));
        assert!(!first_body.contains("from the previous section"));
    }

    #[tokio::test]
    async fn index_lists_selected_metaphors_by_quote() {
        let store = organized_store();
        let writer = Writer::new(store, Arc::new(ScriptedGateway::new()));
        let index = writer.index().unwrap();

        let boats = index.find("\"boats against the current\"").unwrap();
        let green = index.find("\"green light\"").unwrap();
        assert!(boats < green);
        assert!(index.starts_with("## Index of Metaphors\n\n"));
        assert!(!index.contains("eightieth character"));
    }

    #[tokio::test]
    async fn failed_step_leaves_paper_generating() {
        let store = organized_store();
        let gateway = Arc::new(ScriptedGateway::new().with_text("summary").with_failure("overloaded"));
        let writer = Writer::new(store.clone(), gateway);

        let events: Vec<ProgressEvent> = writer.generate(PaperRequest::default()).unwrap().collect().await;
        let statuses: Vec<ProgressStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ProgressStatus::Generating,
                ProgressStatus::Complete,
                ProgressStatus::Generating,
                ProgressStatus::Failed,
                ProgressStatus::Done,
            ]
        );
        let paper_id = events[0].paper_id.unwrap();
        assert_eq!(store.get_paper(paper_id).unwrap().unwrap().status, PaperStatus::Generating);
        assert_eq!(store.list_sections(paper_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn generate_requires_topics() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let writer = Writer::new(store.clone(), Arc::new(ScriptedGateway::new()));
        assert!(matches!(
            writer.generate(PaperRequest::default()),
            Err(PipelineError::MissingPrerequisite(_))
        ));
        assert!(store.list_papers().unwrap().is_empty());
    }
}

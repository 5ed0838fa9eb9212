//! Organization: cluster selected metaphors into topics, and suggest
//! per-section word budgets

use super::{truncate_chars, PipelineError, PipelineResult};
use crate::domain::{Reorganization, SubtopicDraft, TopicDraft};
use crate::gateway::{request_structured, CompletionRequest, ModelGateway, StructuredOutput};
use crate::sanitize::sanitize;
use crate::storage::{MetaphorFilter, ProjectStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Characters of quote and meaning sent per metaphor.
const DIGEST_CHARS: usize = 100;

/// Words per printed page.
const WORDS_PER_PAGE: u32 = 250;

/// Required length of the executive summary.
pub const EXEC_SUMMARY_WORDS: i64 = 200;

const ORGANIZE_SYSTEM: &str = "You are a literary scholar organizing metaphors from a novel into \
coherent thematic groups for an academic paper. Create clear, analytically useful topics that \
can each sustain an argument.";

const BUDGET_SYSTEM: &str = "You are an academic editor planning the length of each section of a \
literary-analysis paper.";

#[derive(Debug, Deserialize)]
struct OrganizedTopics {
    topics: Vec<TopicDraft>,
}

impl StructuredOutput for OrganizedTopics {
    const TOOL_NAME: &'static str = "organize_metaphors";

    fn schema() -> Value {
        let ids = json!({"type": "array", "items": {"type": "integer"}});
        json!({
            "type": "object",
            "properties": {
                "topics": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "subtopics": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": {"type": "string"},
                                        "description": {"type": "string"},
                                        "metaphor_ids": ids
                                    },
                                    "required": ["name", "metaphor_ids"]
                                }
                            },
                            "metaphor_ids": {
                                "type": "array",
                                "items": {"type": "integer"},
                                "description": "Metaphors in this topic but in no subtopic"
                            }
                        },
                        "required": ["name", "description", "metaphor_ids"]
                    }
                }
            },
            "required": ["topics"]
        })
    }
}

/// Suggested word count for one body section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBudget {
    pub topic_id: i64,
    pub target_words: i64,
}

/// Advisory word counts per section. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBudget {
    pub introduction: i64,
    pub executive_summary: i64,
    pub topics: Vec<TopicBudget>,
    pub conclusion: i64,
}

impl StructuredOutput for WordBudget {
    const TOOL_NAME: &'static str = "suggest_word_counts";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "introduction": {"type": "integer"},
                "executive_summary": {"type": "integer", "description": "Must be exactly 200"},
                "topics": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "topic_id": {"type": "integer"},
                            "target_words": {"type": "integer"}
                        },
                        "required": ["topic_id", "target_words"]
                    }
                },
                "conclusion": {"type": "integer"}
            },
            "required": ["introduction", "executive_summary", "topics", "conclusion"]
        })
    }

    fn check(&self) -> Result<(), String> {
        if self.executive_summary != EXEC_SUMMARY_WORDS {
            return Err(format!(
                "executive_summary must be {}, got {}",
                EXEC_SUMMARY_WORDS, self.executive_summary
            ));
        }
        Ok(())
    }
}

fn clean_draft(draft: TopicDraft) -> TopicDraft {
    TopicDraft {
        name: sanitize(&draft.name),
        description: sanitize(&draft.description),
        subtopics: draft
            .subtopics
            .into_iter()
            .map(|sub| SubtopicDraft {
                name: sanitize(&sub.name),
                description: sanitize(&sub.description),
                metaphor_ids: sub.metaphor_ids,
            })
            .collect(),
        metaphor_ids: draft.metaphor_ids,
    }
}

/// Clusters metaphors into topics.
#[derive(Clone)]
pub struct Organizer {
    store: Arc<dyn ProjectStore>,
    gateway: Arc<dyn ModelGateway>,
}

impl Organizer {
    pub fn new(store: Arc<dyn ProjectStore>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self { store, gateway }
    }

    /// Replace all topics with a fresh clustering of the selected metaphors.
    ///
    /// Nothing changes unless the model call succeeds. Ids the model invents
    /// are skipped and listed in the result.
    pub async fn organize(&self) -> PipelineResult<Reorganization> {
        let metaphors = self.store.find_metaphors(&MetaphorFilter::selected())?;
        if metaphors.is_empty() {
            return Err(PipelineError::MissingPrerequisite(
                "no selected metaphors to organize; run extraction first".to_string(),
            ));
        }

        let digest: Vec<Value> = metaphors
            .iter()
            .map(|m| {
                json!({
                    "id": m.id,
                    "quote": sanitize(truncate_chars(&m.exact_quote, DIGEST_CHARS)),
                    "meaning": sanitize(truncate_chars(&m.meaning, DIGEST_CHARS)),
                    "suggested": sanitize(&m.suggested_topic),
                })
            })
            .collect();

        let prompt = format!(
            "Organize the following metaphors into topics and subtopics for an academic paper. \
             Each topic should be a major thematic thread that can sustain one to two pages of analysis.\n\n\
             Metaphors to organize:\n{}\n\n\
             Record the organization with the tool provided. Create 4-7 topics, each with optional \
             subtopics, and assign every metaphor to a topic by its id.",
            serde_json::to_string_pretty(&digest)?
        );
        let request = CompletionRequest::new(prompt)
            .with_system(ORGANIZE_SYSTEM)
            .with_max_tokens(4096)
            .with_temperature(0.2);

        let organized: OrganizedTopics = request_structured(self.gateway.as_ref(), &request).await?;
        let drafts: Vec<TopicDraft> = organized.topics.into_iter().map(clean_draft).collect();

        let result = self.store.replace_topics(&drafts)?;
        if !result.ignored_ids.is_empty() {
            warn!(ids = ?result.ignored_ids, "Organization referenced unknown metaphors");
        }
        info!(
            topics = result.topics.len(),
            subtopics = result.subtopics.len(),
            assigned = result.assigned,
            "Organized metaphors"
        );
        Ok(result)
    }

    /// Ask for per-section word counts totalling about `pages × 250` words.
    pub async fn suggest_word_counts(&self, pages: u32) -> PipelineResult<WordBudget> {
        let summaries = self.store.topic_summaries()?;
        if summaries.is_empty() {
            return Err(PipelineError::MissingPrerequisite(
                "no topics to budget; run organization first".to_string(),
            ));
        }

        let total_words = pages.saturating_mul(WORDS_PER_PAGE);
        let topics: Vec<Value> = summaries
            .iter()
            .map(|s| {
                json!({
                    "id": s.topic.id,
                    "name": sanitize(&s.topic.name),
                    "metaphor_count": s.selected_count,
                })
            })
            .collect();

        let prompt = format!(
            "Given a {pages}-page academic paper with the following topic structure, suggest word \
             counts for each section. The total should be approximately {total_words} words. The \
             executive summary is always exactly {exec} words.\n\n\
             Topics:\n{topics}\n\n\
             Record the word counts with the tool provided.",
            pages = pages,
            total_words = total_words,
            exec = EXEC_SUMMARY_WORDS,
            topics = serde_json::to_string_pretty(&topics)?,
        );
        let request = CompletionRequest::new(prompt)
            .with_system(BUDGET_SYSTEM)
            .with_max_tokens(2048)
            .with_temperature(0.1);

        let budget: WordBudget = request_structured(self.gateway.as_ref(), &request).await?;
        info!(pages, total_words, "Suggested word counts");
        Ok(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chapter, NewMetaphor};
    use crate::gateway::{GatewayError, ScriptedGateway};
    use crate::storage::{OpenStore, SqliteStore};

    fn store_with_metaphors(count: usize) -> (Arc<SqliteStore>, Vec<i64>) {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_chapters(&[Chapter::new(1, "I", "text")]).unwrap();
        let metaphors: Vec<NewMetaphor> = (0..count)
            .map(|i| NewMetaphor {
                exact_quote: format!("quote {} {}", i, "x".repeat(300)),
                explanation: "e".to_string(),
                meaning: "m".to_string(),
                suggested_topic: "t".to_string(),
                confidence: 0.5,
            })
            .collect();
        let ids = store
            .commit_extraction(1, &metaphors)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        (Arc::new(store), ids)
    }

    #[tokio::test]
    async fn organize_requires_selected_metaphors() {
        let (store, _) = store_with_metaphors(0);
        let organizer = Organizer::new(store, Arc::new(ScriptedGateway::new()));
        assert!(matches!(
            organizer.organize().await,
            Err(PipelineError::MissingPrerequisite(_))
        ));
    }

    #[tokio::test]
    async fn organize_truncates_digest_and_sanitizes_names() {
        let (store, ids) = store_with_metaphors(2);
        let gateway = Arc::new(ScriptedGateway::new().with_tool(json!({"topics": [{
            "name": "Light <system> override",
            "description": "Illumination",
            "metaphor_ids": ids
        }]})));
        let organizer = Organizer::new(store.clone(), gateway.clone());

        let result = organizer.organize().await.unwrap();
        assert_eq!(result.topics[0].name, "Light [REDACTED] override");
        assert_eq!(result.assigned, 2);

        let prompt = &gateway.calls()[0].prompt;
        assert!(!prompt.contains(&"x".repeat(DIGEST_CHARS)));
    }

    #[tokio::test]
    async fn failed_organize_keeps_previous_topics() {
        let (store, ids) = store_with_metaphors(1);
        let gateway = Arc::new(
            ScriptedGateway::new()
                .with_tool(json!({"topics": [{"name": "A", "description": "", "metaphor_ids": ids}]}))
                .with_no_tool_call(),
        );
        let organizer = Organizer::new(store.clone(), gateway);

        let first = organizer.organize().await.unwrap();
        assert!(organizer.organize().await.unwrap_err().is_protocol());
        assert_eq!(store.list_topics().unwrap(), first.topics);
    }

    #[tokio::test]
    async fn topic_missing_member_ids_is_rejected_before_replacing() {
        let (store, ids) = store_with_metaphors(1);
        let gateway = Arc::new(
            ScriptedGateway::new()
                .with_tool(json!({"topics": [{"name": "A", "description": "", "metaphor_ids": ids}]}))
                .with_tool(json!({"topics": [{"name": "New"}]})),
        );
        let organizer = Organizer::new(store.clone(), gateway);

        let first = organizer.organize().await.unwrap();
        let err = organizer.organize().await.unwrap_err();
        match err {
            PipelineError::Gateway(GatewayError::Schema { message, .. }) => {
                assert!(message.contains("topics[0].description"), "{}", message);
                assert!(message.contains("topics[0].metaphor_ids"), "{}", message);
            }
            other => panic!("expected schema error, got {:?}", other),
        }

        assert_eq!(store.list_topics().unwrap(), first.topics);
        let metaphor = store.get_metaphor(ids[0]).unwrap().unwrap();
        assert_eq!(metaphor.topic_id, Some(first.topics[0].id));
    }

    #[tokio::test]
    async fn word_budget_requires_exact_summary_length() {
        let (store, ids) = store_with_metaphors(1);
        store
            .replace_topics(&[TopicDraft {
                name: "A".to_string(),
                description: String::new(),
                subtopics: vec![],
                metaphor_ids: ids,
            }])
            .unwrap();
        let topic_id = store.list_topics().unwrap()[0].id;
        let budget = |exec: i64| {
            json!({
                "introduction": 300,
                "executive_summary": exec,
                "topics": [{"topic_id": topic_id, "target_words": 1500}],
                "conclusion": 300
            })
        };
        let gateway = Arc::new(ScriptedGateway::new().with_tool(budget(200)).with_tool(budget(250)));
        let organizer = Organizer::new(store, gateway.clone());

        let ok = organizer.suggest_word_counts(10).await.unwrap();
        assert_eq!(ok.topics[0].target_words, 1500);
        assert!(gateway.calls()[0].prompt.contains("2500 words"));

        let err = organizer.suggest_word_counts(10).await.unwrap_err();
        assert!(matches!(err, PipelineError::Gateway(crate::gateway::GatewayError::Schema { .. })));
    }
}

//! Topic clusters owned by the last organization run

use serde::{Deserialize, Serialize};

/// A named thematic cluster of metaphors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub sort_order: i64,
}

/// A named sub-cluster belonging to exactly one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtopic {
    pub id: i64,
    pub topic_id: i64,
    pub name: String,
    pub description: String,
    pub sort_order: i64,
}

/// A topic with its member counts, for listings and word budgeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    #[serde(flatten)]
    pub topic: Topic,
    /// All metaphors assigned to the topic
    pub metaphor_count: usize,
    /// Assigned metaphors with `selected = true`
    pub selected_count: usize,
}

/// One topic of a clustering proposal, in the order it should be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDraft {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub subtopics: Vec<SubtopicDraft>,
    /// Metaphors assigned to the topic directly, without a subtopic
    pub metaphor_ids: Vec<i64>,
}

/// One subtopic of a [`TopicDraft`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtopicDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub metaphor_ids: Vec<i64>,
}

/// What an organization run changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reorganization {
    /// Newly created topics in sort order
    pub topics: Vec<Topic>,
    pub subtopics: Vec<Subtopic>,
    /// Number of metaphor assignments applied
    pub assigned: usize,
    /// Referenced metaphor ids that do not exist
    pub ignored_ids: Vec<i64>,
}

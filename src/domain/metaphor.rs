//! Metaphors extracted from chapters

use serde::{Deserialize, Serialize};

/// A figurative passage found in a chapter.
///
/// `subtopic_id` is only meaningful when `topic_id` is set and the
/// subtopic belongs to that topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metaphor {
    pub id: i64,
    pub chapter_id: i64,
    pub exact_quote: String,
    pub explanation: String,
    pub meaning: String,
    /// Free-text topic label proposed at extraction time
    pub suggested_topic: String,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    pub topic_id: Option<i64>,
    pub subtopic_id: Option<i64>,
    /// Included in organization, writing and the index unless deselected
    pub selected: bool,
    pub user_notes: Option<String>,
}

/// A metaphor as returned by extraction, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMetaphor {
    pub exact_quote: String,
    pub explanation: String,
    pub meaning: String,
    pub suggested_topic: String,
    pub confidence: f64,
}

/// A metaphor with its chapter label and topic name resolved, for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaphorView {
    #[serde(flatten)]
    pub metaphor: Metaphor,
    pub chapter_number: String,
    pub topic_name: Option<String>,
}

/// Topic placement for a metaphor. Both `None` clears the assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub topic_id: Option<i64>,
    pub subtopic_id: Option<i64>,
}

impl Assignment {
    pub fn topic(topic_id: i64) -> Self {
        Self {
            topic_id: Some(topic_id),
            subtopic_id: None,
        }
    }

    pub fn subtopic(topic_id: i64, subtopic_id: i64) -> Self {
        Self {
            topic_id: Some(topic_id),
            subtopic_id: Some(subtopic_id),
        }
    }

    pub fn cleared() -> Self {
        Self::default()
    }
}

/// Partial update of a metaphor. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaphorUpdate {
    pub explanation: Option<String>,
    pub meaning: Option<String>,
    pub selected: Option<bool>,
    pub user_notes: Option<String>,
    pub assignment: Option<Assignment>,
}

impl MetaphorUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_meaning(mut self, meaning: impl Into<String>) -> Self {
        self.meaning = Some(meaning.into());
        self
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = Some(selected);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.user_notes = Some(notes.into());
        self
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = Some(assignment);
        self
    }

    /// Apply `f` to every free-text field present in the update.
    pub fn map_text(mut self, f: impl Fn(&str) -> String) -> Self {
        self.explanation = self.explanation.as_deref().map(&f);
        self.meaning = self.meaning.as_deref().map(&f);
        self.user_notes = self.user_notes.as_deref().map(&f);
        self
    }
}

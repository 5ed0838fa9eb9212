//! Papers and their ordered sections

use super::ParseLabelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    Draft,
    Generating,
    Complete,
}

impl PaperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generating => "generating",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for PaperStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "generating" => Ok(Self::Generating),
            "complete" => Ok(Self::Complete),
            other => Err(ParseLabelError::new("paper status", other)),
        }
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role of a section within a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    ExecSummary,
    Introduction,
    Body,
    Conclusion,
    Index,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecSummary => "exec_summary",
            Self::Introduction => "introduction",
            Self::Body => "body",
            Self::Conclusion => "conclusion",
            Self::Index => "index",
        }
    }
}

impl FromStr for SectionKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exec_summary" => Ok(Self::ExecSummary),
            "introduction" => Ok(Self::Introduction),
            "body" => Ok(Self::Body),
            "conclusion" => Ok(Self::Conclusion),
            "index" => Ok(Self::Index),
            other => Err(ParseLabelError::new("section kind", other)),
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Languages a paper can be read in.
///
/// English is the source language; the others are translation targets,
/// each with its own text slot on [`PaperSection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    Zh,
}

impl Language {
    pub const TRANSLATION_TARGETS: [Language; 2] = [Language::Es, Language::Zh];

    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
            Self::Zh => "zh",
        }
    }

    /// Name used when instructing the model.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Es => "Spanish",
            Self::Zh => "Simplified Mandarin Chinese",
        }
    }

    pub fn is_translation_target(&self) -> bool {
        Self::TRANSLATION_TARGETS.contains(self)
    }
}

impl FromStr for Language {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "es" => Ok(Self::Es),
            "zh" => Ok(Self::Zh),
            other => Err(ParseLabelError::new("language", other)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub status: PaperStatus,
    pub target_pages: u32,
    pub created_at: DateTime<Utc>,
}

/// One section of a paper, with a text slot per language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSection {
    pub id: i64,
    pub paper_id: i64,
    pub kind: SectionKind,
    /// Analyzed topic; body sections only. May dangle after a re-organize.
    pub topic_id: Option<i64>,
    pub title: String,
    pub content_en: String,
    pub content_es: String,
    pub content_zh: String,
    pub target_words: i64,
    pub actual_words: i64,
    pub sort_order: i64,
}

impl PaperSection {
    /// The text slot for `language` (possibly empty).
    pub fn content(&self, language: Language) -> &str {
        match language {
            Language::En => &self.content_en,
            Language::Es => &self.content_es,
            Language::Zh => &self.content_zh,
        }
    }
}

/// A section produced by the writer, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSection {
    pub kind: SectionKind,
    pub topic_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub target_words: i64,
    pub sort_order: i64,
}

/// A paper with its sections in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperWithSections {
    #[serde(flatten)]
    pub paper: Paper,
    pub sections: Vec<PaperSection>,
}

//! Metaphorizer: a staged pipeline that turns a public-domain novel into a
//! literary-analysis paper about its metaphors
//!
//! # Stages
//!
//! - **Segment**: raw ebook text → chapters
//! - **Extract**: chapter → metaphors, via one structured model call
//! - **Organize**: selected metaphors → topics and subtopics
//! - **Write**: topics → ordered paper sections
//! - **Translate**: sections → Spanish or Simplified Chinese text
//!
//! Every stage reads what an earlier stage persisted and writes back through
//! a [`ProjectStore`]. Model access goes through the [`ModelGateway`] trait,
//! so tests can swap in a [`ScriptedGateway`].
//!
//! # Example
//!
//! ```
//! use metaphorizer::{Metaphorizer, OpenStore, ScriptedGateway, SqliteStore};
//! use std::sync::Arc;
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let api = Metaphorizer::new(Arc::new(store), Arc::new(ScriptedGateway::new()));
//! assert!(api.chapters().unwrap().is_empty());
//! ```

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod render;
pub mod sanitize;
pub mod segment;
pub mod stage;
pub mod storage;

pub use api::Metaphorizer;
pub use config::{ConfigError, Settings};
pub use domain::{
    Assignment, Chapter, ExtractionStats, Language, Metaphor, MetaphorUpdate, MetaphorView, Paper,
    PaperSection, PaperStatus, PaperWithSections, Reorganization, SectionKind, Subtopic, Topic, TopicSummary,
};
pub use gateway::{AnthropicGateway, GatewayError, ModelGateway, ScriptedGateway, ScriptedReply};
pub use render::{HtmlRenderer, RenderDocument, RenderError, Renderer};
pub use segment::SegmentError;
pub use stage::{PaperRequest, PipelineError, PipelineResult, ProgressEvent, ProgressStatus, ProgressStream, WordBudget};
pub use storage::{MetaphorFilter, OpenStore, ProjectStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

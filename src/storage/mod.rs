//! Storage backends for the project state
//!
//! Every pipeline step persists through the `ProjectStore` trait; each
//! multi-row step is one transaction. The primary implementation is
//! `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{MetaphorFilter, OpenStore, ProjectStore, StorageError, StorageResult};

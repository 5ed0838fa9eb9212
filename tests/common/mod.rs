//! Shared fixtures for pipeline integration tests
//!
//! A two-chapter fixture book, reply builders for the scripted gateway, and
//! a facade wired to an in-memory store.

#![allow(dead_code)]

use futures::StreamExt;
use metaphorizer::{Metaphorizer, OpenStore, ProgressEvent, ProgressStream, ScriptedGateway, SqliteStore};
use serde_json::{json, Value};
use std::sync::Arc;

/// Two chapters between distributor boilerplate, headers indented 30 spaces.
pub fn fixture_book() -> String {
    let indent = " ".repeat(30);
    format!(
        "The Project Gutenberg eBook of a Sample Novel\r\n\
         *** START OF THE PROJECT GUTENBERG EBOOK SAMPLE NOVEL ***\r\n\
         \r\n{indent}I\r\n\r\n\
         In my younger and more vulnerable years the lawn started at the beach and ran \
         toward the front door for a quarter of a mile.\r\n\
         \r\n{indent}II\r\n\r\n\
         This is a valley of ashes, a fantastic farm where ashes grow like wheat. Her voice \
         was full of money.\r\n\
         \r\n*** END OF THE PROJECT GUTENBERG EBOOK SAMPLE NOVEL ***\r\n\
         License text follows.\r\n",
        indent = indent
    )
}

/// A `record_metaphors` reply with one entry per quote.
pub fn metaphors_reply(quotes: &[&str]) -> Value {
    let items: Vec<Value> = quotes
        .iter()
        .enumerate()
        .map(|(i, quote)| {
            json!({
                "exact_quote": quote,
                "explanation": "figurative comparison",
                "meaning": format!("meaning of passage {}", i + 1),
                "confidence": 0.8,
                "suggested_topic": "wealth"
            })
        })
        .collect();
    json!({ "metaphors": items })
}

/// An `organize_metaphors` topic with direct members.
pub fn topic(name: &str, metaphor_ids: &[i64]) -> Value {
    json!({
        "name": name,
        "description": format!("The {} system", name.to_lowercase()),
        "metaphor_ids": metaphor_ids
    })
}

/// Like [`topic`], with one subtopic holding `sub_ids`.
pub fn topic_with_subtopic(name: &str, metaphor_ids: &[i64], subtopic: &str, sub_ids: &[i64]) -> Value {
    let mut value = topic(name, metaphor_ids);
    value["subtopics"] = json!([{
        "name": subtopic,
        "description": "",
        "metaphor_ids": sub_ids
    }]);
    value
}

/// Facade over a fresh in-memory store, keeping a handle on the gateway
/// for call inspection.
pub fn api_with(gateway: ScriptedGateway) -> (Metaphorizer, Arc<ScriptedGateway>) {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    let gateway = Arc::new(gateway);
    (Metaphorizer::new(Arc::new(store), gateway.clone()), gateway)
}

/// Drain a progress stream.
pub async fn collect(stream: ProgressStream) -> Vec<ProgressEvent> {
    stream.collect().await
}

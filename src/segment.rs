//! Text segmenter: splits the source book into numbered chapters
//!
//! The source is a plain-text ebook wrapped in distributor boilerplate.
//! Chapter headers are Roman numerals on their own line, indented by at
//! least 20 spaces.

use crate::domain::Chapter;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Markers that open the book body; the first one present wins.
pub const START_MARKERS: &[&str] = &["*** START OF THE PROJECT GUTENBERG EBOOK", "***START OF"];

/// Markers that close the book body; the first one present wins.
pub const END_MARKERS: &[&str] = &["*** END OF THE PROJECT GUTENBERG EBOOK", "***END OF"];

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("no chapters found in source text")]
    NoChapters,

    #[error("failed to fetch source text: {0}")]
    Fetch(#[from] reqwest::Error),
}

fn header_pattern() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"(?m)^ {20,}(I{1,3}|IV|VI{0,3}|IX)[ \t]*$").expect("chapter header pattern must compile")
    })
}

fn roman_value(numeral: &str) -> Option<i64> {
    match numeral {
        "I" => Some(1),
        "II" => Some(2),
        "III" => Some(3),
        "IV" => Some(4),
        "V" => Some(5),
        "VI" => Some(6),
        "VII" => Some(7),
        "VIII" => Some(8),
        "IX" => Some(9),
        _ => None,
    }
}

/// Unify `\r\n` and bare `\r` line endings to `\n`.
pub fn normalize_line_endings(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// The text between the start and end boilerplate markers.
///
/// Missing markers leave the corresponding side untouched.
pub fn strip_boilerplate(text: &str) -> &str {
    let mut body = text;
    if let Some((_, after)) = START_MARKERS
        .iter()
        .find_map(|marker| body.split_once(*marker))
    {
        body = after;
    }
    if let Some((before, _)) = END_MARKERS
        .iter()
        .find_map(|marker| body.rsplit_once(*marker))
    {
        body = before;
    }
    body
}

/// Split normalized book text into chapters.
///
/// A header is accepted only if its numeral is known and the text up to the
/// next header is non-empty after trimming. Returns an empty list when no
/// header qualifies; see [`segment`] for the failing variant.
pub fn parse_chapters(text: &str) -> Vec<Chapter> {
    let body = strip_boilerplate(text);
    let headers: Vec<(usize, usize, &str)> = header_pattern()
        .captures_iter(body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let numeral = caps.get(1)?;
            Some((whole.start(), whole.end(), numeral.as_str()))
        })
        .collect();

    let mut seen = HashSet::new();
    let mut chapters = Vec::new();
    for (i, (_, body_start, numeral)) in headers.iter().enumerate() {
        let body_end = headers.get(i + 1).map(|h| h.0).unwrap_or(body.len());
        let chapter_text = body[*body_start..body_end].trim();
        let Some(id) = roman_value(numeral) else {
            continue;
        };
        if chapter_text.is_empty() {
            debug!(numeral, "skipping chapter header with no body");
            continue;
        }
        if !seen.insert(id) {
            debug!(numeral, "skipping repeated chapter header");
            continue;
        }
        chapters.push(Chapter::new(id, *numeral, chapter_text));
    }
    chapters
}

/// Like [`parse_chapters`], but finding nothing is an ingestion failure.
pub fn segment(text: &str) -> Result<Vec<Chapter>, SegmentError> {
    let chapters = parse_chapters(&normalize_line_endings(text));
    if chapters.is_empty() {
        return Err(SegmentError::NoChapters);
    }
    info!(count = chapters.len(), "segmented source text");
    Ok(chapters)
}

/// Download the source book and normalize its line endings.
pub async fn fetch_source(url: &str) -> Result<String, SegmentError> {
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    let raw = response.text().await?;
    info!(url, bytes = raw.len(), "fetched source text");
    Ok(normalize_line_endings(&raw))
}

//! Chapters produced by the segmenter

use serde::{Deserialize, Serialize};

/// Count whitespace-separated tokens.
///
/// Used for chapter word counts and for the `actual_words` of every
/// generated paper section.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// One chapter of the source book.
///
/// The id equals the integer value of the chapter's Roman numeral, so
/// chapter "I" is always id 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    /// Ordinal label as printed in the book ("I", "II", ...)
    pub number: String,
    pub title: String,
    pub text: String,
    pub word_count: usize,
    /// Set by a successful extraction run; never reset
    pub processed: bool,
}

impl Chapter {
    pub fn new(id: i64, number: impl Into<String>, text: impl Into<String>) -> Self {
        let number = number.into();
        let text = text.into();
        Self {
            id,
            title: format!("Chapter {}", number),
            word_count: word_count(&text),
            number,
            text,
            processed: false,
        }
    }
}

/// Extraction progress across the whole book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_chapters: usize,
    pub processed_chapters: usize,
    pub total_metaphors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_splits_on_any_whitespace() {
        assert_eq!(word_count("  one\ttwo\n\nthree  "), 3);
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count(" \n\t "), 0);
    }

    #[test]
    fn new_chapter_derives_title_and_count() {
        let chapter = Chapter::new(4, "IV", "In my younger and more vulnerable years");
        assert_eq!(chapter.title, "Chapter IV");
        assert_eq!(chapter.word_count, 7);
        assert!(!chapter.processed);
    }
}

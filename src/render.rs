//! Document rendering
//!
//! A paper is flattened into a [`RenderDocument`] for one language and
//! handed to a [`Renderer`], which returns the finished bytes.

use crate::domain::{Language, PaperWithSections, SectionKind};
use pulldown_cmark::{html, Event, Options, Parser};
use std::fmt::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Formatting failed: {0}")]
    Format(#[from] std::fmt::Error),
}

/// One section as it appears in the rendered document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSection {
    pub kind: SectionKind,
    pub title: String,
    /// Markdown
    pub content: String,
}

/// Everything a renderer needs: title, author, language and ordered sections.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderDocument {
    pub title: String,
    pub author: String,
    pub language: Language,
    pub sections: Vec<RenderSection>,
}

impl RenderDocument {
    /// Take each section's text in `language`, falling back to English when
    /// that slot is empty. Sections with no text at all are left out.
    pub fn from_paper(paper: &PaperWithSections, language: Language) -> Self {
        let sections = paper
            .sections
            .iter()
            .filter_map(|section| {
                let translated = section.content(language);
                let content = if translated.trim().is_empty() {
                    section.content(Language::En)
                } else {
                    translated
                };
                (!content.trim().is_empty()).then(|| RenderSection {
                    kind: section.kind,
                    title: section.title.clone(),
                    content: content.to_string(),
                })
            })
            .collect();

        Self {
            title: paper.paper.title.clone(),
            author: paper.paper.author.clone(),
            language,
            sections,
        }
    }
}

/// Turns a document into a byte stream.
pub trait Renderer: Send + Sync {
    fn render(&self, document: &RenderDocument) -> Result<Vec<u8>, RenderError>;

    /// MIME type of the output.
    fn content_type(&self) -> &'static str;
}

/// CSS font stack for a language.
pub fn font_family(language: Language) -> &'static str {
    match language {
        Language::En | Language::Es => "\"Liberation Serif\", \"Times New Roman\", serif",
        Language::Zh => "\"Noto Serif CJK SC\", \"SimSun\", serif",
    }
}

/// Standalone HTML page, print-ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    /// Raw HTML in the source is emitted as escaped text.
    fn markdown_to_html(markdown: &str) -> String {
        let options = Options::ENABLE_TABLES | Options::ENABLE_FOOTNOTES;
        let parser = Parser::new_ext(markdown, options).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
        let mut out = String::new();
        html::push_html(&mut out, parser);
        out
    }
}

impl Renderer for HtmlRenderer {
    fn render(&self, document: &RenderDocument) -> Result<Vec<u8>, RenderError> {
        let mut out = String::new();
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html lang=\"{}\">", document.language.code())?;
        writeln!(out, "<head>")?;
        writeln!(out, "<meta charset=\"utf-8\">")?;
        writeln!(out, "<title>{}</title>", escape_html(&document.title))?;
        writeln!(
            out,
            "<style>body {{ font-family: {}; line-height: 1.6; max-width: 42em; margin: 2em auto; }}</style>",
            font_family(document.language)
        )?;
        writeln!(out, "</head>")?;
        writeln!(out, "<body>")?;
        writeln!(out, "<header>")?;
        writeln!(out, "<h1>{}</h1>", escape_html(&document.title))?;
        if !document.author.trim().is_empty() {
            writeln!(out, "<p class=\"author\">{}</p>", escape_html(&document.author))?;
        }
        writeln!(out, "</header>")?;

        for section in &document.sections {
            writeln!(out, "<section class=\"{}\">", section.kind)?;
            // The index carries its own heading
            if !section.content.trim_start().starts_with('#') {
                writeln!(out, "<h2>{}</h2>", escape_html(&section.title))?;
            }
            out.push_str(&Self::markdown_to_html(&section.content));
            writeln!(out, "</section>")?;
        }

        writeln!(out, "</body>")?;
        writeln!(out, "</html>")?;
        Ok(out.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

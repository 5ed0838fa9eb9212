//! Metaphorizer CLI: drive the analysis pipeline from the shell.
//!
//! Usage:
//!   metaphorizer ingest [--file path | --url url]
//!   metaphorizer extract-all
//!   metaphorizer organize
//!   metaphorizer write --title "..." --author "..."
//!   metaphorizer translate <paper> <lang>
//!   metaphorizer render <paper> --lang es --out paper.html
//!
//! Progress-producing commands print one JSON event per line on stdout.
//! Logs go to stderr.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use metaphorizer::stage::DEFAULT_TITLE;
use metaphorizer::{
    AnthropicGateway, HtmlRenderer, Language, MetaphorFilter, Metaphorizer, OpenStore, PaperRequest,
    ProgressStatus, ProgressStream, Renderer, Settings, SqliteStore,
};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "metaphorizer",
    version,
    about = "Turn a novel into a literary analysis of its metaphors"
)]
struct Cli {
    /// Settings file (YAML)
    #[arg(long, global = true, env = "METAPHORIZER_CONFIG")]
    config: Option<PathBuf>,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split the source book into chapters (no-op if already ingested)
    Ingest {
        /// Read the book from a local file
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,
        /// Download the book from this URL instead of the configured source
        #[arg(long)]
        url: Option<String>,
    },
    /// Show extraction progress
    Stats,
    /// Extract metaphors from one chapter
    Extract {
        /// Chapter number (1 for chapter I)
        chapter: i64,
    },
    /// Extract metaphors from every unprocessed chapter
    ExtractAll,
    /// List metaphors
    Metaphors {
        #[arg(long)]
        chapter: Option<i64>,
        #[arg(long)]
        topic: Option<i64>,
        #[arg(long)]
        selected: Option<bool>,
        #[arg(long)]
        min_confidence: Option<f64>,
    },
    /// Flip a metaphor's selection
    Toggle { id: i64 },
    /// Cluster selected metaphors into topics, replacing existing topics
    Organize,
    /// List topics with metaphor counts
    Topics,
    /// Suggest per-section word counts
    SuggestWords {
        #[arg(long, default_value_t = 10)]
        pages: u32,
    },
    /// Generate a paper from the current topics
    Write {
        #[arg(long, default_value = DEFAULT_TITLE)]
        title: String,
        #[arg(long, default_value = "")]
        author: String,
        #[arg(long, default_value_t = 10)]
        pages: u32,
    },
    /// Show a paper with its sections
    Paper { id: i64 },
    /// List papers, newest first
    Papers,
    /// Translate a paper (es or zh)
    Translate { paper: i64, lang: Language },
    /// Render a paper to HTML
    Render {
        paper: i64,
        #[arg(long, default_value = "en")]
        lang: Language,
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(config: Option<&Path>, db: Option<PathBuf>) -> Result<Settings, String> {
    let mut settings = Settings::load(config).map_err(|e| format!("Failed to load settings: {}", e))?;
    if let Some(db) = db {
        settings.database = db;
    }
    Ok(settings)
}

fn open_api(settings: &Settings) -> Result<Metaphorizer, String> {
    let store = SqliteStore::open(&settings.database).map_err(|e| format!("Failed to open database: {}", e))?;
    let gateway =
        AnthropicGateway::from_settings(settings).map_err(|e| format!("Failed to create model client: {}", e))?;
    Ok(Metaphorizer::new(Arc::new(store), Arc::new(gateway)))
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn not_found(entity: &str, id: i64) -> i32 {
    println!("{}", json!({"error": format!("{} not found", entity), "id": id}));
    0
}

fn report<T>(result: Result<T, impl std::fmt::Display>, on_ok: impl FnOnce(T) -> i32) -> i32 {
    match result {
        Ok(value) => on_ok(value),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// Print each event as a JSON line. Exits 1 if any item failed.
async fn drain(mut stream: ProgressStream) -> i32 {
    let mut code = 0;
    while let Some(event) = stream.next().await {
        if event.status == ProgressStatus::Failed {
            code = 1;
        }
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    code
}

async fn cmd_ingest(api: &Metaphorizer, settings: &Settings, file: Option<PathBuf>, url: Option<String>) -> i32 {
    let result = match file {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(text) => api.ingest_text(&text),
            Err(e) => {
                eprintln!("Error: failed to read {}: {}", path.display(), e);
                return 1;
            }
        },
        None => api.ingest_from(url.as_deref().unwrap_or(&settings.source_url)).await,
    };
    report(result, |chapters| {
        let summary: Vec<_> = chapters
            .iter()
            .map(|c| json!({"id": c.id, "title": c.title, "word_count": c.word_count, "processed": c.processed}))
            .collect();
        print_json(&json!({"chapters": summary}))
    })
}

async fn cmd_extract(api: &Metaphorizer, chapter: i64) -> i32 {
    match api.extract_chapter(chapter).await {
        Ok(Some(metaphors)) => print_json(&json!({"chapter": chapter, "count": metaphors.len()})),
        Ok(None) => not_found("chapter", chapter),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_extract_all(api: &Metaphorizer) -> i32 {
    match api.extract_all() {
        Ok(stream) => drain(stream).await,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_toggle(api: &Metaphorizer, id: i64) -> i32 {
    match api.toggle_metaphor(id) {
        Ok(Some(selected)) => print_json(&json!({"id": id, "selected": selected})),
        Ok(None) => not_found("metaphor", id),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_write(api: &Metaphorizer, request: PaperRequest) -> i32 {
    match api.generate_paper(request) {
        Ok(stream) => drain(stream).await,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_paper(api: &Metaphorizer, id: i64) -> i32 {
    match api.paper(id) {
        Ok(Some(paper)) => print_json(&paper),
        Ok(None) => not_found("paper", id),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_translate(api: &Metaphorizer, paper: i64, lang: Language) -> i32 {
    match api.translate_paper(paper, lang) {
        Ok(Some(stream)) => drain(stream).await,
        Ok(None) => not_found("paper", paper),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_render(api: &Metaphorizer, paper: i64, lang: Language, out: &Path) -> i32 {
    let renderer = HtmlRenderer;
    match api.render_paper(paper, lang, &renderer) {
        Ok(Some(bytes)) => match std::fs::write(out, &bytes) {
            Ok(()) => {
                eprintln!("Wrote {} ({}, {} bytes)", out.display(), renderer.content_type(), bytes.len());
                0
            }
            Err(e) => {
                eprintln!("Error: failed to write {}: {}", out.display(), e);
                1
            }
        },
        Ok(None) => not_found("paper", paper),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref(), cli.db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let api = match open_api(&settings) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Ingest { file, url } => cmd_ingest(&api, &settings, file, url).await,
        Commands::Stats => report(api.extraction_stats(), |stats| print_json(&stats)),
        Commands::Extract { chapter } => cmd_extract(&api, chapter).await,
        Commands::ExtractAll => cmd_extract_all(&api).await,
        Commands::Metaphors {
            chapter,
            topic,
            selected,
            min_confidence,
        } => {
            let filter = MetaphorFilter {
                chapter_id: chapter,
                topic_id: topic,
                selected,
                min_confidence,
            };
            report(api.metaphors(&filter), |metaphors| print_json(&metaphors))
        }
        Commands::Toggle { id } => cmd_toggle(&api, id),
        Commands::Organize => report(api.organize().await, |result| print_json(&result)),
        Commands::Topics => report(api.topics(), |topics| print_json(&topics)),
        Commands::SuggestWords { pages } => report(api.suggest_word_counts(pages).await, |budget| print_json(&budget)),
        Commands::Write { title, author, pages } => {
            let request = PaperRequest {
                title,
                author,
                target_pages: pages,
            };
            cmd_write(&api, request).await
        }
        Commands::Paper { id } => cmd_paper(&api, id),
        Commands::Papers => report(api.papers(), |papers| print_json(&papers)),
        Commands::Translate { paper, lang } => cmd_translate(&api, paper, lang).await,
        Commands::Render { paper, lang, out } => cmd_render(&api, paper, lang, &out),
    };
    std::process::exit(code);
}

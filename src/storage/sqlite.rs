//! SQLite storage backend for the project state

use super::traits::{MetaphorFilter, OpenStore, ProjectStore, StorageError, StorageResult};
use crate::domain::{
    word_count, Assignment, Chapter, ExtractionStats, Language, Metaphor, MetaphorUpdate, MetaphorView,
    NewMetaphor, NewSection, Paper, PaperSection, PaperStatus, Reorganization, Subtopic, Topic, TopicDraft,
    TopicSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const METAPHOR_COLUMNS: &str = "m.id, m.chapter_id, m.exact_quote, m.explanation, m.meaning, \
     m.suggested_topic, m.confidence, m.topic_id, m.subtopic_id, m.selected, m.user_notes";

const SECTION_COLUMNS: &str = "id, paper_id, kind, topic_id, title, content_en, content_es, content_zh, \
     target_words, actual_words, sort_order";

type PaperRow = (i64, String, String, String, u32, String);

#[allow(clippy::type_complexity)]
type SectionRow = (i64, i64, String, Option<i64>, String, String, String, String, i64, i64, i64);

/// SQLite-backed project store
///
/// Uses a single SQLite database file with one table per entity.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Enable WAL mode so listings can read while a stage writes
            PRAGMA journal_mode = WAL;

            -- Chapter ids are the integer value of the chapter numeral
            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY,
                number TEXT NOT NULL,
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            );

            -- AUTOINCREMENT keeps ids of deleted topics from being reused
            CREATE TABLE IF NOT EXISTS topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                sort_order INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subtopics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                sort_order INTEGER NOT NULL,
                FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS metaphors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chapter_id INTEGER NOT NULL,
                exact_quote TEXT NOT NULL,
                explanation TEXT NOT NULL,
                meaning TEXT NOT NULL,
                suggested_topic TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                topic_id INTEGER,
                subtopic_id INTEGER,
                selected INTEGER NOT NULL DEFAULT 1,
                user_notes TEXT,
                FOREIGN KEY (chapter_id) REFERENCES chapters(id),
                FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE SET NULL,
                FOREIGN KEY (subtopic_id) REFERENCES subtopics(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_metaphors_chapter ON metaphors(chapter_id);
            CREATE INDEX IF NOT EXISTS idx_metaphors_topic ON metaphors(topic_id);

            CREATE TABLE IF NOT EXISTS papers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                status TEXT NOT NULL,
                target_pages INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            -- topic_id is informational; it may outlive the topic it names
            CREATE TABLE IF NOT EXISTS paper_sections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                paper_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                topic_id INTEGER,
                title TEXT NOT NULL,
                content_en TEXT NOT NULL DEFAULT '',
                content_es TEXT NOT NULL DEFAULT '',
                content_zh TEXT NOT NULL DEFAULT '',
                target_words INTEGER NOT NULL,
                actual_words INTEGER NOT NULL,
                sort_order INTEGER NOT NULL,
                FOREIGN KEY (paper_id) REFERENCES papers(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sections_paper ON paper_sections(paper_id, sort_order);
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn row_to_chapter(row: &Row<'_>) -> rusqlite::Result<Chapter> {
        Ok(Chapter {
            id: row.get(0)?,
            number: row.get(1)?,
            title: row.get(2)?,
            text: row.get(3)?,
            word_count: row.get::<_, i64>(4)? as usize,
            processed: row.get(5)?,
        })
    }

    /// Read a metaphor from the first columns of `row`, laid out as
    /// [`METAPHOR_COLUMNS`].
    fn row_to_metaphor(row: &Row<'_>) -> rusqlite::Result<Metaphor> {
        Ok(Metaphor {
            id: row.get(0)?,
            chapter_id: row.get(1)?,
            exact_quote: row.get(2)?,
            explanation: row.get(3)?,
            meaning: row.get(4)?,
            suggested_topic: row.get(5)?,
            confidence: row.get(6)?,
            topic_id: row.get(7)?,
            subtopic_id: row.get(8)?,
            selected: row.get(9)?,
            user_notes: row.get(10)?,
        })
    }

    fn row_to_topic(row: &Row<'_>) -> rusqlite::Result<Topic> {
        Ok(Topic {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            sort_order: row.get(3)?,
        })
    }

    fn row_to_subtopic(row: &Row<'_>) -> rusqlite::Result<Subtopic> {
        Ok(Subtopic {
            id: row.get(0)?,
            topic_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            sort_order: row.get(4)?,
        })
    }

    fn read_paper_row(row: &Row<'_>) -> rusqlite::Result<PaperRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
    }

    /// Deserialize a paper from database columns
    fn row_to_paper((id, title, author, status, target_pages, created_at): PaperRow) -> StorageResult<Paper> {
        Ok(Paper {
            id,
            title,
            author,
            status: status.parse()?,
            target_pages,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StorageError::DateParse(e.to_string()))?
                .with_timezone(&Utc),
        })
    }

    fn read_section_row(row: &Row<'_>) -> rusqlite::Result<SectionRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
        ))
    }

    /// Deserialize a paper section from database columns
    fn row_to_section(row: SectionRow) -> StorageResult<PaperSection> {
        let (id, paper_id, kind, topic_id, title, content_en, content_es, content_zh, target_words, actual_words, sort_order) =
            row;
        Ok(PaperSection {
            id,
            paper_id,
            kind: kind.parse()?,
            topic_id,
            title,
            content_en,
            content_es,
            content_zh,
            target_words,
            actual_words,
            sort_order,
        })
    }

    fn load_metaphor(conn: &Connection, id: i64) -> StorageResult<Option<Metaphor>> {
        let sql = format!("SELECT {} FROM metaphors m WHERE m.id = ?1", METAPHOR_COLUMNS);
        Ok(conn.query_row(&sql, params![id], Self::row_to_metaphor).optional()?)
    }

    fn load_topic(conn: &Connection, id: i64) -> StorageResult<Option<Topic>> {
        Ok(conn
            .query_row(
                "SELECT id, name, description, sort_order FROM topics WHERE id = ?1",
                params![id],
                Self::row_to_topic,
            )
            .optional()?)
    }

    fn load_subtopic(conn: &Connection, id: i64) -> StorageResult<Option<Subtopic>> {
        Ok(conn
            .query_row(
                "SELECT id, topic_id, name, description, sort_order FROM subtopics WHERE id = ?1",
                params![id],
                Self::row_to_subtopic,
            )
            .optional()?)
    }

    /// Reject assignments that would break topic/subtopic consistency.
    fn check_assignment(conn: &Connection, assignment: &Assignment) -> StorageResult<()> {
        match (assignment.topic_id, assignment.subtopic_id) {
            (None, None) => Ok(()),
            (None, Some(subtopic_id)) => Err(StorageError::InvalidAssignment(format!(
                "subtopic {} given without a topic",
                subtopic_id
            ))),
            (Some(topic_id), subtopic_id) => {
                if Self::load_topic(conn, topic_id)?.is_none() {
                    return Err(StorageError::InvalidAssignment(format!("topic {} does not exist", topic_id)));
                }
                if let Some(subtopic_id) = subtopic_id {
                    match Self::load_subtopic(conn, subtopic_id)? {
                        Some(subtopic) if subtopic.topic_id == topic_id => {}
                        Some(subtopic) => {
                            return Err(StorageError::InvalidAssignment(format!(
                                "subtopic {} belongs to topic {}, not {}",
                                subtopic_id, subtopic.topic_id, topic_id
                            )))
                        }
                        None => {
                            return Err(StorageError::InvalidAssignment(format!(
                                "subtopic {} does not exist",
                                subtopic_id
                            )))
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Build the WHERE clause for a metaphor filter against alias `m`.
    fn filter_clause(filter: &MetaphorFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut sql = String::from(" WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(chapter_id) = filter.chapter_id {
            sql.push_str(" AND m.chapter_id = ?");
            params_vec.push(Box::new(chapter_id));
        }

        if let Some(topic_id) = filter.topic_id {
            sql.push_str(" AND m.topic_id = ?");
            params_vec.push(Box::new(topic_id));
        }

        if let Some(selected) = filter.selected {
            sql.push_str(" AND m.selected = ?");
            params_vec.push(Box::new(selected));
        }

        if let Some(confidence) = filter.min_confidence {
            sql.push_str(" AND m.confidence >= ?");
            params_vec.push(Box::new(confidence));
        }

        (sql, params_vec)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl ProjectStore for SqliteStore {
    // === Chapter Operations ===

    fn chapter_count(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chapters", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert_chapters(&self, chapters: &[Chapter]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chapters (id, number, title, text, word_count, processed) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chapter in chapters {
                stmt.execute(params![
                    chapter.id,
                    chapter.number,
                    chapter.title,
                    chapter.text,
                    chapter.word_count as i64,
                    chapter.processed,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_chapters(&self) -> StorageResult<Vec<Chapter>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, number, title, text, word_count, processed FROM chapters ORDER BY id")?;
        let chapters = stmt
            .query_map([], Self::row_to_chapter)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chapters)
    }

    fn get_chapter(&self, id: i64) -> StorageResult<Option<Chapter>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, number, title, text, word_count, processed FROM chapters WHERE id = ?1",
                params![id],
                Self::row_to_chapter,
            )
            .optional()?)
    }

    fn unprocessed_chapters(&self) -> StorageResult<Vec<Chapter>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, number, title, text, word_count, processed FROM chapters WHERE processed = 0 ORDER BY id",
        )?;
        let chapters = stmt
            .query_map([], Self::row_to_chapter)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chapters)
    }

    fn extraction_stats(&self) -> StorageResult<ExtractionStats> {
        let conn = self.conn()?;
        let (total, processed, metaphors): (i64, i64, i64) = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM chapters),
                    (SELECT COUNT(*) FROM chapters WHERE processed = 1),
                    (SELECT COUNT(*) FROM metaphors)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(ExtractionStats {
            total_chapters: total as usize,
            processed_chapters: processed as usize,
            total_metaphors: metaphors as usize,
        })
    }

    // === Metaphor Operations ===

    fn commit_extraction(&self, chapter_id: i64, metaphors: &[NewMetaphor]) -> StorageResult<Vec<Metaphor>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(metaphors.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO metaphors (chapter_id, exact_quote, explanation, meaning, suggested_topic, confidence, selected)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            )?;
            for metaphor in metaphors {
                stmt.execute(params![
                    chapter_id,
                    metaphor.exact_quote,
                    metaphor.explanation,
                    metaphor.meaning,
                    metaphor.suggested_topic,
                    metaphor.confidence,
                ])?;
                created.push(Metaphor {
                    id: tx.last_insert_rowid(),
                    chapter_id,
                    exact_quote: metaphor.exact_quote.clone(),
                    explanation: metaphor.explanation.clone(),
                    meaning: metaphor.meaning.clone(),
                    suggested_topic: metaphor.suggested_topic.clone(),
                    confidence: metaphor.confidence,
                    topic_id: None,
                    subtopic_id: None,
                    selected: true,
                    user_notes: None,
                });
            }
        }
        tx.execute("UPDATE chapters SET processed = 1 WHERE id = ?1", params![chapter_id])?;
        tx.commit()?;
        Ok(created)
    }

    fn get_metaphor(&self, id: i64) -> StorageResult<Option<Metaphor>> {
        let conn = self.conn()?;
        Self::load_metaphor(&conn, id)
    }

    fn find_metaphors(&self, filter: &MetaphorFilter) -> StorageResult<Vec<Metaphor>> {
        let conn = self.conn()?;
        let (clause, params_vec) = Self::filter_clause(filter);
        let sql = format!(
            "SELECT {} FROM metaphors m{} ORDER BY m.chapter_id, m.id",
            METAPHOR_COLUMNS, clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let metaphors = stmt
            .query_map(params_refs.as_slice(), Self::row_to_metaphor)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(metaphors)
    }

    fn find_metaphor_views(&self, filter: &MetaphorFilter) -> StorageResult<Vec<MetaphorView>> {
        let conn = self.conn()?;
        let (clause, params_vec) = Self::filter_clause(filter);
        let sql = format!(
            "SELECT {}, c.number, t.name FROM metaphors m
             JOIN chapters c ON c.id = m.chapter_id
             LEFT JOIN topics t ON t.id = m.topic_id{}
             ORDER BY m.chapter_id, m.id",
            METAPHOR_COLUMNS, clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let views = stmt
            .query_map(params_refs.as_slice(), |row| {
                Ok(MetaphorView {
                    metaphor: Self::row_to_metaphor(row)?,
                    chapter_number: row.get(11)?,
                    topic_name: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    fn selected_metaphors_by_quote(&self) -> StorageResult<Vec<Metaphor>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM metaphors m WHERE m.selected = 1 ORDER BY m.exact_quote, m.id",
            METAPHOR_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let metaphors = stmt
            .query_map([], Self::row_to_metaphor)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(metaphors)
    }

    fn update_metaphor(&self, id: i64, update: &MetaphorUpdate) -> StorageResult<Option<Metaphor>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let Some(mut metaphor) = Self::load_metaphor(&tx, id)? else {
            return Ok(None);
        };

        if let Some(explanation) = &update.explanation {
            metaphor.explanation = explanation.clone();
        }
        if let Some(meaning) = &update.meaning {
            metaphor.meaning = meaning.clone();
        }
        if let Some(selected) = update.selected {
            metaphor.selected = selected;
        }
        if let Some(notes) = &update.user_notes {
            metaphor.user_notes = Some(notes.clone());
        }
        if let Some(assignment) = &update.assignment {
            Self::check_assignment(&tx, assignment)?;
            metaphor.topic_id = assignment.topic_id;
            metaphor.subtopic_id = assignment.subtopic_id;
        }

        tx.execute(
            "UPDATE metaphors SET explanation = ?1, meaning = ?2, selected = ?3, user_notes = ?4,
                    topic_id = ?5, subtopic_id = ?6
             WHERE id = ?7",
            params![
                metaphor.explanation,
                metaphor.meaning,
                metaphor.selected,
                metaphor.user_notes,
                metaphor.topic_id,
                metaphor.subtopic_id,
                id,
            ],
        )?;
        tx.commit()?;
        Ok(Some(metaphor))
    }

    fn toggle_metaphor(&self, id: i64) -> StorageResult<Option<bool>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "UPDATE metaphors SET selected = NOT selected WHERE id = ?1 RETURNING selected",
                params![id],
                |row| row.get(0),
            )
            .optional()?)
    }

    // === Topic Operations ===

    fn replace_topics(&self, drafts: &[TopicDraft]) -> StorageResult<Reorganization> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("UPDATE metaphors SET topic_id = NULL, subtopic_id = NULL", [])?;
        tx.execute("DELETE FROM subtopics", [])?;
        tx.execute("DELETE FROM topics", [])?;

        let mut result = Reorganization::default();
        {
            let mut assign = tx.prepare("UPDATE metaphors SET topic_id = ?1, subtopic_id = ?2 WHERE id = ?3")?;
            let mut apply = |metaphor_id: i64, topic_id: i64, subtopic_id: Option<i64>| -> StorageResult<()> {
                if assign.execute(params![topic_id, subtopic_id, metaphor_id])? > 0 {
                    result.assigned += 1;
                } else if !result.ignored_ids.contains(&metaphor_id) {
                    result.ignored_ids.push(metaphor_id);
                }
                Ok(())
            };

            let mut topics = Vec::with_capacity(drafts.len());
            let mut subtopics = Vec::new();
            for (position, draft) in drafts.iter().enumerate() {
                tx.execute(
                    "INSERT INTO topics (name, description, sort_order) VALUES (?1, ?2, ?3)",
                    params![draft.name, draft.description, position as i64],
                )?;
                let topic = Topic {
                    id: tx.last_insert_rowid(),
                    name: draft.name.clone(),
                    description: draft.description.clone(),
                    sort_order: position as i64,
                };

                for &metaphor_id in &draft.metaphor_ids {
                    apply(metaphor_id, topic.id, None)?;
                }

                for (sub_position, sub) in draft.subtopics.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO subtopics (topic_id, name, description, sort_order) VALUES (?1, ?2, ?3, ?4)",
                        params![topic.id, sub.name, sub.description, sub_position as i64],
                    )?;
                    let subtopic = Subtopic {
                        id: tx.last_insert_rowid(),
                        topic_id: topic.id,
                        name: sub.name.clone(),
                        description: sub.description.clone(),
                        sort_order: sub_position as i64,
                    };
                    for &metaphor_id in &sub.metaphor_ids {
                        apply(metaphor_id, topic.id, Some(subtopic.id))?;
                    }
                    subtopics.push(subtopic);
                }
                topics.push(topic);
            }
            result.topics = topics;
            result.subtopics = subtopics;
        }

        tx.commit()?;
        Ok(result)
    }

    fn list_topics(&self) -> StorageResult<Vec<Topic>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, description, sort_order FROM topics ORDER BY sort_order, id")?;
        let topics = stmt.query_map([], Self::row_to_topic)?.collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    fn topic_summaries(&self) -> StorageResult<Vec<TopicSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.description, t.sort_order,
                    COUNT(m.id), COALESCE(SUM(m.selected), 0)
             FROM topics t LEFT JOIN metaphors m ON m.topic_id = t.id
             GROUP BY t.id
             ORDER BY t.sort_order, t.id",
        )?;
        let summaries = stmt
            .query_map([], |row| {
                Ok(TopicSummary {
                    topic: Self::row_to_topic(row)?,
                    metaphor_count: row.get::<_, i64>(4)? as usize,
                    selected_count: row.get::<_, i64>(5)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn get_topic(&self, id: i64) -> StorageResult<Option<Topic>> {
        let conn = self.conn()?;
        Self::load_topic(&conn, id)
    }

    fn list_subtopics(&self, topic_id: i64) -> StorageResult<Vec<Subtopic>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, topic_id, name, description, sort_order FROM subtopics WHERE topic_id = ?1
             ORDER BY sort_order, id",
        )?;
        let subtopics = stmt
            .query_map(params![topic_id], Self::row_to_subtopic)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subtopics)
    }

    fn get_subtopic(&self, id: i64) -> StorageResult<Option<Subtopic>> {
        let conn = self.conn()?;
        Self::load_subtopic(&conn, id)
    }

    fn create_topic(&self, name: &str, description: &str) -> StorageResult<Topic> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let sort_order: i64 =
            tx.query_row("SELECT COALESCE(MAX(sort_order) + 1, 0) FROM topics", [], |row| row.get(0))?;
        tx.execute(
            "INSERT INTO topics (name, description, sort_order) VALUES (?1, ?2, ?3)",
            params![name, description, sort_order],
        )?;
        let topic = Topic {
            id: tx.last_insert_rowid(),
            name: name.to_string(),
            description: description.to_string(),
            sort_order,
        };
        tx.commit()?;
        Ok(topic)
    }

    fn update_topic(&self, id: i64, name: &str, description: &str) -> StorageResult<Option<Topic>> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE topics SET name = ?1, description = ?2 WHERE id = ?3",
            params![name, description, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Self::load_topic(&conn, id)
    }

    fn reorder_topics(&self, ids: &[i64]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE topics SET sort_order = ?1 WHERE id = ?2")?;
            for (position, id) in ids.iter().enumerate() {
                updated += stmt.execute(params![position as i64, id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    // === Paper Operations ===

    fn create_paper(&self, title: &str, author: &str, target_pages: u32, status: PaperStatus) -> StorageResult<Paper> {
        let conn = self.conn()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO papers (title, author, status, target_pages, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, author, status.as_str(), target_pages, created_at.to_rfc3339()],
        )?;
        Ok(Paper {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            author: author.to_string(),
            status,
            target_pages,
            created_at,
        })
    }

    fn set_paper_status(&self, id: i64, status: PaperStatus) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("UPDATE papers SET status = ?1 WHERE id = ?2", params![status.as_str(), id])?;
        Ok(rows > 0)
    }

    fn get_paper(&self, id: i64) -> StorageResult<Option<Paper>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, title, author, status, target_pages, created_at FROM papers WHERE id = ?1",
                params![id],
                Self::read_paper_row,
            )
            .optional()?;
        row.map(Self::row_to_paper).transpose()
    }

    fn list_papers(&self) -> StorageResult<Vec<Paper>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, author, status, target_pages, created_at FROM papers
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], Self::read_paper_row)?;

        let mut papers = Vec::new();
        for row in rows {
            papers.push(Self::row_to_paper(row?)?);
        }
        Ok(papers)
    }

    fn insert_section(&self, paper_id: i64, section: &NewSection) -> StorageResult<PaperSection> {
        let conn = self.conn()?;
        let actual_words = word_count(&section.content) as i64;
        conn.execute(
            "INSERT INTO paper_sections (paper_id, kind, topic_id, title, content_en, target_words, actual_words, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                paper_id,
                section.kind.as_str(),
                section.topic_id,
                section.title,
                section.content,
                section.target_words,
                actual_words,
                section.sort_order,
            ],
        )?;
        Ok(PaperSection {
            id: conn.last_insert_rowid(),
            paper_id,
            kind: section.kind,
            topic_id: section.topic_id,
            title: section.title.clone(),
            content_en: section.content.clone(),
            content_es: String::new(),
            content_zh: String::new(),
            target_words: section.target_words,
            actual_words,
            sort_order: section.sort_order,
        })
    }

    fn list_sections(&self, paper_id: i64) -> StorageResult<Vec<PaperSection>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM paper_sections WHERE paper_id = ?1 ORDER BY sort_order, id",
            SECTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![paper_id], Self::read_section_row)?;

        let mut sections = Vec::new();
        for row in rows {
            sections.push(Self::row_to_section(row?)?);
        }
        Ok(sections)
    }

    fn set_translation(&self, section_id: i64, language: Language, content: &str) -> StorageResult<bool> {
        let column = match language {
            Language::En => "content_en",
            Language::Es => "content_es",
            Language::Zh => "content_zh",
        };
        let conn = self.conn()?;
        let rows = conn.execute(
            &format!("UPDATE paper_sections SET {} = ?1 WHERE id = ?2", column),
            params![content, section_id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SectionKind, SubtopicDraft};

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn seeded_store() -> SqliteStore {
        let store = create_test_store();
        store
            .insert_chapters(&[
                Chapter::new(1, "I", "The valley of ashes was a fantastic farm."),
                Chapter::new(2, "II", "Her voice was full of money."),
            ])
            .unwrap();
        store
    }

    fn new_metaphor(quote: &str) -> NewMetaphor {
        NewMetaphor {
            exact_quote: quote.to_string(),
            explanation: "explanation".to_string(),
            meaning: "meaning".to_string(),
            suggested_topic: "wealth".to_string(),
            confidence: 0.8,
        }
    }

    fn draft(name: &str, metaphor_ids: Vec<i64>) -> TopicDraft {
        TopicDraft {
            name: name.to_string(),
            description: format!("About {}", name),
            subtopics: Vec::new(),
            metaphor_ids,
        }
    }

    fn section(kind: SectionKind, sort_order: i64, content: &str) -> NewSection {
        NewSection {
            kind,
            topic_id: None,
            title: kind.as_str().to_string(),
            content: content.to_string(),
            target_words: 100,
            sort_order,
        }
    }

    // ========================================================================
    // Chapters
    // ========================================================================

    #[test]
    fn test_insert_and_list_chapters() {
        let store = seeded_store();
        assert_eq!(store.chapter_count().unwrap(), 2);

        let chapters = store.list_chapters().unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Chapter I");
        assert_eq!(chapters[1].word_count, 6);
        assert!(chapters.iter().all(|c| !c.processed));

        assert_eq!(store.get_chapter(2).unwrap().unwrap().number, "II");
        assert!(store.get_chapter(9).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_chapter_insert_is_rolled_back() {
        let store = seeded_store();
        let result = store.insert_chapters(&[Chapter::new(3, "III", "new"), Chapter::new(1, "I", "again")]);
        assert!(result.is_err());
        assert_eq!(store.chapter_count().unwrap(), 2, "partial batch must not be visible");
    }

    #[test]
    fn test_commit_extraction_marks_chapter_processed() {
        let store = seeded_store();
        let created = store
            .commit_extraction(1, &[new_metaphor("a fantastic farm"), new_metaphor("grotesque gardens")])
            .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|m| m.selected && m.topic_id.is_none()));

        assert!(store.get_chapter(1).unwrap().unwrap().processed);
        let pending: Vec<i64> = store.unprocessed_chapters().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(pending, vec![2]);

        let stats = store.extraction_stats().unwrap();
        assert_eq!(stats.total_chapters, 2);
        assert_eq!(stats.processed_chapters, 1);
        assert_eq!(stats.total_metaphors, 2);
    }

    #[test]
    fn test_commit_extraction_with_no_metaphors_still_processes() {
        let store = seeded_store();
        store.commit_extraction(2, &[]).unwrap();
        assert!(store.get_chapter(2).unwrap().unwrap().processed);
    }

    #[test]
    fn test_re_extraction_appends() {
        let store = seeded_store();
        store.commit_extraction(1, &[new_metaphor("a"), new_metaphor("b")]).unwrap();
        store.commit_extraction(1, &[new_metaphor("a"), new_metaphor("b")]).unwrap();
        let rows = store.find_metaphors(&MetaphorFilter::new().with_chapter(1)).unwrap();
        assert_eq!(rows.len(), 4);
    }

    // ========================================================================
    // Metaphors
    // ========================================================================

    #[test]
    fn test_find_metaphors_with_filters() {
        let store = seeded_store();
        store.commit_extraction(2, &[new_metaphor("full of money")]).unwrap();
        let mut low = new_metaphor("fantastic farm");
        low.confidence = 0.3;
        store.commit_extraction(1, &[low]).unwrap();

        let all = store.find_metaphors(&MetaphorFilter::new()).unwrap();
        assert_eq!(all[0].chapter_id, 1, "ordered by chapter first");

        let confident = store
            .find_metaphors(&MetaphorFilter::new().with_min_confidence(0.5))
            .unwrap();
        assert_eq!(confident.len(), 1);
        assert_eq!(confident[0].exact_quote, "full of money");

        store.toggle_metaphor(confident[0].id).unwrap();
        assert_eq!(store.find_metaphors(&MetaphorFilter::selected()).unwrap().len(), 1);
    }

    #[test]
    fn test_metaphor_views_resolve_labels() {
        let store = seeded_store();
        let created = store.commit_extraction(2, &[new_metaphor("full of money")]).unwrap();
        let org = store.replace_topics(&[draft("Wealth", vec![created[0].id])]).unwrap();

        let views = store.find_metaphor_views(&MetaphorFilter::new()).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].chapter_number, "II");
        assert_eq!(views[0].topic_name.as_deref(), Some("Wealth"));
        assert_eq!(views[0].metaphor.topic_id, Some(org.topics[0].id));
    }

    #[test]
    fn test_toggle_metaphor() {
        let store = seeded_store();
        let id = store.commit_extraction(1, &[new_metaphor("a")]).unwrap()[0].id;
        assert_eq!(store.toggle_metaphor(id).unwrap(), Some(false));
        assert_eq!(store.toggle_metaphor(id).unwrap(), Some(true));
        assert_eq!(store.toggle_metaphor(999).unwrap(), None);
    }

    #[test]
    fn test_update_metaphor_fields() {
        let store = seeded_store();
        let id = store.commit_extraction(1, &[new_metaphor("a")]).unwrap()[0].id;

        let updated = store
            .update_metaphor(id, &MetaphorUpdate::new().with_meaning("new meaning").with_notes("see ch. 7"))
            .unwrap()
            .unwrap();
        assert_eq!(updated.meaning, "new meaning");
        assert_eq!(updated.explanation, "explanation");
        assert_eq!(updated.user_notes.as_deref(), Some("see ch. 7"));
        assert_eq!(store.get_metaphor(id).unwrap().unwrap(), updated);

        assert!(store.update_metaphor(999, &MetaphorUpdate::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_metaphor_rejects_mismatched_subtopic() {
        let store = seeded_store();
        let id = store.commit_extraction(1, &[new_metaphor("a")]).unwrap()[0].id;
        let mut with_sub = draft("Class", vec![]);
        with_sub.subtopics.push(SubtopicDraft {
            name: "Old money".to_string(),
            description: String::new(),
            metaphor_ids: vec![],
        });
        let org = store.replace_topics(&[with_sub, draft("Decay", vec![])]).unwrap();
        let subtopic = &org.subtopics[0];
        let other_topic = org.topics[1].id;

        let err = store
            .update_metaphor(
                id,
                &MetaphorUpdate::new().with_assignment(Assignment::subtopic(other_topic, subtopic.id)),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidAssignment(_)));

        let err = store
            .update_metaphor(
                id,
                &MetaphorUpdate::new().with_assignment(Assignment {
                    topic_id: None,
                    subtopic_id: Some(subtopic.id),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidAssignment(_)));

        let ok = store
            .update_metaphor(
                id,
                &MetaphorUpdate::new().with_assignment(Assignment::subtopic(subtopic.topic_id, subtopic.id)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(ok.subtopic_id, Some(subtopic.id));

        // Moving to a topic directly drops the subtopic
        let moved = store
            .update_metaphor(id, &MetaphorUpdate::new().with_assignment(Assignment::topic(other_topic)))
            .unwrap()
            .unwrap();
        assert_eq!(moved.topic_id, Some(other_topic));
        assert_eq!(moved.subtopic_id, None);
    }

    #[test]
    fn test_selected_metaphors_by_quote() {
        let store = seeded_store();
        let created = store
            .commit_extraction(1, &[new_metaphor("zeal"), new_metaphor("ashes"), new_metaphor("money")])
            .unwrap();
        store.toggle_metaphor(created[2].id).unwrap();

        let quotes: Vec<String> = store
            .selected_metaphors_by_quote()
            .unwrap()
            .into_iter()
            .map(|m| m.exact_quote)
            .collect();
        assert_eq!(quotes, vec!["ashes", "zeal"]);
    }

    // ========================================================================
    // Topics
    // ========================================================================

    #[test]
    fn test_replace_topics_assigns_in_order() {
        let store = seeded_store();
        let ids: Vec<i64> = store
            .commit_extraction(1, &[new_metaphor("a"), new_metaphor("b"), new_metaphor("c")])
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        let mut first = draft("Wealth", vec![ids[0]]);
        first.subtopics.push(SubtopicDraft {
            name: "Display".to_string(),
            description: "Conspicuous spending".to_string(),
            metaphor_ids: vec![ids[1]],
        });
        let org = store
            .replace_topics(&[first, draft("Decay", vec![ids[2], 4242])])
            .unwrap();

        assert_eq!(org.topics.len(), 2);
        assert_eq!(org.topics[0].sort_order, 0);
        assert_eq!(org.topics[1].sort_order, 1);
        assert_eq!(org.assigned, 3);
        assert_eq!(org.ignored_ids, vec![4242]);

        let b = store.get_metaphor(ids[1]).unwrap().unwrap();
        assert_eq!(b.topic_id, Some(org.topics[0].id));
        assert_eq!(b.subtopic_id, Some(org.subtopics[0].id));
        assert_eq!(store.list_subtopics(org.topics[0].id).unwrap(), org.subtopics);
    }

    #[test]
    fn test_replace_topics_clears_previous_assignment() {
        let store = seeded_store();
        let ids: Vec<i64> = store
            .commit_extraction(1, &[new_metaphor("a"), new_metaphor("b")])
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        let first = store.replace_topics(&[draft("Old", ids.clone())]).unwrap();
        let second = store.replace_topics(&[draft("New", vec![ids[0]])]).unwrap();

        let topics = store.list_topics().unwrap();
        assert_eq!(topics, second.topics);
        assert!(store.get_topic(first.topics[0].id).unwrap().is_none());
        assert_ne!(first.topics[0].id, second.topics[0].id, "topic ids are never reused");

        assert_eq!(store.get_metaphor(ids[0]).unwrap().unwrap().topic_id, Some(second.topics[0].id));
        let orphan = store.get_metaphor(ids[1]).unwrap().unwrap();
        assert_eq!(orphan.topic_id, None);
        assert_eq!(orphan.subtopic_id, None);
    }

    #[test]
    fn test_topic_summaries_count_members() {
        let store = seeded_store();
        let ids: Vec<i64> = store
            .commit_extraction(1, &[new_metaphor("a"), new_metaphor("b")])
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        store.replace_topics(&[draft("Wealth", ids.clone()), draft("Empty", vec![])]).unwrap();
        store.toggle_metaphor(ids[1]).unwrap();

        let summaries = store.topic_summaries().unwrap();
        assert_eq!(summaries[0].metaphor_count, 2);
        assert_eq!(summaries[0].selected_count, 1);
        assert_eq!(summaries[1].metaphor_count, 0);
        assert_eq!(summaries[1].selected_count, 0);
    }

    #[test]
    fn test_create_update_and_reorder_topics() {
        let store = create_test_store();
        let a = store.create_topic("Light", "").unwrap();
        let b = store.create_topic("Water", "").unwrap();
        assert_eq!((a.sort_order, b.sort_order), (0, 1));

        let renamed = store.update_topic(a.id, "Green light", "Longing").unwrap().unwrap();
        assert_eq!(renamed.name, "Green light");
        assert!(store.update_topic(999, "x", "y").unwrap().is_none());

        assert_eq!(store.reorder_topics(&[b.id, 999, a.id]).unwrap(), 2);
        let names: Vec<String> = store.list_topics().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Water", "Green light"]);
    }

    // ========================================================================
    // Papers
    // ========================================================================

    #[test]
    fn test_paper_lifecycle() {
        let store = create_test_store();
        let paper = store.create_paper("Title", "Author", 10, PaperStatus::Generating).unwrap();
        assert_eq!(store.get_paper(paper.id).unwrap().unwrap(), paper);

        assert!(store.set_paper_status(paper.id, PaperStatus::Complete).unwrap());
        assert_eq!(store.get_paper(paper.id).unwrap().unwrap().status, PaperStatus::Complete);
        assert!(!store.set_paper_status(999, PaperStatus::Complete).unwrap());
        assert!(store.get_paper(999).unwrap().is_none());
    }

    #[test]
    fn test_list_papers_newest_first() {
        let store = create_test_store();
        let first = store.create_paper("First", "A", 5, PaperStatus::Complete).unwrap();
        let second = store.create_paper("Second", "A", 5, PaperStatus::Generating).unwrap();
        let ids: Vec<i64> = store.list_papers().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_sections_ordered_and_counted() {
        let store = create_test_store();
        let paper = store.create_paper("T", "A", 10, PaperStatus::Generating).unwrap();
        store.insert_section(paper.id, &section(SectionKind::Conclusion, 99, "The end.")).unwrap();
        let intro = store
            .insert_section(paper.id, &section(SectionKind::Introduction, 1, "Three words here"))
            .unwrap();
        assert_eq!(intro.actual_words, 3);

        let kinds: Vec<SectionKind> = store.list_sections(paper.id).unwrap().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SectionKind::Introduction, SectionKind::Conclusion]);
    }

    #[test]
    fn test_set_translation_fills_one_slot() {
        let store = create_test_store();
        let paper = store.create_paper("T", "A", 10, PaperStatus::Complete).unwrap();
        let intro = store
            .insert_section(paper.id, &section(SectionKind::Introduction, 1, "Hello"))
            .unwrap();

        assert!(store.set_translation(intro.id, Language::Es, "Hola").unwrap());
        assert!(!store.set_translation(999, Language::Es, "Hola").unwrap());

        let stored = &store.list_sections(paper.id).unwrap()[0];
        assert_eq!(stored.content(Language::Es), "Hola");
        assert_eq!(stored.content(Language::Zh), "");
        assert_eq!(stored.content(Language::En), "Hello");
        assert_eq!(stored.actual_words, 1);
    }

    // ========================================================================
    // On-disk behavior
    // ========================================================================

    #[test]
    fn test_wal_mode_enabled_at_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested").join("project.db")).unwrap();

        let journal_mode: String = store
            .conn
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode, "wal");
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_chapters(&[Chapter::new(1, "I", "text")]).unwrap();
            store.commit_extraction(1, &[new_metaphor("a")]).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let stats = store.extraction_stats().unwrap();
        assert_eq!(stats.processed_chapters, 1);
        assert_eq!(stats.total_metaphors, 1);
    }
}

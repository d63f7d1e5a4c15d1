//! SQLite course store
//!
//! One connection behind a mutex; every call runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::{CourseStore, CourseSummary, StoreError, StoredChapter, StoredCourse, resolve_id, validate_for_save};
use crate::domain::{ChapterKind, CourseId, CourseMeta, DraftChapter, generate_course_id};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chapters (
    course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    idx INTEGER NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    score INTEGER,
    PRIMARY KEY (course_id, idx)
);
";

/// Course store backed by a SQLite database file
#[derive(Clone)]
pub struct SqliteCourseStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCourseStore {
    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(?path, "Opened course database");
        Self::init(conn)
    }

    /// Database that lives only as long as the store
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl CourseStore for SqliteCourseStore {
    async fn save(&self, meta: &CourseMeta, chapters: &[DraftChapter]) -> Result<CourseId, StoreError> {
        debug!(name = %meta.name, chapters = chapters.len(), "SqliteCourseStore::save: called");
        validate_for_save(meta, chapters)?;

        let id = generate_course_id(&meta.name);
        let meta = meta.clone();
        let chapters = chapters.to_vec();
        let tags = serde_json::to_string(&meta.tags)?;
        let created_at = Utc::now().to_rfc3339();

        let saved = id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO courses (id, name, description, tags, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![saved.as_str(), meta.name, meta.description, tags, created_at],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chapters (course_id, idx, title, summary, kind, content)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for chapter in &chapters {
                    stmt.execute(params![
                        saved.as_str(),
                        chapter.index as i64,
                        chapter.title,
                        chapter.summary,
                        chapter.kind.as_str(),
                        chapter.content,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        info!(course_id = %id, "course saved");
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<StoredCourse, StoreError> {
        debug!(%id, "SqliteCourseStore::get: called");
        let query = id.to_string();
        self.with_conn(move |conn| {
            let candidates = {
                let mut stmt = conn.prepare("SELECT id FROM courses WHERE substr(id, 1, length(?1)) = ?1")?;
                stmt.query_map(params![query], |row| row.get::<_, String>(0))?
                    .map(|r| r.map(|id| CourseId::from_string(id)))
                    .collect::<Result<Vec<_>, _>>()?
            };
            let id = resolve_id(&query, &candidates)?;
            load_course(conn, &id)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<CourseSummary>, StoreError> {
        debug!("SqliteCourseStore::list: called");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.tags, c.created_at, COUNT(ch.idx)
                 FROM courses c LEFT JOIN chapters ch ON ch.course_id = c.id
                 GROUP BY c.id
                 ORDER BY c.created_at DESC, c.id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, name, tags, created_at, count)| -> Result<CourseSummary, StoreError> {
                    Ok(CourseSummary {
                        id: CourseId::from_string(id),
                        name,
                        tags: serde_json::from_str(&tags)?,
                        chapter_count: count as usize,
                        created_at: parse_timestamp(&created_at)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn record_score(&self, id: &CourseId, index: u32, score: u8) -> Result<(), StoreError> {
        debug!(%id, index, score, "SqliteCourseStore::record_score: called");
        let id = id.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE chapters SET score = ?1 WHERE course_id = ?2 AND idx = ?3",
                params![score as i64, id.as_str(), index as i64],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("{} chapter {}", id, index)));
            }
            Ok(())
        })
        .await
    }
}

fn load_course(conn: &Connection, id: &CourseId) -> Result<StoredCourse, StoreError> {
    let row = conn
        .query_row(
            "SELECT name, description, tags, created_at FROM courses WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((name, description, tags, created_at)) = row else {
        return Err(StoreError::NotFound(id.to_string()));
    };

    let mut stmt = conn.prepare(
        "SELECT idx, title, summary, kind, content, score FROM chapters WHERE course_id = ?1 ORDER BY idx",
    )?;
    let rows = stmt
        .query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut chapters = Vec::with_capacity(rows.len());
    for (index, title, summary, kind, content, score) in rows {
        let kind: ChapterKind = kind.parse().map_err(StoreError::Invalid)?;
        chapters.push(StoredChapter {
            index: index as u32,
            title,
            summary,
            kind,
            content,
            score: score.map(|s| s.clamp(0, 100) as u8),
        });
    }

    Ok(StoredCourse {
        id: id.clone(),
        meta: CourseMeta {
            name,
            description,
            tags: serde_json::from_str(&tags)?,
        },
        created_at: parse_timestamp(&created_at)?,
        chapters,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Invalid(format!("bad timestamp '{}': {}", raw, e)))
}

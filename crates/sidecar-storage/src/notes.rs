use crate::StorageError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use sidecar_core::projection::{ListProjection, Record};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const ENTITY_TYPE_NOTES: &str = "notes";
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);
const TITLE_MAX_CHARS: usize = 80;

const NOTE_COLUMNS: &str =
    "id, title, content, created_at, updated_at, pinned, archived, deleted_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pinned: bool,
    pub archived: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Note {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Case-insensitive substring match over title and content.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

impl Record for Note {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteView {
    Active,
    Archived,
    Deleted,
}

impl NoteView {
    pub fn next(self) -> Self {
        match self {
            NoteView::Active => NoteView::Archived,
            NoteView::Archived => NoteView::Deleted,
            NoteView::Deleted => NoteView::Active,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NoteView::Active => "Active",
            NoteView::Archived => "Archived",
            NoteView::Deleted => "Deleted",
        }
    }

    fn query(self) -> String {
        let filter = match self {
            NoteView::Active => {
                "WHERE deleted_at IS NULL AND archived = 0 ORDER BY pinned DESC, updated_at DESC, id ASC"
            }
            NoteView::Archived => {
                "WHERE deleted_at IS NULL AND archived = 1 ORDER BY updated_at DESC, id ASC"
            }
            NoteView::Deleted => "WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC, id ASC",
        };
        format!("SELECT {NOTE_COLUMNS} FROM notes {filter}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLogEntry {
    pub id: String,
    pub session_id: String,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub previous_data: Option<String>,
    pub new_data: Option<String>,
    pub timestamp: String,
    pub undone: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NoteListing {
    pub notes: Vec<Note>,
    /// Rows that could not be decoded.
    pub skipped: usize,
}

impl NoteListing {
    pub fn into_projection(self) -> ListProjection<Note> {
        ListProjection::new(self.notes)
    }
}

pub struct NoteStore {
    conn: Connection,
    session_id: String,
}

impl NoteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened notes store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn,
            session_id: new_id("ses-"),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Tables are shared with an external owner, so creation is idempotent
    /// and `user_version` is left alone.
    pub fn migrate(&self) -> Result<(), StorageError> {
        let sql = include_str!("../migrations/0001_notes.sql");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(&self, id: &str) -> Result<Option<Note>, StorageError> {
        fetch_note(&self.conn, id)
    }

    pub fn list(&self, view: NoteView) -> Result<NoteListing, StorageError> {
        let mut statement = self.conn.prepare(&view.query())?;
        let rows = statement.query_map([], raw_note)?;
        let mut listing = NoteListing::default();
        for row in rows {
            match row.map_err(StorageError::from).and_then(RawNote::into_note) {
                Ok(note) => listing.notes.push(note),
                Err(err) => {
                    listing.skipped += 1;
                    debug!(error = %err, skipped = listing.skipped, "skipping unreadable note row");
                }
            }
        }
        Ok(listing)
    }

    pub fn search(&self, view: NoteView, query: &str) -> Result<NoteListing, StorageError> {
        let mut listing = self.list(view)?;
        listing.notes.retain(|note| note.matches(query));
        Ok(listing)
    }

    /// Exact (case-insensitive) title match among active notes.
    pub fn find_by_title(&self, title: &str) -> Result<Option<Note>, StorageError> {
        let wanted = title.trim().to_lowercase();
        Ok(self
            .list(NoteView::Active)?
            .notes
            .into_iter()
            .find(|note| note.title.trim().to_lowercase() == wanted))
    }

    pub fn create(&mut self, title: &str, content: &str) -> Result<Note, StorageError> {
        let now = Utc::now();
        let note = Note {
            id: new_id("nt-"),
            title: title.trim().to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            pinned: false,
            archived: false,
            deleted_at: None,
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("INSERT INTO notes ({NOTE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                note.id,
                note.title,
                note.content,
                format_ts(note.created_at),
                format_ts(note.updated_at),
                note.pinned,
                note.archived,
                note.deleted_at.map(format_ts),
            ],
        )?;
        append_action(&tx, &self.session_id, ActionKind::Create, None, Some(&note))?;
        tx.commit()?;
        info!(note_id = %note.id, "created note");
        Ok(note)
    }

    pub fn update(&mut self, id: &str, title: &str, content: &str) -> Result<Note, StorageError> {
        let title = title.trim().to_string();
        let content = content.to_string();
        self.mutate(id, ActionKind::Update, move |note| {
            note.title = title;
            note.content = content;
        })
    }

    /// Writes new content and re-derives the title from its first line.
    pub fn update_content(&mut self, id: &str, content: &str) -> Result<Note, StorageError> {
        let content = content.to_string();
        self.mutate(id, ActionKind::Update, move |note| {
            let title = derive_title(&content);
            if !title.is_empty() {
                note.title = title;
            }
            note.content = content;
        })
    }

    /// Soft delete.
    pub fn delete(&mut self, id: &str) -> Result<Note, StorageError> {
        let now = Utc::now();
        self.mutate(id, ActionKind::Delete, move |note| {
            note.deleted_at = Some(now);
        })
    }

    pub fn restore(&mut self, id: &str) -> Result<Note, StorageError> {
        self.mutate(id, ActionKind::Update, |note| {
            note.deleted_at = None;
        })
    }

    pub fn toggle_pin(&mut self, id: &str) -> Result<Note, StorageError> {
        self.mutate(id, ActionKind::Update, |note| {
            note.pinned = !note.pinned;
        })
    }

    pub fn toggle_archive(&mut self, id: &str) -> Result<Note, StorageError> {
        self.mutate(id, ActionKind::Update, |note| {
            note.archived = !note.archived;
        })
    }

    pub fn set_archived(&mut self, id: &str, archived: bool) -> Result<Note, StorageError> {
        self.mutate(id, ActionKind::Update, move |note| {
            note.archived = archived;
        })
    }

    pub fn action_log_for(&self, entity_id: &str) -> Result<Vec<ActionLogEntry>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT id, session_id, action_type, entity_type, entity_id,
                   previous_data, new_data, timestamp, undone
            FROM action_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY rowid ASC
            ",
        )?;
        let rows = statement.query_map(params![ENTITY_TYPE_NOTES, entity_id], |row| {
            Ok(ActionLogEntry {
                id: row.get(0)?,
                session_id: row.get(1)?,
                action_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                previous_data: row.get(5)?,
                new_data: row.get(6)?,
                timestamp: row.get(7)?,
                undone: row.get(8)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn action_log_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM action_log WHERE entity_type = ?1",
            [ENTITY_TYPE_NOTES],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Read, modify, write and log in one transaction. Nothing is written
    /// when the note is missing or any statement fails.
    fn mutate<F>(&mut self, id: &str, kind: ActionKind, apply: F) -> Result<Note, StorageError>
    where
        F: FnOnce(&mut Note),
    {
        let tx = self.conn.transaction()?;
        let previous =
            fetch_note(&tx, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let mut next = previous.clone();
        apply(&mut next);
        next.updated_at = Utc::now().max(previous.updated_at);

        tx.execute(
            "
            UPDATE notes
            SET title = ?2, content = ?3, updated_at = ?4, pinned = ?5, archived = ?6, deleted_at = ?7
            WHERE id = ?1
            ",
            params![
                next.id,
                next.title,
                next.content,
                format_ts(next.updated_at),
                next.pinned,
                next.archived,
                next.deleted_at.map(format_ts),
            ],
        )?;
        append_action(&tx, &self.session_id, kind, Some(&previous), Some(&next))?;
        tx.commit()?;
        debug!(note_id = %id, action = kind.as_str(), "note mutated");
        Ok(next)
    }
}

struct RawNote {
    id: String,
    title: String,
    content: String,
    created_at: String,
    updated_at: String,
    pinned: bool,
    archived: bool,
    deleted_at: Option<String>,
}

impl RawNote {
    fn into_note(self) -> Result<Note, StorageError> {
        Ok(Note {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            id: self.id,
            title: self.title,
            content: self.content,
            pinned: self.pinned,
            archived: self.archived,
        })
    }
}

fn raw_note(row: &Row<'_>) -> rusqlite::Result<RawNote> {
    Ok(RawNote {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        pinned: row.get(5)?,
        archived: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

fn fetch_note(conn: &Connection, id: &str) -> Result<Option<Note>, StorageError> {
    let raw = conn
        .query_row(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
            [id],
            raw_note,
        )
        .optional()?;
    raw.map(RawNote::into_note).transpose()
}

fn append_action(
    tx: &Transaction<'_>,
    session_id: &str,
    kind: ActionKind,
    previous: Option<&Note>,
    next: Option<&Note>,
) -> Result<(), StorageError> {
    let entity_id = next
        .or(previous)
        .map(|note| note.id.clone())
        .unwrap_or_default();
    tx.execute(
        "
        INSERT INTO action_log (
            id, session_id, action_type, entity_type, entity_id,
            previous_data, new_data, timestamp, undone
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
        ",
        params![
            new_id("al-"),
            session_id,
            kind.as_str(),
            ENTITY_TYPE_NOTES,
            entity_id,
            previous.map(to_json).transpose()?,
            next.map(to_json).transpose()?,
            format_ts(Utc::now()),
        ],
    )?;
    Ok(())
}

fn to_json(note: &Note) -> Result<String, StorageError> {
    serde_json::to_string(note).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn new_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &hex[..8])
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

/// First non-empty line, trimmed of markdown heading marks and capped.
pub fn derive_title(content: &str) -> String {
    let line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let line = line.trim_start_matches('#').trim();
    line.chars().take(TITLE_MAX_CHARS).collect()
}

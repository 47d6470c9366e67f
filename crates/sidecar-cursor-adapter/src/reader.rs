use crate::blobs::{decode_hex, BlobWalk};
use crate::cache::{SessionCache, StoreSignature};
use crate::AdapterError;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use md5::{Digest, Md5};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use sidecar_core::projection::Record;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const STORE_DB: &str = "store.db";
pub const STORE_WAL: &str = "store.db-wal";
const META_KEY: &str = "0";
const READ_BUSY_TIMEOUT: Duration = Duration::from_millis(200);
const PREVIEW_CHARS: usize = 120;

/// `<home>/.cursor/chats/<md5 of the absolute project path>`.
pub fn chat_dir_for(home: &Path, project_root: &Path) -> PathBuf {
    let digest = Md5::digest(project_root.to_string_lossy().as_bytes());
    home.join(".cursor")
        .join("chats")
        .join(format!("{digest:x}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMeta {
    #[serde(default)]
    pub agent_id: Option<String>,
    pub latest_root_blob_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub last_used_model: Option<String>,
}

impl ChatMeta {
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn label(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub name: String,
    pub store_path: PathBuf,
    pub model: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub first_user_message: Option<String>,
    pub skipped: usize,
}

impl Record for SessionSummary {
    fn record_id(&self) -> &str {
        &self.session_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionListing {
    /// Most recently updated first.
    pub sessions: Vec<SessionSummary>,
    pub unreadable_stores: usize,
    pub skipped_records: usize,
}

/// Opens a store read-only, reads it, and closes it before returning.
pub fn read_session(store_path: &Path) -> Result<SessionDetail, AdapterError> {
    let conn = Connection::open_with_flags(
        store_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(READ_BUSY_TIMEOUT)?;

    let meta = read_meta(&conn, store_path)?;
    let walk = {
        let mut statement = conn.prepare("SELECT data FROM blobs WHERE id = ?1")?;
        BlobWalk::run(&meta.latest_root_blob_id, |id| {
            match statement
                .query_row([id], |row| row.get::<_, Vec<u8>>(0))
                .optional()
            {
                Ok(data) => data,
                Err(err) => {
                    debug!(blob_id = %id, error = %err, "blob read failed");
                    None
                }
            }
        })
    };
    drop(conn);

    let mut messages: Vec<ChatMessage> = walk.messages.iter().filter_map(message_from_value).collect();
    let created = meta.created();
    let modified = store_mtime(store_path);
    interpolate_timestamps(&mut messages, created, modified);

    let session_id = store_path
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let first_user_message = messages
        .iter()
        .find(|message| message.role == MessageRole::User && !message.text.is_empty())
        .map(|message| preview(&message.text));

    let summary = SessionSummary {
        name: meta
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        session_id,
        store_path: store_path.to_path_buf(),
        model: meta.last_used_model.clone(),
        created_at: created,
        updated_at: modified,
        message_count: messages.len(),
        first_user_message,
        skipped: walk.skipped,
    };
    Ok(SessionDetail { summary, messages })
}

fn read_meta(conn: &Connection, store_path: &Path) -> Result<ChatMeta, AdapterError> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [META_KEY], |row| {
            row.get(0)
        })
        .optional()?;
    let raw = raw.ok_or_else(|| AdapterError::MissingMeta(store_path.to_path_buf()))?;
    let bytes = decode_hex(&raw)
        .ok_or_else(|| AdapterError::CorruptMeta("metadata is not hex".to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| AdapterError::CorruptMeta(err.to_string()))
}

/// Later of the database and its WAL modification times.
fn store_mtime(store_path: &Path) -> Option<DateTime<Utc>> {
    let wal = store_path.with_file_name(STORE_WAL);
    [store_path, wal.as_path()]
        .into_iter()
        .filter_map(|path| fs::metadata(path).and_then(|meta| meta.modified()).ok())
        .max()
        .map(DateTime::<Utc>::from)
}

fn message_from_value(value: &Value) -> Option<ChatMessage> {
    let role = match value.get("role").and_then(Value::as_str)? {
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        "tool" => MessageRole::Tool,
        _ => return None,
    };
    let text = match value.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(content_part_text)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    let text = if role == MessageRole::User {
        strip_user_query(&text)
    } else {
        text.trim().to_string()
    };
    Some(ChatMessage {
        role,
        text,
        timestamp: None,
    })
}

fn content_part_text(part: &Value) -> Option<String> {
    match part.get("type").and_then(Value::as_str)? {
        "text" => part.get("text").and_then(Value::as_str).map(str::to_string),
        "tool-call" => Some(format!(
            "[tool call: {}]",
            part.get("toolName").and_then(Value::as_str).unwrap_or("?")
        )),
        "tool-result" => Some(format!(
            "[tool result: {}]",
            part.get("toolName").and_then(Value::as_str).unwrap_or("?")
        )),
        _ => None,
    }
}

fn strip_user_query(text: &str) -> String {
    let trimmed = text.trim();
    match (trimmed.find("<user_query>"), trimmed.rfind("</user_query>")) {
        (Some(start), Some(end)) if end > start => trimmed[start + "<user_query>".len()..end]
            .trim()
            .to_string(),
        _ => trimmed.to_string(),
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > PREVIEW_CHARS {
        let cut: String = line.chars().take(PREVIEW_CHARS - 1).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

/// Spreads message times linearly from creation to last modification. One
/// message takes the creation time.
pub fn interpolate_timestamps(
    messages: &mut [ChatMessage],
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
) {
    let count = messages.len();
    let Some(start) = created.or(modified) else {
        return;
    };
    if count == 1 {
        messages[0].timestamp = Some(start);
        return;
    }
    let end = modified.unwrap_or(start).max(start);
    let span = (end - start).num_milliseconds();
    let steps = count.saturating_sub(1).max(1) as i64;
    for (index, message) in messages.iter_mut().enumerate() {
        let offset = span * index as i64 / steps;
        message.timestamp = Some(start + ChronoDuration::milliseconds(offset));
    }
}

pub struct CursorReader {
    chat_dir: PathBuf,
    cache: SessionCache<SessionSummary>,
}

impl CursorReader {
    pub fn new(home: &Path, project_root: &Path) -> Self {
        Self::with_chat_dir(chat_dir_for(home, project_root))
    }

    pub fn with_chat_dir(chat_dir: PathBuf) -> Self {
        Self {
            chat_dir,
            cache: SessionCache::default(),
        }
    }

    pub fn chat_dir(&self) -> &Path {
        &self.chat_dir
    }

    pub fn cache(&self) -> &SessionCache<SessionSummary> {
        &self.cache
    }

    /// Store files under the chat directory. A missing directory is an empty
    /// listing.
    pub fn discover(&self) -> Result<Vec<PathBuf>, AdapterError> {
        let entries = match fs::read_dir(&self.chat_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AdapterError::Io {
                    path: self.chat_dir.clone(),
                    source,
                })
            }
        };
        let mut stores: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path().join(STORE_DB))
            .filter(|path| path.is_file())
            .collect();
        stores.sort();
        Ok(stores)
    }

    pub fn list_sessions(&mut self) -> Result<SessionListing, AdapterError> {
        let stores = self.discover()?;
        let mut listing = SessionListing::default();
        for store in &stores {
            let signature = StoreSignature::probe(store, &store.with_file_name(STORE_WAL));
            let summary = self
                .cache
                .get_or_try_insert(store, signature, || read_session(store).map(|d| d.summary));
            match summary {
                Ok(summary) => {
                    listing.skipped_records += summary.skipped;
                    listing.sessions.push(summary);
                }
                Err(err) => {
                    listing.unreadable_stores += 1;
                    warn!(store = %store.display(), error = %err, "failed to read session store");
                }
            }
        }
        self.cache.retain_paths(&stores);
        listing
            .sessions
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.session_id.cmp(&b.session_id)));
        Ok(listing)
    }

    pub fn load(&self, store_path: &Path) -> Result<SessionDetail, AdapterError> {
        read_session(store_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::encode_hex;
    use crate::cache::CacheStats;
    use std::fs::OpenOptions;
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn blob_id(n: u8) -> [u8; 32] {
        [n; 32]
    }

    fn frame(children: &[[u8; 32]]) -> Vec<u8> {
        let mut data = Vec::new();
        for child in children {
            data.extend_from_slice(&[0x0A, 0x20]);
            data.extend_from_slice(child);
        }
        data
    }

    /// Writes a WAL-mode store and returns the writer, which must stay open
    /// for the WAL file to persist.
    fn seed_store(chat_dir: &Path, session: &str, name: &str) -> (PathBuf, Connection) {
        let dir = chat_dir.join(session);
        fs::create_dir_all(&dir).expect("session dir");
        let path = dir.join(STORE_DB);
        let conn = Connection::open(&path).expect("open writer");
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .expect("wal");
        conn.execute_batch(
            "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE blobs (id TEXT PRIMARY KEY, data BLOB);",
        )
        .expect("schema");

        let meta = format!(
            r#"{{"agentId":"a1","latestRootBlobId":"{}","name":"{name}","createdAt":1700000000000,"lastUsedModel":"gpt-5"}}"#,
            encode_hex(&blob_id(0))
        );
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('0', ?1)",
            [encode_hex(meta.as_bytes())],
        )
        .expect("meta");

        let blobs: Vec<([u8; 32], Vec<u8>)> = vec![
            (blob_id(0), frame(&[blob_id(1), blob_id(2), blob_id(3), blob_id(4)])),
            (
                blob_id(1),
                br#"{"role":"user","content":"<user_query>\nfix the flaky test\n</user_query>"}"#
                    .to_vec(),
            ),
            (
                blob_id(2),
                br#"{"role":"assistant","content":[{"type":"text","text":"Looking now."},{"type":"tool-call","toolName":"grep"}]}"#
                    .to_vec(),
            ),
            (blob_id(3), b"{truncated".to_vec()),
            (blob_id(4), br#"{"role":"system","content":"hidden"}"#.to_vec()),
        ];
        for (id, data) in blobs {
            conn.execute(
                "INSERT INTO blobs (id, data) VALUES (?1, ?2)",
                rusqlite::params![encode_hex(&id), data],
            )
            .expect("blob");
        }
        (path, conn)
    }

    fn set_mtime(path: &Path, when: SystemTime) {
        OpenOptions::new()
            .write(true)
            .open(path)
            .expect("open")
            .set_modified(when)
            .expect("set mtime");
    }

    #[test]
    fn chat_dir_is_md5_of_project_path() {
        assert_eq!(
            chat_dir_for(Path::new("/home/dev"), Path::new("/home/dev/project")),
            PathBuf::from("/home/dev/.cursor/chats/386a62c9e05fe5c90385e97e49ad27e0")
        );
    }

    #[test]
    fn read_session_extracts_messages_and_counts_skips() {
        let dir = tempdir().expect("tempdir");
        let (path, _writer) = seed_store(dir.path(), "chat-1", "Flaky test");

        let detail = read_session(&path).expect("read");
        assert_eq!(detail.summary.session_id, "chat-1");
        assert_eq!(detail.summary.name, "Flaky test");
        assert_eq!(detail.summary.model.as_deref(), Some("gpt-5"));
        assert_eq!(detail.summary.message_count, 2);
        assert_eq!(
            detail.summary.first_user_message.as_deref(),
            Some("fix the flaky test")
        );
        assert_eq!(detail.summary.skipped, 1);
        assert_eq!(detail.messages[1].text, "Looking now.\n[tool call: grep]");
        assert_eq!(detail.messages[0].timestamp, detail.summary.created_at);
    }

    #[test]
    fn listing_recomputes_only_when_wal_signature_changes() {
        let dir = tempdir().expect("tempdir");
        let (path, _writer) = seed_store(dir.path(), "chat-1", "Cached");
        let wal = path.with_file_name(STORE_WAL);
        assert!(wal.is_file(), "writer keeps the WAL alive");
        let original = fs::metadata(&wal)
            .and_then(|meta| meta.modified())
            .expect("mtime");

        let mut reader = CursorReader::with_chat_dir(dir.path().to_path_buf());
        let first = reader.list_sessions().expect("list");
        assert_eq!(first.sessions.len(), 1);
        reader.list_sessions().expect("list");
        assert_eq!(reader.cache().stats(), CacheStats { hits: 1, misses: 1 });

        set_mtime(&wal, original + std::time::Duration::from_secs(60));
        reader.list_sessions().expect("list");
        assert_eq!(reader.cache().stats(), CacheStats { hits: 1, misses: 2 });

        set_mtime(&wal, original);
        reader.list_sessions().expect("list");
        assert_eq!(reader.cache().stats(), CacheStats { hits: 2, misses: 2 });
    }

    #[test]
    fn missing_chat_dir_lists_nothing() {
        let dir = tempdir().expect("tempdir");
        let mut reader = CursorReader::with_chat_dir(dir.path().join("absent"));
        let listing = reader.list_sessions().expect("list");
        assert!(listing.sessions.is_empty());
    }

    #[test]
    fn interpolation_spreads_between_created_and_modified() {
        let created = Utc.timestamp_millis_opt(0).single().expect("ts");
        let modified = Utc.timestamp_millis_opt(10_000).single().expect("ts");
        let mut messages: Vec<ChatMessage> = (0..3)
            .map(|_| ChatMessage {
                role: MessageRole::User,
                text: String::new(),
                timestamp: None,
            })
            .collect();
        interpolate_timestamps(&mut messages, Some(created), Some(modified));
        let millis: Vec<i64> = messages
            .iter()
            .filter_map(|m| m.timestamp.map(|ts| ts.timestamp_millis()))
            .collect();
        assert_eq!(millis, vec![0, 5_000, 10_000]);

        let mut single = vec![messages[0].clone()];
        interpolate_timestamps(&mut single, Some(created), Some(modified));
        assert_eq!(single[0].timestamp, Some(created));
    }
}

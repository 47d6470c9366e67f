mod notes;
mod undo;

pub use notes::{
    derive_title, ActionKind, ActionLogEntry, Note, NoteListing, NoteStore, NoteView,
    ENTITY_TYPE_NOTES,
};
pub use undo::{UndoAction, UndoEntry, UndoStack, UNDO_LIMIT};

use sidecar_core::error::{classify_io, Classify, ErrorClass};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TODOS_DIR: &str = ".todos";
pub const NOTES_DB_FILE: &str = "issues.db";
pub const ROOT_REDIRECT_FILE: &str = ".td-root";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("note {0} not found")]
    NotFound(String),
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => match err.code {
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    ErrorClass::CorruptRecord
                }
                rusqlite::ErrorCode::CannotOpen => ErrorClass::SourceVanished,
                _ => ErrorClass::TransientIo,
            },
            StorageError::Sqlite(_) => ErrorClass::TransientIo,
            StorageError::Io { source, .. } => classify_io(source),
            StorageError::Serialization(_) | StorageError::Timestamp(_) => {
                ErrorClass::CorruptRecord
            }
            StorageError::NotFound(_) => ErrorClass::SourceVanished,
        }
    }
}

/// Notes database location: an explicit path (relative to the project root
/// when not absolute), else `.todos/issues.db` under the root named by a
/// `.td-root` redirect file, else under the project root itself.
pub fn resolve_db_path(project_root: &Path, configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_root.join(path)
        };
    }

    let redirect = project_root.join(ROOT_REDIRECT_FILE);
    let base = std::fs::read_to_string(&redirect)
        .ok()
        .map(|contents| contents.trim().to_string())
        .filter(|target| !target.is_empty())
        .map(|target| {
            let target = PathBuf::from(target);
            if target.is_absolute() {
                target
            } else {
                project_root.join(target)
            }
        })
        .unwrap_or_else(|| project_root.to_path_buf());

    base.join(TODOS_DIR).join(NOTES_DB_FILE)
}

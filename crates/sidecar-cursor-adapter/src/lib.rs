mod blobs;
mod cache;
mod reader;

pub use blobs::{decode_hex, encode_hex, parse_frame, BlobFrame, BlobWalk, MAX_BLOB_DEPTH};
pub use cache::{CacheStats, SessionCache, StoreSignature};
pub use reader::{
    chat_dir_for, interpolate_timestamps, read_session, ChatMessage, ChatMeta, CursorReader,
    MessageRole, SessionDetail, SessionListing, SessionSummary, STORE_DB, STORE_WAL,
};

use sidecar_core::error::{classify_io, Classify, ErrorClass};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("session metadata missing in {}", .0.display())]
    MissingMeta(PathBuf),
    #[error("corrupt session metadata: {0}")]
    CorruptMeta(String),
}

impl Classify for AdapterError {
    fn class(&self) -> ErrorClass {
        match self {
            AdapterError::Io { source, .. } => classify_io(source),
            AdapterError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::CannotOpen =>
            {
                ErrorClass::SourceVanished
            }
            AdapterError::Sqlite(_) => ErrorClass::TransientIo,
            AdapterError::MissingMeta(_) | AdapterError::CorruptMeta(_) => {
                ErrorClass::CorruptRecord
            }
        }
    }
}

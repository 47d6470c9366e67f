mod filter;
mod fuzzy;
mod ops;
mod preview;
mod project_search;
mod quick_open;
mod scan;
mod search;
mod tree;

pub use filter::{is_system_file, IgnoreRules, BLOCKED_DIRS, SYSTEM_FILES};
pub use fuzzy::{fuzzy_match, FuzzyMatch};
pub use ops::{
    case_only_rename, copy_name, create_dir, create_file, delete_entry, move_entry, paste,
    rename_entry, validate_destination, validate_name, ClipboardMode, MoveOutcome,
};
pub use preview::{
    expand_tabs, human_size, load_preview, wrap_line, PreviewContent, BINARY_SNIFF_BYTES,
    MAX_PREVIEW_BYTES, TAB_WIDTH,
};
pub use project_search::{
    build_pattern, search_project, FileMatches, LineMatch, ResultRow, ResultTree, SearchLimits,
    SearchOptions, SearchResults,
};
pub use quick_open::{QuickOpenHit, QuickOpenIndex, QUICK_OPEN_MAX_FILES};
pub use scan::{ScanBudget, ScanStats};
pub use search::{PreviewMatch, PreviewSearch};
pub use tree::{reveal, FileTree, Node, NodeKind, SortMode, TreeOptions};

use sidecar_core::error::{classify_io, Classify, ErrorClass};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("root {} does not exist", .0.display())]
    MissingRoot(PathBuf),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Classify for ScanError {
    fn class(&self) -> ErrorClass {
        match self {
            ScanError::MissingRoot(_) => ErrorClass::SourceVanished,
            ScanError::Io { source, .. } => classify_io(source),
            ScanError::Pattern(_) => ErrorClass::InvariantViolation,
        }
    }
}

#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("absolute paths are not allowed: {0}")]
    AbsolutePath(String),
    #[error("{} is outside the project", .0.display())]
    OutsideRoot(PathBuf),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileOpError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileOpError::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for FileOpError {
    fn class(&self) -> ErrorClass {
        match self {
            FileOpError::AbsolutePath(_)
            | FileOpError::OutsideRoot(_)
            | FileOpError::InvalidName(_)
            | FileOpError::AlreadyExists(_) => ErrorClass::InvariantViolation,
            FileOpError::NotFound(_) => ErrorClass::SourceVanished,
            FileOpError::Io { source, .. } => classify_io(source),
        }
    }
}

mod backend;
mod editor;
pub mod fake;
mod input;
mod screen;
mod supervisor;

pub use backend::{NewSession, TmuxBackend, TmuxCli, TmuxSessionInfo};
pub use editor::{normalize_editor, save_quit_recipe, EditorKind, KeyStep};
pub use input::{encode_sgr_mouse, ForwardKey, MouseButton, MouseInput, MouseKind};
pub use screen::{CaptureJob, ScreenSnapshot};
pub use supervisor::{
    session_name_for, CloseOutcome, EditSession, OpenRequest, Supervisor, SupervisorEvent,
    CLOSE_TIMEOUT, DRAG_RATE_LIMIT, RESIZE_DEBOUNCE, SESSION_PREFIX,
};

use sidecar_core::error::{classify_io, Classify, ErrorClass};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("tmux is not installed or not on PATH")]
    TmuxUnavailable,
    #[error("tmux {command} failed: {stderr}")]
    Tmux { command: String, stderr: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no session named {0}")]
    UnknownSession(String),
    #[error("invalid terminal size {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },
}

impl Classify for SupervisorError {
    fn class(&self) -> ErrorClass {
        match self {
            SupervisorError::TmuxUnavailable => ErrorClass::SourceVanished,
            SupervisorError::Tmux { .. } => ErrorClass::TransientIo,
            SupervisorError::Io(err) => classify_io(err),
            SupervisorError::UnknownSession(_) => ErrorClass::ChildProcessDied,
            SupervisorError::InvalidSize { .. } => ErrorClass::InvariantViolation,
        }
    }
}

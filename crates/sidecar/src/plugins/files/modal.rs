use super::FilesMsg;
use crate::input::{InputOutcome, LineInput};
use crossterm::event::{KeyCode, KeyEvent};
use sidecar_files::{
    create_dir, create_file, delete_entry, move_entry, paste, rename_entry, validate_destination,
    validate_name, ClipboardMode, MoveOutcome,
};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalKind {
    CreateFile { dir: PathBuf },
    CreateDir { dir: PathBuf },
    Rename { from: PathBuf },
    Move { from: PathBuf },
    Delete { target: PathBuf },
    /// A move named a directory that does not exist yet.
    ConfirmCreateDir { from: PathBuf, dir: PathBuf },
    /// The editor was asked to close but has no save-and-quit recipe.
    UnsavedEditor { session: String, target: PathBuf },
}

/// A file operation in progress. Stays open while the job runs so a failure
/// can be shown where it was asked for.
#[derive(Debug, Clone)]
pub struct FileModal {
    pub kind: ModalKind,
    pub input: LineInput,
    pub error: Option<String>,
    pub busy: bool,
    armed: bool,
}

/// What the pane should do with a key the modal consumed.
#[derive(Debug, PartialEq, Eq)]
pub enum ModalAction {
    None,
    Close,
    Run(FileOp),
    /// Hand the keyboard to the editor so the user saves and quits it.
    AttachEditor(String),
    /// Kill the editor, dropping whatever it has not written.
    DiscardEditor(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    CreateFile(PathBuf),
    CreateDir(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
    Move { from: PathBuf, dir: PathBuf, create_missing: bool },
    Delete(PathBuf),
    Paste { source: PathBuf, dir: PathBuf, mode: ClipboardMode },
}

impl FileModal {
    pub fn new(kind: ModalKind) -> Self {
        let input = match &kind {
            ModalKind::Rename { from } => LineInput::with_text(
                from.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            ModalKind::Move { from } => LineInput::with_text(
                from.parent()
                    .map(|parent| parent.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            _ => LineInput::default(),
        };
        Self {
            kind,
            input,
            error: None,
            busy: false,
            armed: false,
        }
    }

    pub fn title(&self) -> String {
        match &self.kind {
            ModalKind::CreateFile { dir } => format!("New file in {}", display_dir(dir)),
            ModalKind::CreateDir { dir } => format!("New directory in {}", display_dir(dir)),
            ModalKind::Rename { from } => format!("Rename {}", from.display()),
            ModalKind::Move { from } => format!("Move {} to directory", from.display()),
            ModalKind::Delete { target } => format!("Delete {}", target.display()),
            ModalKind::ConfirmCreateDir { dir, .. } => {
                format!("Create missing directory {}?", dir.display())
            }
            ModalKind::UnsavedEditor { target, .. } => {
                format!("Editor for {} cannot be closed for you", target.display())
            }
        }
    }

    pub fn has_input(&self) -> bool {
        matches!(
            self.kind,
            ModalKind::CreateFile { .. }
                | ModalKind::CreateDir { .. }
                | ModalKind::Rename { .. }
                | ModalKind::Move { .. }
        )
    }

    pub fn prompt(&self) -> &'static str {
        match self.kind {
            ModalKind::Delete { .. } if self.armed => "press y again to delete, Esc to cancel",
            ModalKind::Delete { .. } => "delete? y to confirm, Esc to cancel",
            ModalKind::ConfirmCreateDir { .. } => "y to create and move, Esc to cancel",
            ModalKind::UnsavedEditor { .. } => {
                "a to attach and save, d to discard and kill, Esc to leave it running"
            }
            _ => "Enter to confirm, Esc to cancel",
        }
    }

    pub fn handle_key(&mut self, root: &Path, key: KeyEvent) -> ModalAction {
        if self.busy {
            return ModalAction::None;
        }
        if key.code == KeyCode::Esc {
            return ModalAction::Close;
        }
        match self.kind.clone() {
            ModalKind::Delete { target } => match key.code {
                KeyCode::Char('y') | KeyCode::Enter if self.armed => {
                    self.busy = true;
                    ModalAction::Run(FileOp::Delete(target))
                }
                KeyCode::Char('y') | KeyCode::Enter => {
                    self.armed = true;
                    ModalAction::None
                }
                KeyCode::Char('n') => ModalAction::Close,
                _ => ModalAction::None,
            },
            ModalKind::ConfirmCreateDir { from, dir } => match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    self.busy = true;
                    ModalAction::Run(FileOp::Move {
                        from,
                        dir,
                        create_missing: true,
                    })
                }
                KeyCode::Char('n') => ModalAction::Close,
                _ => ModalAction::None,
            },
            ModalKind::UnsavedEditor { session, .. } => match key.code {
                KeyCode::Char('a') | KeyCode::Enter => ModalAction::AttachEditor(session),
                KeyCode::Char('d') => ModalAction::DiscardEditor(session),
                _ => ModalAction::None,
            },
            kind => match self.input.handle(key) {
                InputOutcome::Submit => match self.resolve(root, &kind) {
                    Ok(op) => {
                        self.error = None;
                        self.busy = true;
                        ModalAction::Run(op)
                    }
                    Err(message) => {
                        self.error = Some(message);
                        ModalAction::None
                    }
                },
                InputOutcome::Cancel => ModalAction::Close,
                InputOutcome::Changed => {
                    self.error = None;
                    ModalAction::None
                }
                _ => ModalAction::None,
            },
        }
    }

    /// Validates the typed text into an operation; nothing touches disk here
    /// beyond resolving symlinked ancestors.
    fn resolve(&self, root: &Path, kind: &ModalKind) -> Result<FileOp, String> {
        let text = self.input.text().trim();
        match kind {
            ModalKind::CreateFile { dir } => {
                let rel = validate_destination(root, &join_input(dir, text))
                    .map_err(|err| err.to_string())?;
                Ok(FileOp::CreateFile(rel))
            }
            ModalKind::CreateDir { dir } => {
                let rel = validate_destination(root, &join_input(dir, text))
                    .map_err(|err| err.to_string())?;
                Ok(FileOp::CreateDir(rel))
            }
            ModalKind::Rename { from } => {
                validate_name(text).map_err(|err| err.to_string())?;
                let to = from
                    .parent()
                    .map_or_else(|| PathBuf::from(text), |parent| parent.join(text));
                if &to == from {
                    return Err("name unchanged".to_string());
                }
                Ok(FileOp::Rename {
                    from: from.clone(),
                    to,
                })
            }
            ModalKind::Move { from } => {
                let dir = if text.is_empty() || text == "." {
                    PathBuf::new()
                } else {
                    validate_destination(root, text).map_err(|err| err.to_string())?
                };
                if from.parent() == Some(dir.as_path()) {
                    return Err("already in that directory".to_string());
                }
                Ok(FileOp::Move {
                    from: from.clone(),
                    dir,
                    create_missing: false,
                })
            }
            ModalKind::Delete { .. }
            | ModalKind::ConfirmCreateDir { .. }
            | ModalKind::UnsavedEditor { .. } => {
                Err("no input expected".to_string())
            }
        }
    }

    pub fn failed(&mut self, message: String) {
        self.busy = false;
        self.armed = false;
        self.error = Some(message);
    }
}

fn display_dir(dir: &Path) -> String {
    if dir.as_os_str().is_empty() {
        "/".to_string()
    } else {
        format!("{}/", dir.display())
    }
}

fn join_input(dir: &Path, text: &str) -> String {
    if text.starts_with('/') || text.starts_with('~') || dir.as_os_str().is_empty() {
        text.to_string()
    } else {
        format!("{}/{}", dir.display(), text)
    }
}

/// Runs one operation against the filesystem; called on a job thread.
pub fn run_op(root: &Path, op: FileOp) -> FilesMsg {
    let result = match op {
        FileOp::CreateFile(rel) => create_file(root, &rel).map(|path| done("created", path, None)),
        FileOp::CreateDir(rel) => create_dir(root, &rel).map(|path| done("created", path, None)),
        FileOp::Rename { from, to } => rename_entry(root, &from, &to)
            .map(|path| done("renamed to", path.clone(), Some((from, path)))),
        FileOp::Move {
            from,
            dir,
            create_missing,
        } => match move_entry(root, &from, &dir, create_missing) {
            Ok(MoveOutcome::Moved(path)) => Ok(done("moved to", path.clone(), Some((from, path)))),
            Ok(MoveOutcome::NeedsDirectory(dir)) => {
                return FilesMsg::NeedsDirectory { from, dir };
            }
            Err(err) => Err(err),
        },
        FileOp::Delete(rel) => delete_entry(root, &rel).map(|()| FilesMsg::OperationDone {
            summary: format!("deleted {}", rel.display()),
            select: None,
            renamed: None,
        }),
        FileOp::Paste { source, dir, mode } => paste(root, &source, &dir, mode).map(|path| {
            let renamed = (mode == ClipboardMode::Cut).then(|| (source.clone(), path.clone()));
            done("pasted", path, renamed)
        }),
    };
    result.unwrap_or_else(|err| FilesMsg::OperationFailed(err.to_string()))
}

fn done(verb: &str, path: PathBuf, renamed: Option<(PathBuf, PathBuf)>) -> FilesMsg {
    FilesMsg::OperationDone {
        summary: format!("{verb} {}", path.display()),
        select: Some(path),
        renamed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::from(code)
    }

    fn type_text(modal: &mut FileModal, root: &Path, text: &str) {
        for c in text.chars() {
            modal.handle_key(root, key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn delete_needs_a_second_confirm() {
        let dir = tempdir().expect("tempdir");
        let mut modal = FileModal::new(ModalKind::Delete {
            target: PathBuf::from("a.txt"),
        });
        assert_eq!(modal.handle_key(dir.path(), key(KeyCode::Char('y'))), ModalAction::None);
        assert_eq!(
            modal.handle_key(dir.path(), key(KeyCode::Char('y'))),
            ModalAction::Run(FileOp::Delete(PathBuf::from("a.txt")))
        );
        assert!(modal.busy);
    }

    #[test]
    fn create_rejects_escape_from_root_inline() {
        let dir = tempdir().expect("tempdir");
        let mut modal = FileModal::new(ModalKind::CreateFile {
            dir: PathBuf::new(),
        });
        type_text(&mut modal, dir.path(), "../outside.txt");
        assert_eq!(modal.handle_key(dir.path(), key(KeyCode::Enter)), ModalAction::None);
        assert!(modal.error.is_some());
        assert!(!modal.busy);

        let mut modal = FileModal::new(ModalKind::CreateFile {
            dir: PathBuf::from("src"),
        });
        type_text(&mut modal, dir.path(), "/etc/passwd");
        assert_eq!(modal.handle_key(dir.path(), key(KeyCode::Enter)), ModalAction::None);
        assert!(modal.error.is_some());
    }

    #[test]
    fn rename_prefills_name_and_resolves_sibling() {
        let dir = tempdir().expect("tempdir");
        let mut modal = FileModal::new(ModalKind::Rename {
            from: PathBuf::from("a/B.txt"),
        });
        assert_eq!(modal.input.text(), "B.txt");
        modal.input = LineInput::with_text("b.txt");
        assert_eq!(
            modal.handle_key(dir.path(), key(KeyCode::Enter)),
            ModalAction::Run(FileOp::Rename {
                from: PathBuf::from("a/B.txt"),
                to: PathBuf::from("a/b.txt"),
            })
        );
    }

    #[test]
    fn move_into_missing_directory_asks_first() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("x.txt"), "x").expect("write");
        match run_op(
            root,
            FileOp::Move {
                from: PathBuf::from("x.txt"),
                dir: PathBuf::from("new/dir"),
                create_missing: false,
            },
        ) {
            FilesMsg::NeedsDirectory { from, dir } => {
                assert_eq!(from, PathBuf::from("x.txt"));
                assert_eq!(dir, PathBuf::from("new/dir"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(root.join("x.txt").exists());

        let mut modal = FileModal::new(ModalKind::ConfirmCreateDir {
            from: PathBuf::from("x.txt"),
            dir: PathBuf::from("new/dir"),
        });
        let ModalAction::Run(op) = modal.handle_key(root, key(KeyCode::Char('y'))) else {
            panic!("expected confirm to run the move");
        };
        assert!(matches!(run_op(root, op), FilesMsg::OperationDone { .. }));
        assert!(root.join("new/dir/x.txt").exists());
    }

    #[test]
    fn unsaved_editor_offers_attach_or_discard() {
        let dir = tempdir().expect("tempdir");
        let kind = ModalKind::UnsavedEditor {
            session: "sc-files-1".to_string(),
            target: PathBuf::from("a.txt"),
        };
        let mut modal = FileModal::new(kind.clone());
        assert!(!modal.has_input());
        assert_eq!(modal.handle_key(dir.path(), key(KeyCode::Char('x'))), ModalAction::None);
        assert_eq!(
            modal.handle_key(dir.path(), key(KeyCode::Char('a'))),
            ModalAction::AttachEditor("sc-files-1".to_string())
        );
        let mut modal = FileModal::new(kind);
        assert_eq!(
            modal.handle_key(dir.path(), key(KeyCode::Char('d'))),
            ModalAction::DiscardEditor("sc-files-1".to_string())
        );
        assert_eq!(modal.handle_key(dir.path(), key(KeyCode::Esc)), ModalAction::Close);
    }

    #[test]
    fn failures_come_back_as_messages() {
        let dir = tempdir().expect("tempdir");
        let msg = run_op(dir.path(), FileOp::Delete(PathBuf::from("missing")));
        assert!(matches!(msg, FilesMsg::OperationFailed(text) if text.contains("missing")));
    }
}

//! Notes pane over the SQLite store. Every write goes through a job so the
//! host loop never waits on the database.

use crate::input::{InputOutcome, LineInput, TextArea};
use crate::mouse::{Gesture, HitMap, MouseAction, RegionId};
use crate::plugin::{Command, FollowUp, Pane, PluginCtx, PluginMsg, StatusLine, Toast};
use crate::plugins::{scroll_to_show, SessionView};
use crate::render::{self, highlight, pane_block, visible};
use crate::sessions::{SessionCommand, SessionReply};
use crate::theme::{self, icons};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Paragraph, Widget, Wrap},
};
use sidecar_core::config::resolve_editor;
use sidecar_core::projection::RebuildTicket;
use sidecar_core::watch::{basename_predicate, watch, SourceId, WatchMode, WatchSpec};
use sidecar_core::{
    Debounce, ListProjection, PluginKind, PreservedState, Projection, ProjectionStore, WatchHandle,
};
use sidecar_storage::{
    resolve_db_path, Note, NoteListing, NoteStore, NoteView, StorageError, UndoEntry, UndoStack,
};
use sidecar_supervisor::{normalize_editor, CloseOutcome};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

pub const AUTOSAVE_DELAY: Duration = Duration::from_secs(1);

/// The store behind a mutex so jobs can take turns with it.
#[derive(Clone)]
pub struct SharedStore(Arc<Mutex<NoteStore>>);

impl SharedStore {
    pub fn new(store: NoteStore) -> Self {
        Self(Arc::new(Mutex::new(store)))
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut NoteStore) -> T) -> T {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedStore")
    }
}

#[derive(Debug)]
pub struct Written {
    pub note: Note,
    pub summary: String,
    pub undo: Option<UndoEntry>,
    /// Move the selection to `note` after the reload.
    pub select: bool,
}

#[derive(Debug)]
pub enum NotesMsg {
    Opened {
        path: PathBuf,
        result: Result<SharedStore, String>,
    },
    Listed {
        ticket: RebuildTicket,
        view: NoteView,
        result: Result<NoteListing, String>,
    },
    Written(Result<Written, String>),
    /// Note content written to a scratch file for an external editor.
    Exported {
        note_id: String,
        result: Result<PathBuf, String>,
    },
}

#[derive(Debug)]
enum Mode {
    List,
    Filter,
    Textarea {
        note_id: String,
        area: TextArea,
        dirty: bool,
    },
    /// A vi-family editor running over a scratch copy of the note.
    External {
        note_id: String,
        path: PathBuf,
        view: Option<SessionView>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct NotesLayout {
    list: Rect,
    detail: Rect,
}

pub struct NotesPane {
    ctx: Option<PluginCtx>,
    store: Option<SharedStore>,
    db_path: PathBuf,
    view: NoteView,
    listing: NoteListing,
    projection: ProjectionStore<ListProjection<Note>>,
    state: PreservedState<String>,
    filter: LineInput,
    mode: Mode,
    autosave: Debounce,
    undo: UndoStack,
    watch: Option<WatchHandle>,
    detail_scroll: u16,
    status: StatusLine,
    layout: NotesLayout,
}

impl Default for NotesPane {
    fn default() -> Self {
        Self::new()
    }
}

fn scratch_path(note_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sidecar-{note_id}.md"))
}

/// Writes the scratch file back through the logged update path when the
/// editor changed it.
fn import_scratch(store: &mut NoteStore, note_id: &str, path: &Path) -> Result<Written, StorageError> {
    let content = fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let current = store
        .get(note_id)?
        .ok_or_else(|| StorageError::NotFound(note_id.to_string()))?;
    let written = if current.content == content {
        Written {
            note: current,
            summary: "no changes".to_string(),
            undo: None,
            select: true,
        }
    } else {
        Written {
            note: store.update_content(note_id, &content)?,
            summary: "note saved".to_string(),
            undo: None,
            select: true,
        }
    };
    if let Err(err) = fs::remove_file(path) {
        debug!(path = %path.display(), error = %err, "scratch file not removed");
    }
    Ok(written)
}

impl NotesPane {
    pub fn new() -> Self {
        Self {
            ctx: None,
            store: None,
            db_path: PathBuf::new(),
            view: NoteView::Active,
            listing: NoteListing::default(),
            projection: ProjectionStore::new(ListProjection::default()),
            state: PreservedState::default(),
            filter: LineInput::default(),
            mode: Mode::List,
            autosave: Debounce::new(AUTOSAVE_DELAY),
            undo: UndoStack::default(),
            watch: None,
            detail_scroll: 0,
            status: StatusLine::default(),
            layout: NotesLayout::default(),
        }
    }

    fn notes(&self) -> Arc<ListProjection<Note>> {
        self.projection.snapshot()
    }

    fn selected(&self) -> Option<Note> {
        let notes = self.notes();
        let id = self.state.selected.as_ref()?;
        notes.lookup(id).cloned()
    }

    fn filtered(&self) -> ListProjection<Note> {
        let query = self.filter.text();
        ListProjection::new(
            self.listing
                .notes
                .iter()
                .filter(|note| note.matches(query))
                .cloned()
                .collect(),
        )
    }

    fn apply_filter(&mut self) {
        let filtered = self.filtered();
        self.projection.install(filtered);
        let notes = self.notes();
        self.state.reapply(notes.as_ref());
    }

    fn reload(&mut self) -> FollowUp {
        let Some(store) = self.store.clone() else {
            return FollowUp::None;
        };
        let ticket = self.projection.begin_rebuild();
        let view = self.view;
        FollowUp::spawn("notes.list", move || {
            let result = store
                .with(|store| store.list(view))
                .map_err(|err| err.to_string());
            PluginMsg::Notes(NotesMsg::Listed {
                ticket,
                view,
                result,
            })
        })
    }

    fn mutate<F>(&self, name: &'static str, op: F) -> FollowUp
    where
        F: FnOnce(&mut NoteStore) -> Result<Written, StorageError> + Send + 'static,
    {
        let Some(store) = self.store.clone() else {
            return FollowUp::None;
        };
        FollowUp::spawn(name, move || {
            let result = store.with(op).map_err(|err| err.to_string());
            PluginMsg::Notes(NotesMsg::Written(result))
        })
    }

    fn create(&self, content: String) -> FollowUp {
        self.mutate("notes.create", move |store| {
            let title = sidecar_storage::derive_title(&content);
            let note = store.create(&title, &content)?;
            Ok(Written {
                summary: format!("created \"{}\"", note.title),
                note,
                undo: None,
                select: true,
            })
        })
    }

    fn save_content(&self, note_id: String, content: String) -> FollowUp {
        self.mutate("notes.save", move |store| {
            let note = store.update_content(&note_id, &content)?;
            Ok(Written {
                note,
                summary: "saved".to_string(),
                undo: None,
                select: false,
            })
        })
    }

    fn toggle_pin(&self, note: Note) -> FollowUp {
        self.mutate("notes.pin", move |store| {
            let note = store.toggle_pin(&note.id)?;
            Ok(Written {
                summary: if note.pinned { "pinned" } else { "unpinned" }.to_string(),
                note,
                undo: None,
                select: true,
            })
        })
    }

    fn toggle_archive(&self, before: Note) -> FollowUp {
        self.mutate("notes.archive", move |store| {
            let note = store.toggle_archive(&before.id)?;
            Ok(Written {
                summary: if note.archived { "archived" } else { "unarchived" }.to_string(),
                note,
                undo: Some(UndoEntry::archived(&before)),
                select: false,
            })
        })
    }

    fn delete(&self, note: Note) -> FollowUp {
        self.mutate("notes.delete", move |store| {
            let deleted = store.delete(&note.id)?;
            Ok(Written {
                summary: format!("deleted \"{}\" (u to undo)", deleted.title),
                undo: Some(UndoEntry::deleted(&note)),
                note: deleted,
                select: false,
            })
        })
    }

    fn restore(&self, note: Note) -> FollowUp {
        self.mutate("notes.restore", move |store| {
            let note = store.restore(&note.id)?;
            Ok(Written {
                summary: format!("restored \"{}\"", note.title),
                note,
                undo: None,
                select: false,
            })
        })
    }

    fn undo(&mut self) -> FollowUp {
        let Some(entry) = self.undo.pop() else {
            self.status.info("nothing to undo");
            return FollowUp::None;
        };
        self.mutate("notes.undo", move |store| {
            let note = entry.apply(store)?;
            Ok(Written {
                summary: entry.describe(),
                note,
                undo: None,
                select: false,
            })
        })
    }

    fn cycle_view(&mut self) -> FollowUp {
        self.view = self.view.next();
        self.state = PreservedState::default();
        self.detail_scroll = 0;
        self.reload()
    }

    fn move_selection(&mut self, delta: isize) {
        let notes = self.notes();
        self.state.move_selection(notes.as_ref(), delta);
        self.detail_scroll = 0;
    }

    fn select_index(&mut self, index: usize) {
        let notes = self.notes();
        self.state.select_index(notes.as_ref(), index);
        self.detail_scroll = 0;
    }

    /// Opens the selected note in the textarea, or in an external editor
    /// session when the configured editor is vi-family.
    fn open_editor(&mut self) -> FollowUp {
        let Some(note) = self.selected() else {
            return FollowUp::None;
        };
        let Some(ctx) = &self.ctx else {
            return FollowUp::None;
        };
        let config = ctx.core.plugin_config(PluginKind::Notes);
        let editor = resolve_editor(config.default_editor.as_deref());
        if config.inline_edit_enabled && normalize_editor(&editor).is_vi_family() {
            let path = scratch_path(&note.id);
            self.mode = Mode::External {
                note_id: note.id.clone(),
                path: path.clone(),
                view: None,
            };
            let note_id = note.id.clone();
            return FollowUp::spawn("notes.export", move || {
                let result = fs::write(&path, &note.content)
                    .map(|()| path.clone())
                    .map_err(|err| format!("cannot write {}: {err}", path.display()));
                PluginMsg::Notes(NotesMsg::Exported { note_id, result })
            });
        }
        self.mode = Mode::Textarea {
            note_id: note.id,
            area: TextArea::with_text(&note.content),
            dirty: false,
        };
        FollowUp::None
    }

    /// Leaves the textarea, saving right away when there are unsaved edits.
    fn close_textarea(&mut self) -> FollowUp {
        self.autosave.cancel();
        match std::mem::replace(&mut self.mode, Mode::List) {
            Mode::Textarea {
                note_id,
                area,
                dirty: true,
            } => self.save_content(note_id, area.text()),
            _ => FollowUp::None,
        }
    }

    fn flush_autosave(&mut self, now: Instant) -> FollowUp {
        if !self.autosave.fire_if_due(now) {
            return FollowUp::None;
        }
        match &mut self.mode {
            Mode::Textarea {
                note_id,
                area,
                dirty,
            } if *dirty => {
                *dirty = false;
                let (note_id, text) = (note_id.clone(), area.text());
                self.save_content(note_id, text)
            }
            _ => FollowUp::None,
        }
    }

    fn import_external(&mut self) -> FollowUp {
        let Mode::External { note_id, path, .. } = std::mem::replace(&mut self.mode, Mode::List)
        else {
            return FollowUp::None;
        };
        self.mutate("notes.import", move |store| import_scratch(store, &note_id, &path))
    }

    fn session_view_mut(&mut self) -> Option<&mut SessionView> {
        match &mut self.mode {
            Mode::External { view, .. } => view.as_mut(),
            _ => None,
        }
    }

    fn on_listed(
        &mut self,
        ticket: RebuildTicket,
        view: NoteView,
        result: Result<NoteListing, String>,
    ) {
        if view != self.view {
            trace!("listing for a previous view dropped");
            return;
        }
        let listing = match result {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "notes listing failed");
                self.status.error(format!("cannot read notes: {err}"));
                NoteListing::default()
            }
        };
        if listing.skipped > 0 {
            self.status
                .error(format!("{} unreadable notes skipped", listing.skipped));
        }
        let previous = std::mem::replace(&mut self.listing, listing);
        let filtered = self.filtered();
        if self
            .projection
            .install_if_current(ticket, Arc::new(filtered))
            .is_none()
        {
            self.listing = previous;
            trace!("superseded notes listing dropped");
            return;
        }
        let notes = self.notes();
        self.state.reapply(notes.as_ref());
    }

    fn on_written(&mut self, result: Result<Written, String>) -> FollowUp {
        match result {
            Ok(written) => {
                debug!(note_id = %written.note.id, summary = %written.summary, "note written");
                if let Some(entry) = written.undo {
                    self.undo.push(entry);
                }
                if written.select {
                    self.state.selected = Some(written.note.id);
                }
                self.status.info(written.summary);
            }
            Err(err) => {
                warn!(error = %err, "note write failed");
                self.status.error(err);
            }
        }
        self.reload()
    }

    fn on_session(&mut self, reply: SessionReply) -> FollowUp {
        let Some(ctx) = self.ctx.clone() else {
            return FollowUp::None;
        };
        let max_bytes = ctx.core.plugin_config(PluginKind::Notes).tmux_capture_max_bytes;
        match reply {
            SessionReply::Opened { result, .. } => match result {
                Ok(session) => {
                    if let Mode::External { view, .. } = &mut self.mode {
                        let mut session_view = SessionView::new(&session.name, session.cols, session.rows);
                        session_view.attach(&ctx.sessions);
                        session_view.force_capture(&ctx.sessions, max_bytes);
                        *view = Some(session_view);
                    } else {
                        ctx.sessions.send(SessionCommand::Kill { name: session.name });
                    }
                }
                Err(err) => {
                    self.mode = Mode::List;
                    self.status.error(format!("cannot start editor: {err}"));
                }
            },
            SessionReply::Captured { name, result } => {
                if let Some(view) = self.session_view_mut().filter(|view| view.name == name) {
                    if let Err(err) = view.on_captured(result) {
                        debug!(session = %name, error = %err, "capture failed");
                    }
                }
            }
            SessionReply::Resized { name, .. } => {
                if let Some(view) = self.session_view_mut().filter(|view| view.name == name) {
                    view.force_capture(&ctx.sessions, max_bytes);
                }
            }
            SessionReply::Closed { outcome, .. } => {
                if outcome == CloseOutcome::NeedsPrompt {
                    self.status.error("editor cannot be closed automatically; quit it with i");
                    return FollowUp::None;
                }
                return self.import_external();
            }
            SessionReply::InlineEditExited { .. } => return self.import_external(),
            SessionReply::Failed { error, .. } => self.status.error(error),
            SessionReply::Adopted { .. } | SessionReply::Foreign(_) => {}
        }
        FollowUp::None
    }

    fn handle_list_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        let page = self.layout.list.height.max(1) as isize;
        Some(match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                self.move_selection(1);
                FollowUp::None
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.move_selection(-1);
                FollowUp::None
            }
            KeyCode::PageDown => {
                self.move_selection(page);
                FollowUp::None
            }
            KeyCode::PageUp => {
                self.move_selection(-page);
                FollowUp::None
            }
            KeyCode::Char('g') | KeyCode::Home => {
                self.select_index(0);
                FollowUp::None
            }
            KeyCode::Char('G') | KeyCode::End => {
                self.select_index(usize::MAX);
                FollowUp::None
            }
            KeyCode::Char('/') => {
                self.mode = Mode::Filter;
                FollowUp::None
            }
            KeyCode::Esc if !self.filter.is_empty() => {
                self.filter.clear();
                self.apply_filter();
                FollowUp::None
            }
            KeyCode::Char('n') => self.create(String::new()),
            KeyCode::Enter | KeyCode::Char('e') if self.view == NoteView::Active => self.open_editor(),
            KeyCode::Char('v') => self.cycle_view(),
            KeyCode::Char('u') => self.undo(),
            KeyCode::Char('p') => match self.selected() {
                Some(note) => self.toggle_pin(note),
                None => FollowUp::None,
            },
            KeyCode::Char('a') => match self.selected() {
                Some(note) => self.toggle_archive(note),
                None => FollowUp::None,
            },
            KeyCode::Char('d') if self.view != NoteView::Deleted => match self.selected() {
                Some(note) => self.delete(note),
                None => FollowUp::None,
            },
            KeyCode::Char('r') if self.view == NoteView::Deleted => match self.selected() {
                Some(note) => self.restore(note),
                None => FollowUp::None,
            },
            KeyCode::Char('J') => {
                self.detail_scroll = self.detail_scroll.saturating_add(1);
                FollowUp::None
            }
            KeyCode::Char('K') => {
                self.detail_scroll = self.detail_scroll.saturating_sub(1);
                FollowUp::None
            }
            _ => return None,
        })
    }

    /// Enter on the filter opens the exact title match, or creates a note
    /// from the query when nothing matches.
    fn submit_filter(&mut self) -> FollowUp {
        let query = self.filter.text().trim().to_string();
        self.mode = Mode::List;
        if query.is_empty() {
            return FollowUp::None;
        }
        let wanted = query.to_lowercase();
        let notes = self.notes();
        let exact = notes
            .records()
            .iter()
            .find(|note| note.title.trim().to_lowercase() == wanted)
            .map(|note| note.id.clone());
        if let Some(id) = exact {
            self.state.selected = Some(id);
            self.state.reapply(notes.as_ref());
            return self.open_editor();
        }
        if notes.is_empty() {
            self.filter.clear();
            self.apply_filter();
            return self.create(query);
        }
        self.open_editor()
    }

    fn draw_list(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let mut title = format!("Notes: {}", self.view.label());
        if !self.filter.is_empty() || matches!(self.mode, Mode::Filter) {
            title.push_str(&format!(" /{}", self.filter.text()));
        }
        let focused = matches!(self.mode, Mode::List | Mode::Filter);
        let block = pane_block(title, theme::border_style(focused));
        let inner = block.inner(area);
        block.render(area, buf);
        self.layout.list = inner;
        hits.register(RegionId::new("list"), inner);

        let notes = self.notes();
        if notes.is_empty() {
            let text = if self.store.is_none() {
                "opening notes..."
            } else if self.filter.is_empty() {
                "no notes (n to create)"
            } else {
                "no match (Enter creates a note)"
            };
            buf.set_string(inner.x, inner.y, visible(text, 0, inner.width as usize), theme::DIM_STYLE);
            return;
        }
        self.state.scroll = scroll_to_show(self.state.scroll, self.state.selected_index, inner.height as usize);
        let width = inner.width as usize;
        for (index, note) in notes
            .records()
            .iter()
            .enumerate()
            .skip(self.state.scroll)
            .take(inner.height as usize)
        {
            let y = inner.y + (index - self.state.scroll) as u16;
            let marker = if note.is_deleted() {
                icons::DELETED
            } else if note.pinned {
                icons::PINNED
            } else if note.archived {
                icons::ARCHIVED
            } else {
                " "
            };
            let date = note.updated_at.format("%m-%d %H:%M").to_string();
            let title = if note.title.is_empty() {
                "(untitled)"
            } else {
                note.title.as_str()
            };
            let room = width.saturating_sub(date.len() + 3);
            let text = format!("{marker} {:<room$} {date}", visible(title, 0, room));
            let style = if index == self.state.selected_index {
                theme::SELECTED_STYLE
            } else {
                theme::zebra_row_style(index)
            };
            let row = Rect::new(inner.x, y, inner.width, 1);
            buf.set_style(row, style);
            buf.set_string(inner.x, y, visible(&text, 0, width), style);
            hits.register(RegionId::item("list.row", index), row);
        }
    }

    fn draw_detail(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let (title, border) = match &self.mode {
            Mode::Textarea { dirty: true, .. } => ("Editing (unsaved)".to_string(), theme::FOCUSED_BORDER),
            Mode::Textarea { .. } => ("Editing".to_string(), theme::FOCUSED_BORDER),
            Mode::External { .. } => (
                "External editor [Ctrl-] to leave]".to_string(),
                theme::INTERACTIVE_BORDER,
            ),
            _ => (
                self.selected()
                    .map_or_else(|| "Note".to_string(), |note| note.title),
                theme::IDLE_BORDER,
            ),
        };
        let block = pane_block(title, border);
        let inner = block.inner(area);
        block.render(area, buf);
        self.layout.detail = inner;
        hits.register(RegionId::new("detail"), inner);

        match &mut self.mode {
            Mode::Textarea { area: text, .. } => {
                text.follow_cursor(inner.height as usize);
                let (row, col) = text.cursor();
                for (index, line) in text
                    .lines()
                    .iter()
                    .enumerate()
                    .skip(text.scroll())
                    .take(inner.height as usize)
                {
                    let y = inner.y + (index - text.scroll()) as u16;
                    let shown = if index == row {
                        let padded = format!("{line} ");
                        highlight(&padded, Style::default(), &[(col, col + 1, theme::SELECTED_STYLE)])
                    } else {
                        Line::from(line.clone())
                    };
                    buf.set_line(inner.x, y, &shown, inner.width);
                }
            }
            Mode::External { view: Some(view), .. } => {
                view.note_viewport(inner);
                view.render(inner, buf);
            }
            Mode::External { view: None, .. } => {
                buf.set_string(inner.x, inner.y, "starting editor...", theme::DIM_STYLE);
            }
            Mode::List | Mode::Filter => {
                let Some(note) = self.selected() else {
                    return;
                };
                let header = Line::from(vec![
                    Span::styled(
                        format!("updated {}", note.updated_at.format("%Y-%m-%d %H:%M")),
                        theme::DIM_STYLE,
                    ),
                    Span::styled(
                        if note.pinned { "  pinned" } else { "" },
                        theme::KEY_STYLE,
                    ),
                ]);
                let mut lines = vec![header, Line::default()];
                lines.extend(note.content.lines().map(|line| Line::from(line.to_string())));
                Paragraph::new(lines)
                    .wrap(Wrap { trim: false })
                    .scroll((self.detail_scroll, 0))
                    .render(inner, buf);
            }
        }
    }
}

impl Pane for NotesPane {
    fn kind(&self) -> PluginKind {
        PluginKind::Notes
    }

    fn title(&self) -> String {
        "Notes".to_string()
    }

    fn init(&mut self, ctx: PluginCtx) {
        let config = ctx.core.plugin_config(PluginKind::Notes);
        self.db_path = resolve_db_path(&ctx.core.project_root, config.db_path.as_deref());
        self.store = None;
        self.listing = NoteListing::default();
        self.projection = ProjectionStore::new(ListProjection::default());
        self.state = PreservedState::default();
        self.mode = Mode::List;
        self.undo.clear();
        self.ctx = Some(ctx);
    }

    fn start(&mut self) -> FollowUp {
        let path = self.db_path.clone();
        FollowUp::spawn("notes.open", move || {
            let result = NoteStore::open(&path)
                .map(SharedStore::new)
                .map_err(|err| err.to_string());
            PluginMsg::Notes(NotesMsg::Opened { path, result })
        })
    }

    fn stop(&mut self) {
        if let Some(mut handle) = self.watch.take() {
            handle.close();
        }
        if let Mode::Textarea { note_id, area, dirty: true } = &self.mode {
            let (note_id, text) = (note_id.clone(), area.text());
            if let Some(store) = &self.store {
                if let Err(err) = store.with(|store| store.update_content(&note_id, &text)) {
                    warn!(error = %err, "unsaved note lost on stop");
                }
            }
        }
        if let Some(ctx) = &self.ctx {
            ctx.sessions.send(SessionCommand::StopOwner);
        }
        self.mode = Mode::List;
        self.store = None;
    }

    fn update(&mut self, msg: PluginMsg) -> FollowUp {
        match msg {
            PluginMsg::Tick(now) => {
                self.status.expire(now);
                if let Some(ctx) = self.ctx.clone() {
                    let max_bytes = ctx.core.plugin_config(PluginKind::Notes).tmux_capture_max_bytes;
                    if let Some(view) = self.session_view_mut() {
                        view.sync_size(&ctx.sessions);
                        view.request_capture(&ctx.sessions, max_bytes);
                    }
                }
                self.flush_autosave(now)
            }
            PluginMsg::Watch(signal) => {
                if signal.terminal {
                    self.status.error("notes database vanished");
                }
                self.reload()
            }
            PluginMsg::Session(reply) => self.on_session(reply),
            PluginMsg::Notes(msg) => match msg {
                NotesMsg::Opened { path, result } => match result {
                    Ok(store) => {
                        info!(path = %path.display(), "notes store ready");
                        self.store = Some(store);
                        self.subscribe(&path);
                        self.reload()
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "notes store unavailable");
                        self.status.error(format!("cannot open notes: {err}"));
                        FollowUp::None
                    }
                },
                NotesMsg::Listed {
                    ticket,
                    view,
                    result,
                } => {
                    self.on_listed(ticket, view, result);
                    FollowUp::None
                }
                NotesMsg::Written(result) => self.on_written(result),
                NotesMsg::Exported { note_id, result } => {
                    let path = match result {
                        Ok(path) => path,
                        Err(err) => {
                            self.status.error(err);
                            self.mode = Mode::List;
                            return FollowUp::None;
                        }
                    };
                    let Some(ctx) = &self.ctx else {
                        return FollowUp::None;
                    };
                    let config = ctx.core.plugin_config(PluginKind::Notes);
                    let detail = self.layout.detail;
                    debug!(note_id = %note_id, "opening note in external editor");
                    ctx.sessions.send(SessionCommand::Open {
                        target: path,
                        editor: resolve_editor(config.default_editor.as_deref()),
                        cwd: ctx.core.project_root.clone(),
                        cols: detail.width.max(20),
                        rows: detail.height.max(5),
                    });
                    FollowUp::None
                }
            },
            PluginMsg::Files(_) | PluginMsg::Conversations(_) | PluginMsg::Terminal(_) => {
                FollowUp::None
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        match &mut self.mode {
            Mode::Textarea { area, dirty, .. } => {
                match area.handle(key) {
                    InputOutcome::Cancel => return Some(self.close_textarea()),
                    InputOutcome::Changed => {
                        *dirty = true;
                        self.autosave.poke(Instant::now());
                    }
                    _ => {}
                }
                Some(FollowUp::None)
            }
            Mode::External { view, .. } => {
                let ctx = self.ctx.clone()?;
                match view {
                    Some(view) if view.is_interactive() => {
                        view.handle_key(&ctx.sessions, key);
                    }
                    Some(view) if matches!(key.code, KeyCode::Char('i') | KeyCode::Enter) => {
                        view.attach(&ctx.sessions);
                    }
                    Some(view) if key.code == KeyCode::Char('E') => {
                        ctx.sessions.send(SessionCommand::Close {
                            name: view.name.clone(),
                        });
                    }
                    _ => {}
                }
                Some(FollowUp::None)
            }
            Mode::Filter => {
                match self.filter.handle(key) {
                    InputOutcome::Changed => self.apply_filter(),
                    InputOutcome::Submit => return Some(self.submit_filter()),
                    InputOutcome::Cancel => {
                        self.filter.clear();
                        self.apply_filter();
                        self.mode = Mode::List;
                    }
                    InputOutcome::Moved | InputOutcome::Ignored => {}
                }
                Some(FollowUp::None)
            }
            Mode::List => self.handle_list_key(key),
        }
    }

    fn handle_mouse(&mut self, action: MouseAction) -> FollowUp {
        if let Mode::External { view: Some(view), .. } = &mut self.mode {
            if view.is_interactive() {
                if let Some(ctx) = &self.ctx {
                    view.handle_mouse(&ctx.sessions, &action, self.layout.detail);
                }
                return FollowUp::None;
            }
        }
        match action.gesture {
            Gesture::Press { clicks, .. } if action.is_in("list.row") => {
                if let Some(index) = action.item() {
                    self.select_index(index);
                    if clicks >= 2 && matches!(self.mode, Mode::List) {
                        return self.open_editor();
                    }
                }
                FollowUp::None
            }
            Gesture::Scroll { dy, .. } if action.is_in("list") || action.is_in("list.row") => {
                self.move_selection(dy as isize);
                FollowUp::None
            }
            Gesture::Scroll { dy, .. } if action.is_in("detail") => {
                self.detail_scroll = (self.detail_scroll as i32 + dy as i32 * 3).max(0) as u16;
                FollowUp::None
            }
            _ => FollowUp::None,
        }
    }

    fn render(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        if area.width < 10 || area.height < 3 {
            return;
        }
        let body = Rect::new(area.x, area.y, area.width, area.height - 1);
        let list_width = (body.width * 2 / 5).max(20).min(body.width);
        self.draw_list(Rect::new(body.x, body.y, list_width, body.height), buf, hits);
        if body.width > list_width {
            let detail = Rect::new(body.x + list_width, body.y, body.width - list_width, body.height);
            self.draw_detail(detail, buf, hits);
        }
        let line = match self.status.current() {
            Some(toast) => render::toast_line(Some(toast)),
            None => Line::from(Span::styled(
                format!(
                    "{} notes  {} undo",
                    self.notes().len(),
                    self.undo.len()
                ),
                theme::DIM_STYLE,
            )),
        };
        buf.set_line(area.x, area.y + area.height - 1, &line, area.width);
    }

    fn focus(&self) -> &'static str {
        match &self.mode {
            Mode::List => "list",
            Mode::Filter => "filter",
            Mode::Textarea { .. } => "editor",
            Mode::External { view: Some(view), .. } if view.is_interactive() => "session",
            Mode::External { .. } => "session-idle",
        }
    }

    fn commands(&self) -> Vec<Command> {
        match self.focus() {
            "filter" => vec![
                Command::new("type", "Filter title and content"),
                Command::new("Enter", "Open exact match or create"),
                Command::new("Esc", "Clear filter"),
            ],
            "editor" => vec![
                Command::new("type", "Edit; autosaves after 1s"),
                Command::new("Esc", "Save and close"),
            ],
            "session" => vec![Command::new("Ctrl-]", "Return to pane")],
            "session-idle" => vec![
                Command::new("i", "Attach editor"),
                Command::new("E", "Save and close editor"),
            ],
            _ => vec![
                Command::new("j / k", "Move"),
                Command::new("Enter / e", "Edit"),
                Command::new("n", "New note"),
                Command::new("/", "Filter"),
                Command::new("p", "Pin"),
                Command::new("a", "Archive"),
                Command::new("d", "Delete"),
                Command::new("r", "Restore (deleted view)"),
                Command::new("u", "Undo"),
                Command::new("v", "Cycle view"),
                Command::new("J / K", "Scroll note"),
            ],
        }
    }

    fn status(&self) -> Option<&Toast> {
        self.status.current()
    }
}

impl NotesPane {
    fn subscribe(&mut self, db_path: &Path) {
        let (Some(ctx), Some(dir), Some(name)) = (
            &self.ctx,
            db_path.parent(),
            db_path.file_name().and_then(|name| name.to_str()),
        ) else {
            return;
        };
        let wal = format!("{name}-wal");
        let spec = WatchSpec {
            root: dir.to_path_buf(),
            mode: WatchMode::Directory,
            debounce: ctx.core.plugin_config(PluginKind::Notes).watch_debounce,
            predicate: basename_predicate(&[name, wal.as_str()]),
        };
        match watch(SourceId::new("notes"), spec, ctx.outbox.watch_sink()) {
            Ok(handle) => self.watch = Some(handle),
            Err(err) => warn!(error = %err, "notes watch unavailable"),
        }
    }
}

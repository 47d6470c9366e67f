//! Tree browser with tabbed preview, quick-open, project search, modal file
//! operations and inline editing through the session worker.

mod modal;
mod overlay;
mod view;

use crate::input::InputOutcome;
use crate::mouse::{Gesture, HitMap, MouseAction};
use crate::plugin::{Command, FollowUp, Pane, PluginCtx, PluginMsg, StatusLine, Toast};
use crate::plugins::SessionView;
use crate::sessions::{SessionCommand, SessionReply};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use modal::{run_op, FileModal, FileOp, ModalAction, ModalKind};
use overlay::{ProjectSearch, QuickOpen};
use ratatui::{buffer::Buffer, layout::Rect};
use sidecar_core::projection::RebuildTicket;
use sidecar_core::watch::{any_path, excluding_components, watch, SourceId, WatchMode, WatchSpec};
use sidecar_core::{
    config::resolve_editor, Classify, ErrorClass, PluginKind, PreservedState, Projection,
    ProjectionStore, SelectionState, Signal, TabSet, TextPos, WatchHandle,
};
use sidecar_files::{
    load_preview, reveal, search_project, ClipboardMode, FileTree, IgnoreRules, PreviewContent,
    PreviewSearch, QuickOpenIndex, ResultTree, ScanError, SearchLimits, TreeOptions, BLOCKED_DIRS,
    MAX_PREVIEW_BYTES,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_DIVIDER: u16 = 32;
pub const MIN_TREE_WIDTH: u16 = 12;
pub const MIN_PREVIEW_WIDTH: u16 = 20;
const DIVIDER_STEP: u16 = 2;

/// A rebuild that produced no tree. `vanished` means the project root itself
/// is gone; anything else leaves the installed tree alone.
#[derive(Debug, Clone)]
pub struct TreeFailure {
    pub message: String,
    pub vanished: bool,
}

impl From<ScanError> for TreeFailure {
    fn from(err: ScanError) -> Self {
        Self {
            vanished: err.class() == ErrorClass::SourceVanished,
            message: err.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum FilesMsg {
    TreeBuilt {
        ticket: RebuildTicket,
        result: Result<Arc<FileTree>, TreeFailure>,
        /// Tab targets that exist on disk but sit under collapsed directories.
        live_targets: HashSet<PathBuf>,
    },
    PreviewLoaded {
        path: PathBuf,
        result: Result<PreviewContent, String>,
    },
    QuickOpenIndexed(Result<QuickOpenIndex, String>),
    ProjectSearchDone {
        generation: u64,
        result: Result<ResultTree, String>,
    },
    OperationDone {
        summary: String,
        select: Option<PathBuf>,
        renamed: Option<(PathBuf, PathBuf)>,
    },
    NeedsDirectory {
        from: PathBuf,
        dir: PathBuf,
    },
    OperationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Tree,
    Preview,
}

#[derive(Debug, Default)]
enum Overlay {
    #[default]
    None,
    QuickOpen(QuickOpen),
    Search(ProjectSearch),
    Modal(FileModal),
}

/// Geometry from the last render, used to map mouse positions back.
#[derive(Debug, Clone, Default)]
struct FilesLayout {
    area: Rect,
    tree: Rect,
    preview_body: Rect,
    /// (logical line, first char) for each visible preview row.
    display_rows: Vec<(usize, usize)>,
    overlay_rows: usize,
}

pub struct FileBrowser {
    ctx: Option<PluginCtx>,
    store: ProjectionStore<FileTree>,
    state: PreservedState<PathBuf>,
    options: TreeOptions,
    rules: Arc<IgnoreRules>,
    watch: Option<WatchHandle>,
    tabs: TabSet<PathBuf, PreviewContent>,
    preview_error: Option<(PathBuf, String)>,
    search: PreviewSearch,
    selection: SelectionState,
    focus: Focus,
    overlay: Overlay,
    clipboard_mode: ClipboardMode,
    divider: u16,
    dragging_divider: bool,
    wrap: bool,
    edits: HashMap<String, SessionView>,
    pending_line: Option<(PathBuf, usize)>,
    status: StatusLine,
    layout: FilesLayout,
}

impl Default for FileBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBrowser {
    pub fn new() -> Self {
        Self {
            ctx: None,
            store: ProjectionStore::new(FileTree::empty(Path::new("."), TreeOptions::default())),
            state: PreservedState::default(),
            options: TreeOptions::default(),
            rules: Arc::new(IgnoreRules::none()),
            watch: None,
            tabs: TabSet::new(),
            preview_error: None,
            search: PreviewSearch::default(),
            selection: SelectionState::default(),
            focus: Focus::Tree,
            overlay: Overlay::None,
            clipboard_mode: ClipboardMode::Copy,
            divider: DEFAULT_DIVIDER,
            dragging_divider: false,
            wrap: false,
            edits: HashMap::new(),
            pending_line: None,
            status: StatusLine::default(),
            layout: FilesLayout::default(),
        }
    }

    fn root(&self) -> PathBuf {
        self.ctx
            .as_ref()
            .map(|ctx| ctx.core.project_root.clone())
            .unwrap_or_default()
    }

    fn tree(&self) -> Arc<FileTree> {
        self.store.snapshot()
    }

    fn selected_dir(&self) -> PathBuf {
        let tree = self.tree();
        match self.state.selected.as_ref().and_then(|path| tree.get(path)) {
            Some(node) if node.is_dir() => node.path.clone(),
            Some(node) => node.path.parent().map(Path::to_path_buf).unwrap_or_default(),
            None => PathBuf::new(),
        }
    }

    fn active_lines(&self) -> &[String] {
        self.tabs
            .active()
            .and_then(|tab| tab.cache.as_ref())
            .map_or(&[], PreviewContent::lines)
    }

    fn active_session(&self) -> Option<&str> {
        self.tabs.active().and_then(|tab| tab.edit_session.as_deref())
    }

    fn active_view_mut(&mut self) -> Option<&mut SessionView> {
        let name = self.tabs.active()?.edit_session.clone()?;
        self.edits.get_mut(&name)
    }

    fn is_editing(&self) -> bool {
        self.active_session()
            .and_then(|name| self.edits.get(name))
            .is_some_and(SessionView::is_interactive)
    }

    fn rebuild(&mut self) -> FollowUp {
        let Some(ctx) = &self.ctx else {
            return FollowUp::None;
        };
        let ticket = self.store.begin_rebuild();
        let root = ctx.core.project_root.clone();
        let options = self.options;
        let expanded = self.state.expanded.clone();
        let rules = Arc::clone(&self.rules);
        let targets: Vec<PathBuf> = self.tabs.tabs().iter().map(|tab| tab.target.clone()).collect();
        FollowUp::spawn("files.rebuild", move || {
            let result = FileTree::build(&root, options, &expanded, &rules)
                .map(Arc::new)
                .map_err(TreeFailure::from);
            let live_targets = targets
                .into_iter()
                .filter(|target| root.join(target).exists())
                .collect();
            PluginMsg::Files(FilesMsg::TreeBuilt {
                ticket,
                result,
                live_targets,
            })
        })
    }

    fn load_active_preview(&mut self) -> FollowUp {
        let Some(tab) = self.tabs.active() else {
            return FollowUp::None;
        };
        let rel = tab.target.clone();
        let abs = self.root().join(&rel);
        FollowUp::spawn("files.preview", move || {
            let result = load_preview(&abs, MAX_PREVIEW_BYTES).map_err(|err| err.to_string());
            PluginMsg::Files(FilesMsg::PreviewLoaded { path: rel, result })
        })
    }

    /// Detaches sessions that are no longer on screen after a tab switch.
    fn detach_hidden_sessions(&mut self) {
        let visible = self.active_session().map(str::to_string);
        let Some(ctx) = &self.ctx else {
            return;
        };
        for (name, view) in &mut self.edits {
            if Some(name) != visible.as_ref() {
                view.detach(&ctx.sessions);
            }
        }
    }

    fn tab_changed(&mut self) -> FollowUp {
        self.search.clear();
        self.selection.clear();
        self.detach_hidden_sessions();
        match self.tabs.active() {
            Some(tab) if tab.cache.is_none() => self.load_active_preview(),
            _ => FollowUp::None,
        }
    }

    /// Shows the selected file in the preview slot unless a pinned tab is
    /// active. Directories leave the preview alone.
    fn preview_selected(&mut self) -> FollowUp {
        let Some(selected) = self.state.selected.clone() else {
            return FollowUp::None;
        };
        let tree = self.tree();
        if !tree.get(&selected).is_some_and(|node| !node.is_dir()) {
            return FollowUp::None;
        }
        let before = self.tabs.active().map(|tab| tab.target.clone());
        self.tabs.preview(selected.clone());
        if before.as_ref() == Some(&selected) {
            return FollowUp::None;
        }
        self.tab_changed()
    }

    fn follow_selection(&mut self) {
        let height = self.layout.tree.height as usize;
        self.state.follow_selection(height.max(1));
    }

    fn move_selection(&mut self, delta: isize) -> FollowUp {
        let tree = self.tree();
        self.state.move_selection(tree.as_ref(), delta);
        self.follow_selection();
        self.preview_selected()
    }

    fn select_index(&mut self, index: usize) -> FollowUp {
        let tree = self.tree();
        self.state.select_index(tree.as_ref(), index);
        self.follow_selection();
        self.preview_selected()
    }

    fn set_expanded(&mut self, path: &Path, expanded: bool) -> FollowUp {
        let changed = if expanded {
            self.state.expanded.insert(path.to_path_buf())
        } else {
            self.state.expanded.remove(path)
        };
        if changed {
            self.rebuild()
        } else {
            FollowUp::None
        }
    }

    /// Enter on the tree: directories toggle, files open as pinned tabs.
    fn activate_selected(&mut self) -> FollowUp {
        let tree = self.tree();
        let Some(node) = self.state.selected.as_ref().and_then(|path| tree.get(path)) else {
            return FollowUp::None;
        };
        let path = node.path.clone();
        if node.is_dir() {
            let expand = !tree.is_expanded(&path);
            return self.set_expanded(&path, expand);
        }
        self.open_tab(path)
    }

    fn open_tab(&mut self, path: PathBuf) -> FollowUp {
        self.tabs.open(path);
        self.focus = Focus::Preview;
        self.tab_changed()
    }

    fn collapse_or_parent(&mut self) -> FollowUp {
        let tree = self.tree();
        let Some(selected) = self.state.selected.clone() else {
            return FollowUp::None;
        };
        if tree.is_expanded(&selected) {
            return self.set_expanded(&selected, false);
        }
        match tree.parent_of(&selected) {
            Some(parent) if !parent.path.as_os_str().is_empty() => {
                let index = tree.index_of(&parent.path);
                match index {
                    Some(index) => self.select_index(index),
                    None => FollowUp::None,
                }
            }
            _ => FollowUp::None,
        }
    }

    fn close_tab(&mut self, index: usize) -> FollowUp {
        let Some(tab) = self.tabs.close(index) else {
            return FollowUp::None;
        };
        if let (Some(name), Some(ctx)) = (tab.edit_session, &self.ctx) {
            ctx.sessions.send(SessionCommand::Close { name });
        }
        self.tab_changed()
    }

    fn adjust_divider(&mut self, width: u16) {
        let total = self.layout.area.width;
        let max = match total {
            0 => u16::MAX,
            total => total.saturating_sub(MIN_PREVIEW_WIDTH).max(MIN_TREE_WIDTH),
        };
        self.divider = width.clamp(MIN_TREE_WIDTH, max);
    }

    fn persist_divider(&self) -> FollowUp {
        FollowUp::Persist {
            key: "divider_width",
            value: toml::Value::Integer(i64::from(self.divider)),
        }
    }

    fn run(&self, op: FileOp) -> FollowUp {
        let root = self.root();
        FollowUp::spawn("files.op", move || PluginMsg::Files(run_op(&root, op)))
    }

    fn open_modal(&mut self, kind: ModalKind) -> FollowUp {
        self.overlay = Overlay::Modal(FileModal::new(kind));
        FollowUp::None
    }

    fn start_quick_open(&mut self) -> FollowUp {
        let Some(ctx) = &self.ctx else {
            return FollowUp::None;
        };
        let config = ctx.core.plugin_config(PluginKind::Files);
        let (max_files, timeout) = (config.quick_open_max_files, config.quick_open_timeout);
        let root = ctx.core.project_root.clone();
        let rules = Arc::clone(&self.rules);
        self.overlay = Overlay::QuickOpen(QuickOpen::default());
        FollowUp::spawn("files.quick_open", move || {
            let result =
                QuickOpenIndex::build(&root, &rules, max_files, timeout).map_err(|err| err.to_string());
            PluginMsg::Files(FilesMsg::QuickOpenIndexed(result))
        })
    }

    fn run_project_search(&self, generation: u64, search: &ProjectSearch) -> FollowUp {
        let root = self.root();
        let rules = Arc::clone(&self.rules);
        let query = search.input.text().to_string();
        let options = search.options;
        FollowUp::spawn("files.project_search", move || {
            let result = search_project(&root, &rules, &query, options, SearchLimits::default())
                .map(ResultTree::new)
                .map_err(|err| err.to_string());
            PluginMsg::Files(FilesMsg::ProjectSearchDone { generation, result })
        })
    }

    /// Opens `path` from a picker: reveals it in the tree, selects it and
    /// pins a tab, optionally scrolled to a one based line.
    fn jump_to(&mut self, path: PathBuf, line: Option<usize>) -> FollowUp {
        self.overlay = Overlay::None;
        reveal(&mut self.state.expanded, &path);
        self.state.selected = Some(path.clone());
        if let Some(line) = line {
            match self.tabs.get_mut(&path) {
                Some(tab) if tab.cache.is_some() => tab.scroll = line.saturating_sub(1),
                _ => self.pending_line = Some((path.clone(), line)),
            }
        }
        let opened = self.open_tab(path);
        self.rebuild().and(opened)
    }

    fn start_inline_edit(&mut self) -> FollowUp {
        let Some(ctx) = &self.ctx else {
            return FollowUp::None;
        };
        let config = ctx.core.plugin_config(PluginKind::Files);
        if !config.inline_edit_enabled {
            self.status.error("inline editing is disabled");
            return FollowUp::None;
        }
        let tree = self.tree();
        let target = match self.focus {
            Focus::Preview => self.tabs.active().map(|tab| tab.target.clone()),
            Focus::Tree => self.state.selected.clone(),
        };
        let Some(target) = target else {
            return FollowUp::None;
        };
        if tree.get(&target).is_some_and(|node| node.is_dir()) {
            self.status.error("cannot edit a directory");
            return FollowUp::None;
        }
        if let Some(name) = self.tabs.get_mut(&target).and_then(|tab| tab.edit_session.clone()) {
            if let Some(view) = self.edits.get_mut(&name) {
                self.tabs.open(target);
                self.focus = Focus::Preview;
                view.attach(&ctx.sessions);
                return FollowUp::None;
            }
        }
        let body = self.layout.preview_body;
        let (cols, rows) = (body.width.max(20), body.height.max(5));
        let editor = resolve_editor(config.default_editor.as_deref());
        info!(target = %target.display(), editor = %editor, "starting inline edit");
        ctx.sessions.send(SessionCommand::Open {
            target: ctx.core.project_root.join(&target),
            editor,
            cwd: ctx.core.project_root.clone(),
            cols,
            rows,
        });
        self.tabs.open(target);
        self.focus = Focus::Preview;
        self.status.info("starting editor...");
        self.tab_changed()
    }

    fn on_tree_built(
        &mut self,
        ticket: RebuildTicket,
        result: Result<Arc<FileTree>, TreeFailure>,
        live_targets: HashSet<PathBuf>,
    ) -> FollowUp {
        let tree = match result {
            Ok(tree) => tree,
            Err(failure) => {
                if !self.store.is_current(ticket) {
                    trace!("superseded tree rebuild failure dropped");
                    return FollowUp::None;
                }
                self.status.error(format!("cannot read project: {}", failure.message));
                if !failure.vanished {
                    warn!(error = %failure.message, "file tree rebuild failed; keeping previous tree");
                    return FollowUp::None;
                }
                warn!(error = %failure.message, "project root vanished");
                Arc::new(FileTree::empty(&self.root(), self.options))
            }
        };
        if self.store.install_if_current(ticket, Arc::clone(&tree)).is_none() {
            trace!("superseded tree rebuild dropped");
            return FollowUp::None;
        }
        self.state.reapply(tree.as_ref());
        self.state.expanded = tree.expanded().clone();
        self.follow_selection();

        let removed = self
            .tabs
            .retain_targets(|target| tree.contains(target) || live_targets.contains(target));
        for tab in removed {
            debug!(target = %tab.target.display(), "tab target vanished");
            if let Some(name) = tab.edit_session {
                self.edits.remove(&name);
                if let Some(ctx) = &self.ctx {
                    ctx.sessions.send(SessionCommand::Kill { name });
                }
            }
        }

        let previewed = self.preview_selected();
        if previewed.is_none() {
            self.load_active_preview()
        } else {
            previewed
        }
    }

    fn on_preview_loaded(&mut self, path: PathBuf, result: Result<PreviewContent, String>) {
        let is_active = self.tabs.active().is_some_and(|tab| tab.target == path);
        let pending_line = match &self.pending_line {
            Some((pending, line)) if *pending == path => {
                let line = *line;
                self.pending_line = None;
                Some(line)
            }
            _ => None,
        };
        let Some(tab) = self.tabs.get_mut(&path) else {
            return;
        };
        match result {
            Ok(content) => {
                if is_active {
                    let previous = tab.cache.as_ref().map_or(&[][..], PreviewContent::lines);
                    self.selection.clear_if_touched(previous, content.lines());
                    if self.search.is_active() {
                        self.search.recompute(content.lines());
                    }
                }
                if let Some(line) = pending_line {
                    tab.scroll = line.saturating_sub(1);
                }
                tab.cache = Some(content);
                if self.preview_error.as_ref().is_some_and(|(p, _)| *p == path) {
                    self.preview_error = None;
                }
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "preview failed");
                tab.cache = None;
                self.preview_error = Some((path, err));
            }
        }
    }

    fn on_operation_done(
        &mut self,
        summary: String,
        select: Option<PathBuf>,
        renamed: Option<(PathBuf, PathBuf)>,
    ) -> FollowUp {
        if matches!(self.overlay, Overlay::Modal(_)) {
            self.overlay = Overlay::None;
        }
        self.status.info(summary);
        if let Some((from, to)) = renamed {
            self.tabs.retarget(&from, to.clone());
            let moved: Vec<PathBuf> = self
                .state
                .expanded
                .iter()
                .filter(|path| path.starts_with(&from))
                .cloned()
                .collect();
            for path in moved {
                self.state.expanded.remove(&path);
                if let Ok(rest) = path.strip_prefix(&from) {
                    self.state.expanded.insert(to.join(rest));
                }
            }
            if self.state.clipboard.as_ref() == Some(&from) {
                self.state.clipboard = None;
            }
        }
        if let Some(path) = select {
            reveal(&mut self.state.expanded, &path);
            self.state.selected = Some(path);
        }
        let rebuilt = self.rebuild();
        rebuilt.and(self.load_active_preview())
    }

    fn on_session(&mut self, reply: SessionReply) -> FollowUp {
        let Some(ctx) = self.ctx.clone() else {
            return FollowUp::None;
        };
        let max_bytes = ctx.core.plugin_config(PluginKind::Files).tmux_capture_max_bytes;
        match reply {
            SessionReply::Opened { target, result } => match result {
                Ok(session) => {
                    let rel = ctx
                        .core
                        .relative(&target)
                        .map(Path::to_path_buf)
                        .unwrap_or(target);
                    if self.tabs.find(&rel).is_none() {
                        self.tabs.open(rel.clone());
                    }
                    if let Some(tab) = self.tabs.get_mut(&rel) {
                        tab.edit_session = Some(session.name.clone());
                    }
                    let view = self
                        .edits
                        .entry(session.name.clone())
                        .or_insert_with(|| SessionView::new(&session.name, session.cols, session.rows));
                    view.attach(&ctx.sessions);
                    view.force_capture(&ctx.sessions, max_bytes);
                    self.status.info("editing inline; Ctrl-] returns to the pane");
                }
                Err(err) => self.status.error(format!("cannot start editor: {err}")),
            },
            SessionReply::Captured { name, result } => {
                if let Some(view) = self.edits.get_mut(&name) {
                    if let Err(err) = view.on_captured(result) {
                        debug!(session = %name, error = %err, "capture failed");
                    }
                }
            }
            SessionReply::Resized { name, .. } => {
                if let Some(view) = self.edits.get_mut(&name) {
                    view.force_capture(&ctx.sessions, max_bytes);
                }
            }
            SessionReply::Closed { name, outcome } => {
                if outcome == sidecar_supervisor::CloseOutcome::NeedsPrompt {
                    let target = self
                        .tabs
                        .tabs()
                        .iter()
                        .find(|tab| tab.edit_session.as_deref() == Some(name.as_str()))
                        .map(|tab| tab.target.clone())
                        .unwrap_or_default();
                    self.overlay = Overlay::Modal(FileModal::new(ModalKind::UnsavedEditor {
                        session: name,
                        target,
                    }));
                    return FollowUp::None;
                }
                self.end_session(&name);
                self.status.info(match outcome {
                    sidecar_supervisor::CloseOutcome::Killed => "editor killed after timeout",
                    _ => "editor closed",
                });
                return self.load_active_preview();
            }
            SessionReply::InlineEditExited {
                name,
                target_changed,
                ..
            } => {
                self.end_session(&name);
                self.status.info(if target_changed {
                    "editor exited; changes saved"
                } else {
                    "editor exited"
                });
                return self.load_active_preview();
            }
            SessionReply::Failed { name, error } => {
                warn!(session = ?name, error = %error, "session command failed");
                self.status.error(error);
            }
            SessionReply::Adopted { .. } | SessionReply::Foreign(_) => {}
        }
        FollowUp::None
    }

    fn attach_editor(&mut self, name: &str) -> FollowUp {
        let Some(ctx) = self.ctx.clone() else {
            return FollowUp::None;
        };
        let target = self
            .tabs
            .tabs()
            .iter()
            .find(|tab| tab.edit_session.as_deref() == Some(name))
            .map(|tab| tab.target.clone());
        let Some(view) = self.edits.get_mut(name) else {
            return FollowUp::None;
        };
        view.attach(&ctx.sessions);
        if let Some(target) = target {
            self.tabs.open(target);
        }
        self.focus = Focus::Preview;
        FollowUp::None
    }

    fn discard_editor(&mut self, name: &str) -> FollowUp {
        if let Some(ctx) = &self.ctx {
            ctx.sessions.send(SessionCommand::Kill {
                name: name.to_string(),
            });
        }
        self.end_session(name);
        self.status.info("editor discarded");
        self.load_active_preview()
    }

    /// The child is gone: the tab falls back to read-only preview.
    fn end_session(&mut self, name: &str) {
        self.edits.remove(name);
        let targets: Vec<PathBuf> = self
            .tabs
            .tabs()
            .iter()
            .filter(|tab| tab.edit_session.as_deref() == Some(name))
            .map(|tab| tab.target.clone())
            .collect();
        for target in targets {
            if let Some(tab) = self.tabs.get_mut(&target) {
                tab.edit_session = None;
                tab.cache = None;
            }
        }
    }

    fn on_tick(&mut self, now: Instant) -> FollowUp {
        self.status.expire(now);
        let mut follow = FollowUp::None;
        if let Overlay::Search(search) = &mut self.overlay {
            if let Some(generation) = search.due(now) {
                let search = std::mem::take(search);
                follow = self.run_project_search(generation, &search);
                self.overlay = Overlay::Search(search);
            }
        }
        if let Some(ctx) = self.ctx.clone() {
            let max_bytes = ctx.core.plugin_config(PluginKind::Files).tmux_capture_max_bytes;
            if let Some(view) = self.active_view_mut() {
                view.sync_size(&ctx.sessions);
                view.request_capture(&ctx.sessions, max_bytes);
            }
        }
        follow
    }

    fn scroll_preview(&mut self, lines: isize, cols: isize) {
        let height = self.layout.preview_body.height as usize;
        let wrap = self.wrap;
        let Some(tab) = self.tabs.active_mut() else {
            return;
        };
        let len = tab.cache.as_ref().map_or(0, |content| content.lines().len());
        let max = len.saturating_sub(height.max(1) / 2);
        tab.scroll = (tab.scroll as isize + lines).clamp(0, max as isize) as usize;
        if !wrap {
            tab.h_scroll = (tab.h_scroll as isize + cols).max(0) as usize;
        }
    }

    fn scroll_to_match(&mut self) {
        let Some(found) = self.search.current() else {
            return;
        };
        let height = self.layout.preview_body.height as usize;
        if let Some(tab) = self.tabs.active_mut() {
            if found.line < tab.scroll || found.line >= tab.scroll + height.max(1) {
                tab.scroll = found.line.saturating_sub(height / 3);
            }
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        let root = self.root();
        let now = Instant::now();
        match &mut self.overlay {
            Overlay::None => None,
            Overlay::Modal(modal) => Some(match modal.handle_key(&root, key) {
                ModalAction::None => FollowUp::None,
                ModalAction::Close => {
                    self.overlay = Overlay::None;
                    FollowUp::None
                }
                ModalAction::Run(op) => self.run(op),
                ModalAction::AttachEditor(name) => {
                    self.overlay = Overlay::None;
                    self.attach_editor(&name)
                }
                ModalAction::DiscardEditor(name) => {
                    self.overlay = Overlay::None;
                    self.discard_editor(&name)
                }
            }),
            Overlay::QuickOpen(picker) => Some(match key.code {
                KeyCode::Up => {
                    picker.move_selection(-1);
                    FollowUp::None
                }
                KeyCode::Down => {
                    picker.move_selection(1);
                    FollowUp::None
                }
                _ => match picker.input.handle(key) {
                    InputOutcome::Changed => {
                        picker.refilter();
                        FollowUp::None
                    }
                    InputOutcome::Submit => match picker.chosen() {
                        Some(path) => self.jump_to(path, None),
                        None => FollowUp::None,
                    },
                    InputOutcome::Cancel => {
                        self.overlay = Overlay::None;
                        FollowUp::None
                    }
                    InputOutcome::Moved | InputOutcome::Ignored => FollowUp::None,
                },
            }),
            Overlay::Search(search) => {
                let alt = key.modifiers.contains(KeyModifiers::ALT);
                let toggled = match key.code {
                    KeyCode::Char('r') if alt => {
                        search.options.regex = !search.options.regex;
                        true
                    }
                    KeyCode::Char('c') if alt => {
                        search.options.case_sensitive = !search.options.case_sensitive;
                        true
                    }
                    KeyCode::Char('w') if alt => {
                        search.options.whole_word = !search.options.whole_word;
                        true
                    }
                    _ => false,
                };
                if toggled {
                    let generation = search.rerun();
                    let snapshot = std::mem::take(search);
                    let follow = self.run_project_search(generation, &snapshot);
                    self.overlay = Overlay::Search(snapshot);
                    return Some(follow);
                }
                let nav = search.results.as_mut().and_then(|results| match key.code {
                    KeyCode::Down => {
                        results.next_match();
                        Some(None)
                    }
                    KeyCode::Up => {
                        results.prev_match();
                        Some(None)
                    }
                    KeyCode::Tab => {
                        results.toggle_selected_file();
                        Some(None)
                    }
                    KeyCode::Enter => Some(results.selected_target()),
                    _ => None,
                });
                Some(match nav {
                    Some(Some((path, line))) => self.jump_to(path, Some(line)),
                    Some(None) => FollowUp::None,
                    None => match search.input.handle(key) {
                        InputOutcome::Changed => {
                            search.query_changed(now);
                            FollowUp::None
                        }
                        InputOutcome::Cancel => {
                            self.overlay = Overlay::None;
                            FollowUp::None
                        }
                        _ => FollowUp::None,
                    },
                })
            }
        }
    }

    fn handle_search_input(&mut self, key: KeyEvent) -> bool {
        if !self.search.is_editing() {
            return false;
        }
        let lines = self.active_lines().to_vec();
        match key.code {
            KeyCode::Enter => self.search.commit(),
            KeyCode::Esc => self.search.clear(),
            KeyCode::Backspace => self.search.pop_char(&lines),
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.search.push_char(c, &lines)
            }
            _ => {}
        }
        self.scroll_to_match();
        true
    }

    /// Starts a committed search for the selected text.
    fn search_selection(&mut self) {
        let lines = self.active_lines().to_vec();
        let text = self.selection.extract(&lines);
        let first = text.lines().next().unwrap_or_default().to_string();
        if first.is_empty() {
            return;
        }
        self.search.begin();
        for c in first.chars() {
            self.search.push_char(c, &lines);
        }
        self.search.commit();
        self.selection.clear();
        self.scroll_to_match();
    }

    fn handle_tree_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        let page = self.layout.tree.height.max(1) as isize;
        Some(match key.code {
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(page),
            KeyCode::PageUp => self.move_selection(-page),
            KeyCode::Char('g') | KeyCode::Home => self.select_index(0),
            KeyCode::Char('G') | KeyCode::End => self.select_index(usize::MAX),
            KeyCode::Enter => self.activate_selected(),
            KeyCode::Char('l') | KeyCode::Right => {
                let tree = self.tree();
                match self.state.selected.as_ref().and_then(|path| tree.get(path)) {
                    Some(node) if node.is_dir() => {
                        let path = node.path.clone();
                        self.set_expanded(&path, true)
                    }
                    Some(node) => {
                        let path = node.path.clone();
                        self.open_tab(path)
                    }
                    None => FollowUp::None,
                }
            }
            KeyCode::Char('h') | KeyCode::Left => self.collapse_or_parent(),
            KeyCode::Char(' ') => {
                let tree = self.tree();
                match self.state.selected.as_ref().and_then(|path| tree.get(path)) {
                    Some(node) if node.is_dir() => {
                        let path = node.path.clone();
                        let expand = !tree.is_expanded(&path);
                        self.set_expanded(&path, expand)
                    }
                    _ => FollowUp::None,
                }
            }
            KeyCode::Char('s') => {
                self.options.sort = self.options.sort.next();
                self.status.info(format!("sort: {}", self.options.sort.label()));
                self.rebuild()
            }
            KeyCode::Char('I') => {
                self.options.show_ignored = !self.options.show_ignored;
                self.rebuild()
            }
            KeyCode::Char('.') => {
                self.rules = Arc::new(IgnoreRules::load(&self.root()));
                self.status.info("ignore rules reloaded");
                self.rebuild()
            }
            KeyCode::Char('a') => self.open_modal(ModalKind::CreateFile {
                dir: self.selected_dir(),
            }),
            KeyCode::Char('A') => self.open_modal(ModalKind::CreateDir {
                dir: self.selected_dir(),
            }),
            KeyCode::Char('r') => match self.state.selected.clone() {
                Some(from) => self.open_modal(ModalKind::Rename { from }),
                None => FollowUp::None,
            },
            KeyCode::Char('m') => match self.state.selected.clone() {
                Some(from) => self.open_modal(ModalKind::Move { from }),
                None => FollowUp::None,
            },
            KeyCode::Char('d') => match self.state.selected.clone() {
                Some(target) => self.open_modal(ModalKind::Delete { target }),
                None => FollowUp::None,
            },
            KeyCode::Char(c @ ('y' | 'x')) => {
                if let Some(path) = self.state.selected.clone() {
                    self.clipboard_mode = if c == 'y' {
                        ClipboardMode::Copy
                    } else {
                        ClipboardMode::Cut
                    };
                    self.status.info(format!(
                        "{} {}",
                        if c == 'y' { "copied" } else { "cut" },
                        path.display()
                    ));
                    self.state.clipboard = Some(path);
                }
                FollowUp::None
            }
            KeyCode::Char('p') => match self.state.clipboard.clone() {
                Some(source) => {
                    let mode = self.clipboard_mode;
                    if mode == ClipboardMode::Cut {
                        self.state.clipboard = None;
                    }
                    self.run(FileOp::Paste {
                        source,
                        dir: self.selected_dir(),
                        mode,
                    })
                }
                None => {
                    self.status.error("clipboard is empty");
                    FollowUp::None
                }
            },
            _ => return None,
        })
    }

    fn handle_preview_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        let page = self.layout.preview_body.height.max(1) as isize;
        Some(match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                self.scroll_preview(1, 0);
                FollowUp::None
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.scroll_preview(-1, 0);
                FollowUp::None
            }
            KeyCode::PageDown => {
                self.scroll_preview(page, 0);
                FollowUp::None
            }
            KeyCode::PageUp => {
                self.scroll_preview(-page, 0);
                FollowUp::None
            }
            KeyCode::Char('h') | KeyCode::Left => {
                self.scroll_preview(0, -4);
                FollowUp::None
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.scroll_preview(0, 4);
                FollowUp::None
            }
            KeyCode::Char('g') | KeyCode::Home => {
                if let Some(tab) = self.tabs.active_mut() {
                    tab.scroll = 0;
                }
                FollowUp::None
            }
            KeyCode::Char('G') | KeyCode::End => {
                self.scroll_preview(isize::MAX / 2, 0);
                FollowUp::None
            }
            KeyCode::Char('/') => {
                self.search.begin();
                FollowUp::None
            }
            KeyCode::Char('n') if self.search.is_committed() => {
                self.search.next();
                self.scroll_to_match();
                FollowUp::None
            }
            KeyCode::Char('N') if self.search.is_committed() => {
                self.search.prev();
                self.scroll_to_match();
                FollowUp::None
            }
            KeyCode::Char('y') if self.selection.is_active() => {
                self.search_selection();
                FollowUp::None
            }
            KeyCode::Char('i') | KeyCode::Enter => {
                let Some(ctx) = self.ctx.clone() else {
                    return Some(FollowUp::None);
                };
                if let Some(view) = self.active_view_mut() {
                    view.attach(&ctx.sessions);
                }
                FollowUp::None
            }
            KeyCode::Char('E') => {
                if let (Some(name), Some(ctx)) = (self.active_session(), &self.ctx) {
                    ctx.sessions.send(SessionCommand::Close {
                        name: name.to_string(),
                    });
                    self.status.info("closing editor...");
                }
                FollowUp::None
            }
            KeyCode::Char('W') => {
                self.wrap = !self.wrap;
                if let Some(tab) = self.tabs.active_mut() {
                    tab.h_scroll = 0;
                }
                FollowUp::None
            }
            KeyCode::Esc => {
                if self.search.is_active() {
                    self.search.clear();
                } else if self.selection.is_active() {
                    self.selection.clear();
                } else {
                    self.focus = Focus::Tree;
                }
                FollowUp::None
            }
            _ => return None,
        })
    }

    fn handle_overlay_mouse(&mut self, action: MouseAction) -> FollowUp {
        let activate = matches!(action.gesture, Gesture::Press { clicks, .. } if clicks >= 2);
        let pressed = matches!(action.gesture, Gesture::Press { .. });
        let scroll = match action.gesture {
            Gesture::Scroll { dy, .. } => dy as isize,
            _ => 0,
        };
        match &mut self.overlay {
            Overlay::QuickOpen(picker) => {
                if scroll != 0 {
                    picker.move_selection(scroll);
                } else if let (true, true, Some(item)) =
                    (pressed, action.is_in("overlay.row"), action.item())
                {
                    picker.selected = item.min(picker.hits.len().saturating_sub(1));
                    if activate {
                        if let Some(path) = picker.chosen() {
                            return self.jump_to(path, None);
                        }
                    }
                }
            }
            Overlay::Search(search) => {
                let Some(results) = search.results.as_mut() else {
                    return FollowUp::None;
                };
                if scroll > 0 {
                    results.next_match();
                } else if scroll < 0 {
                    results.prev_match();
                } else if let (true, true, Some(item)) =
                    (pressed, action.is_in("overlay.row"), action.item())
                {
                    results.select_row(item);
                    if activate {
                        if let Some((path, line)) = results.selected_target() {
                            return self.jump_to(path, Some(line));
                        }
                    }
                }
            }
            Overlay::Modal(_) | Overlay::None => {}
        }
        FollowUp::None
    }

    fn text_pos(&self, action: &MouseAction) -> Option<TextPos> {
        let (col, row) = action.local()?;
        let h_scroll = if self.wrap {
            0
        } else {
            self.tabs.active().map_or(0, |tab| tab.h_scroll)
        };
        let (line, start) = *self.layout.display_rows.get(row as usize)?;
        Some(TextPos::new(line, start + col as usize + h_scroll))
    }
}

impl Pane for FileBrowser {
    fn kind(&self) -> PluginKind {
        PluginKind::Files
    }

    fn title(&self) -> String {
        "Files".to_string()
    }

    fn init(&mut self, ctx: PluginCtx) {
        let config = ctx.core.plugin_config(PluginKind::Files);
        self.divider = config.divider_width.unwrap_or(DEFAULT_DIVIDER);
        let root = ctx.core.project_root.clone();
        self.rules = Arc::new(IgnoreRules::load(&root));
        self.store = ProjectionStore::new(FileTree::empty(&root, self.options));
        self.state = PreservedState::default();
        self.tabs = TabSet::new();
        self.edits.clear();
        self.overlay = Overlay::None;
        self.ctx = Some(ctx);
    }

    fn start(&mut self) -> FollowUp {
        let Some(ctx) = &self.ctx else {
            return FollowUp::None;
        };
        let config = ctx.core.plugin_config(PluginKind::Files);
        let spec = WatchSpec {
            root: ctx.core.project_root.clone(),
            mode: WatchMode::Recursive,
            debounce: config.watch_debounce,
            predicate: excluding_components(any_path(), &BLOCKED_DIRS),
        };
        match watch(SourceId::new("files"), spec, ctx.outbox.watch_sink()) {
            Ok(handle) => self.watch = Some(handle),
            Err(err) => {
                warn!(error = %err, "file watch unavailable; refresh with R");
                self.status.error(format!("watch unavailable: {err}"));
            }
        }
        self.rebuild()
    }

    fn stop(&mut self) {
        if let Some(mut handle) = self.watch.take() {
            handle.close();
        }
        if let Some(ctx) = &self.ctx {
            ctx.sessions.send(SessionCommand::StopOwner);
        }
        self.edits.clear();
    }

    fn update(&mut self, msg: PluginMsg) -> FollowUp {
        match msg {
            PluginMsg::Tick(now) => self.on_tick(now),
            PluginMsg::Watch(Signal { terminal, path, .. }) => {
                if terminal {
                    self.status.error(format!("{} vanished", path.display()));
                }
                self.rebuild()
            }
            PluginMsg::Session(reply) => self.on_session(reply),
            PluginMsg::Files(msg) => match msg {
                FilesMsg::TreeBuilt {
                    ticket,
                    result,
                    live_targets,
                } => self.on_tree_built(ticket, result, live_targets),
                FilesMsg::PreviewLoaded { path, result } => {
                    self.on_preview_loaded(path, result);
                    FollowUp::None
                }
                FilesMsg::QuickOpenIndexed(result) => {
                    match (result, &mut self.overlay) {
                        (Ok(index), Overlay::QuickOpen(picker)) => picker.set_index(index),
                        (Ok(_), _) => trace!("quick-open index arrived after close"),
                        (Err(err), _) => self.status.error(format!("quick-open failed: {err}")),
                    }
                    FollowUp::None
                }
                FilesMsg::ProjectSearchDone { generation, result } => {
                    if let Overlay::Search(search) = &mut self.overlay {
                        if !search.accept(generation, result) {
                            trace!(generation, "stale project search dropped");
                        }
                    }
                    FollowUp::None
                }
                FilesMsg::OperationDone {
                    summary,
                    select,
                    renamed,
                } => self.on_operation_done(summary, select, renamed),
                FilesMsg::NeedsDirectory { from, dir } => {
                    self.overlay = Overlay::Modal(FileModal::new(ModalKind::ConfirmCreateDir {
                        from,
                        dir,
                    }));
                    FollowUp::None
                }
                FilesMsg::OperationFailed(err) => {
                    match &mut self.overlay {
                        Overlay::Modal(modal) => modal.failed(err),
                        _ => self.status.error(err),
                    }
                    FollowUp::None
                }
            },
            PluginMsg::Notes(_) | PluginMsg::Conversations(_) | PluginMsg::Terminal(_) => {
                FollowUp::None
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        if let Some(follow) = self.handle_overlay_key(key) {
            return Some(follow);
        }
        if self.is_editing() {
            let ctx = self.ctx.clone()?;
            if let Some(view) = self.active_view_mut() {
                view.handle_key(&ctx.sessions, key);
            }
            return Some(FollowUp::None);
        }
        if self.focus == Focus::Preview && self.handle_search_input(key) {
            return Some(FollowUp::None);
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('p') if ctrl => return Some(self.start_quick_open()),
            KeyCode::Char('f') if ctrl => {
                self.overlay = Overlay::Search(ProjectSearch::default());
                return Some(FollowUp::None);
            }
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Tree => Focus::Preview,
                    Focus::Preview => Focus::Tree,
                };
                return Some(FollowUp::None);
            }
            KeyCode::Char('[') => {
                self.tabs.prev();
                return Some(self.tab_changed());
            }
            KeyCode::Char(']') => {
                self.tabs.next();
                return Some(self.tab_changed());
            }
            KeyCode::Char('c') => {
                let index = self.tabs.active_index()?;
                return Some(self.close_tab(index));
            }
            KeyCode::Char('<') => {
                self.adjust_divider(self.divider.saturating_sub(DIVIDER_STEP));
                return Some(self.persist_divider());
            }
            KeyCode::Char('>') => {
                self.adjust_divider(self.divider + DIVIDER_STEP);
                return Some(self.persist_divider());
            }
            KeyCode::Char('e') => return Some(self.start_inline_edit()),
            _ => {}
        }
        match self.focus {
            Focus::Tree => self.handle_tree_key(key),
            Focus::Preview => self.handle_preview_key(key),
        }
    }

    fn handle_mouse(&mut self, action: MouseAction) -> FollowUp {
        if !matches!(self.overlay, Overlay::None) {
            return self.handle_overlay_mouse(action);
        }
        let editor_gesture =
            action.is_in("preview.body") || matches!(action.gesture, Gesture::Drag | Gesture::Release);
        if self.is_editing() && editor_gesture {
            let body = self.layout.preview_body;
            if let Some(ctx) = self.ctx.clone() {
                if let Some(view) = self.active_view_mut() {
                    view.handle_mouse(&ctx.sessions, &action, body);
                }
            }
            return FollowUp::None;
        }
        match action.gesture {
            Gesture::Press { clicks, .. } => {
                if action.is_in("divider") {
                    self.dragging_divider = true;
                    return FollowUp::None;
                }
                if action.is_in("tree.row") {
                    self.focus = Focus::Tree;
                    let Some(index) = action.item() else {
                        return FollowUp::None;
                    };
                    let selected = self.select_index(index);
                    return if clicks >= 2 {
                        selected.and(self.activate_selected())
                    } else {
                        selected
                    };
                }
                if action.is_in("tab") {
                    if let Some(index) = action.item() {
                        self.tabs.set_active(index);
                        self.focus = Focus::Preview;
                        return self.tab_changed();
                    }
                }
                if action.is_in("preview.body") {
                    self.focus = Focus::Preview;
                    if let Some(pos) = self.text_pos(&action) {
                        self.selection.begin(pos);
                    }
                }
                FollowUp::None
            }
            Gesture::Drag => {
                if self.dragging_divider {
                    let width = action.col.saturating_sub(self.layout.area.x);
                    self.adjust_divider(width);
                    return FollowUp::None;
                }
                if action.is_in("preview.body") {
                    if let Some(pos) = self.text_pos(&action) {
                        self.selection.extend(pos);
                    }
                }
                FollowUp::None
            }
            Gesture::Release => {
                if self.dragging_divider {
                    self.dragging_divider = false;
                    return self.persist_divider();
                }
                if self.selection.is_empty() {
                    self.selection.clear();
                }
                FollowUp::None
            }
            Gesture::Scroll { dx, dy } => {
                if action.is_in("tree") || action.is_in("tree.row") {
                    return self.move_selection(dy as isize * 3);
                }
                if action.is_in("preview.body") || action.is_in("preview") {
                    self.scroll_preview(dy as isize * 3, dx as isize * 4);
                }
                FollowUp::None
            }
            Gesture::Hover => FollowUp::None,
        }
    }

    fn render(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        self.draw(area, buf, hits);
    }

    fn focus(&self) -> &'static str {
        match &self.overlay {
            Overlay::Modal(_) => "modal",
            Overlay::QuickOpen(_) => "quick-open",
            Overlay::Search(_) => "project-search",
            Overlay::None if self.is_editing() => "editor",
            Overlay::None if self.focus == Focus::Preview && self.search.is_editing() => {
                "search-input"
            }
            Overlay::None if self.focus == Focus::Preview => "preview",
            Overlay::None => "tree",
        }
    }

    fn commands(&self) -> Vec<Command> {
        match self.focus() {
            "modal" => vec![
                Command::new("Enter / y", "Confirm"),
                Command::new("Esc", "Cancel"),
            ],
            "quick-open" => vec![
                Command::new("type", "Filter files"),
                Command::new("Up / Down", "Move"),
                Command::new("Enter", "Open"),
                Command::new("Esc", "Close"),
            ],
            "project-search" => vec![
                Command::new("type", "Search project"),
                Command::new("Up / Down", "Next / previous match"),
                Command::new("Tab", "Collapse file"),
                Command::new("Alt-r / Alt-c / Alt-w", "Regex / case / word"),
                Command::new("Enter", "Open match"),
                Command::new("Esc", "Close"),
            ],
            "editor" => vec![Command::new("Ctrl-]", "Return to pane")],
            "search-input" => vec![
                Command::new("type", "Search preview"),
                Command::new("Enter", "Commit, then n / N"),
                Command::new("Esc", "Clear"),
            ],
            "preview" => vec![
                Command::new("j / k", "Scroll"),
                Command::new("h / l", "Scroll sideways"),
                Command::new("/", "Search"),
                Command::new("n / N", "Next / previous match"),
                Command::new("y", "Search selection"),
                Command::new("W", "Toggle wrap"),
                Command::new("e", "Edit inline"),
                Command::new("i", "Attach editor"),
                Command::new("E", "Save and close editor"),
                Command::new("[ / ]", "Previous / next tab"),
                Command::new("c", "Close tab"),
                Command::new("Tab", "Focus tree"),
            ],
            _ => vec![
                Command::new("j / k", "Move"),
                Command::new("Enter", "Open / toggle"),
                Command::new("h / l", "Collapse / expand"),
                Command::new("a / A", "New file / directory"),
                Command::new("r / m / d", "Rename / move / delete"),
                Command::new("y / x / p", "Copy / cut / paste"),
                Command::new("s", "Cycle sort"),
                Command::new("I", "Show ignored"),
                Command::new(".", "Reload .gitignore"),
                Command::new("Ctrl-p", "Quick open"),
                Command::new("Ctrl-f", "Search project"),
                Command::new("< / >", "Resize divider"),
                Command::new("e", "Edit inline"),
                Command::new("Tab", "Focus preview"),
            ],
        }
    }

    fn status(&self) -> Option<&Toast> {
        self.status.current()
    }
}

//! Read-only browser over Cursor CLI chat stores for the current project.

use crate::input::{InputOutcome, LineInput};
use crate::mouse::{Gesture, HitMap, MouseAction, RegionId};
use crate::plugin::{Command, FollowUp, Pane, PluginCtx, PluginMsg, StatusLine, Toast};
use crate::plugins::scroll_to_show;
use crate::render::{self, pane_block, visible};
use crate::theme;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    text::{Line, Span},
    widgets::{Paragraph, Widget, Wrap},
};
use sidecar_core::projection::RebuildTicket;
use sidecar_core::watch::{basename_predicate, watch, SourceId, WatchMode, WatchSpec};
use sidecar_core::{ListProjection, PluginKind, PreservedState, Projection, ProjectionStore, WatchHandle};
use sidecar_cursor_adapter::{
    read_session, CursorReader, MessageRole, SessionDetail, SessionListing, SessionSummary,
    STORE_DB, STORE_WAL,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub enum ConversationsMsg {
    Listed {
        ticket: RebuildTicket,
        result: Result<SessionListing, String>,
    },
    Loaded {
        session_id: String,
        result: Result<SessionDetail, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    List,
    Filter,
    Detail,
}

pub struct ConversationsPane {
    ctx: Option<PluginCtx>,
    reader: Option<Arc<Mutex<CursorReader>>>,
    chat_dir: PathBuf,
    sessions: Vec<SessionSummary>,
    projection: ProjectionStore<ListProjection<SessionSummary>>,
    state: PreservedState<String>,
    filter: LineInput,
    focus: Focus,
    detail: Option<SessionDetail>,
    loading: Option<String>,
    detail_scroll: u16,
    skipped: usize,
    unreadable: usize,
    watch: Option<WatchHandle>,
    last_poll: Option<Instant>,
    status: StatusLine,
    list_area: Rect,
    detail_area: Rect,
}

impl Default for ConversationsPane {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationsPane {
    pub fn new() -> Self {
        Self {
            ctx: None,
            reader: None,
            chat_dir: PathBuf::new(),
            sessions: Vec::new(),
            projection: ProjectionStore::new(ListProjection::default()),
            state: PreservedState::default(),
            filter: LineInput::default(),
            focus: Focus::List,
            detail: None,
            loading: None,
            detail_scroll: 0,
            skipped: 0,
            unreadable: 0,
            watch: None,
            last_poll: None,
            status: StatusLine::default(),
            list_area: Rect::default(),
            detail_area: Rect::default(),
        }
    }

    fn list(&self) -> Arc<ListProjection<SessionSummary>> {
        self.projection.snapshot()
    }

    fn selected(&self) -> Option<SessionSummary> {
        let id = self.state.selected.as_ref()?;
        self.list().lookup(id).cloned()
    }

    fn filtered(&self) -> ListProjection<SessionSummary> {
        let query = self.filter.text().to_lowercase();
        ListProjection::new(
            self.sessions
                .iter()
                .filter(|session| {
                    query.is_empty()
                        || session.name.to_lowercase().contains(&query)
                        || session
                            .first_user_message
                            .as_deref()
                            .is_some_and(|text| text.to_lowercase().contains(&query))
                })
                .cloned()
                .collect(),
        )
    }

    fn refresh(&mut self) -> FollowUp {
        let Some(reader) = self.reader.clone() else {
            return FollowUp::None;
        };
        self.last_poll = Some(Instant::now());
        let ticket = self.projection.begin_rebuild();
        FollowUp::spawn("conversations.list", move || {
            let result = reader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .list_sessions()
                .map_err(|err| err.to_string());
            PluginMsg::Conversations(ConversationsMsg::Listed { ticket, result })
        })
    }

    /// Loads messages for the selection unless they are already shown.
    fn load_selected(&mut self) -> FollowUp {
        let Some(summary) = self.selected() else {
            self.detail = None;
            self.loading = None;
            return FollowUp::None;
        };
        let fresh = self.detail.as_ref().is_some_and(|detail| detail.summary == summary);
        if fresh || self.loading.as_deref() == Some(summary.session_id.as_str()) {
            return FollowUp::None;
        }
        self.loading = Some(summary.session_id.clone());
        FollowUp::spawn("conversations.load", move || {
            let result = read_session(&summary.store_path).map_err(|err| err.to_string());
            PluginMsg::Conversations(ConversationsMsg::Loaded {
                session_id: summary.session_id,
                result,
            })
        })
    }

    fn subscribe(&mut self) {
        if self.watch.is_some() || !self.chat_dir.is_dir() {
            return;
        }
        let Some(ctx) = &self.ctx else {
            return;
        };
        let spec = WatchSpec {
            root: self.chat_dir.clone(),
            mode: WatchMode::Recursive,
            debounce: ctx.core.plugin_config(PluginKind::Conversations).watch_debounce,
            predicate: basename_predicate(&[STORE_DB, STORE_WAL]),
        };
        match watch(SourceId::new("conversations"), spec, ctx.outbox.watch_sink()) {
            Ok(handle) => self.watch = Some(handle),
            Err(err) => warn!(dir = %self.chat_dir.display(), error = %err, "chat watch unavailable"),
        }
    }

    fn apply_filter(&mut self) -> FollowUp {
        self.projection.install(self.filtered());
        let list = self.list();
        self.state.reapply(list.as_ref());
        self.load_selected()
    }

    fn on_listed(&mut self, ticket: RebuildTicket, result: Result<SessionListing, String>) -> FollowUp {
        let listing = match result {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "session listing failed");
                self.status.error(format!("cannot list sessions: {err}"));
                return FollowUp::None;
            }
        };
        let previous = std::mem::replace(&mut self.sessions, listing.sessions);
        if self
            .projection
            .install_if_current(ticket, Arc::new(self.filtered()))
            .is_none()
        {
            self.sessions = previous;
            trace!("superseded session listing dropped");
            return FollowUp::None;
        }
        self.skipped = listing.skipped_records;
        self.unreadable = listing.unreadable_stores;
        if listing.unreadable_stores > 0 {
            self.status
                .error(format!("{} session stores unreadable", listing.unreadable_stores));
        }
        let list = self.list();
        self.state.reapply(list.as_ref());
        self.subscribe();
        // Force a reload when the selected store changed under us.
        if let (Some(detail), Some(summary)) = (&self.detail, self.selected()) {
            if detail.summary != summary {
                self.detail = None;
            }
        }
        self.load_selected()
    }

    fn on_loaded(&mut self, session_id: String, result: Result<SessionDetail, String>) {
        if self.loading.as_deref() == Some(session_id.as_str()) {
            self.loading = None;
        }
        if self.state.selected.as_deref() != Some(session_id.as_str()) {
            trace!(session = %session_id, "detail for a deselected session dropped");
            return;
        }
        match result {
            Ok(detail) => {
                debug!(session = %session_id, messages = detail.messages.len(), "session loaded");
                self.detail = Some(detail);
                self.detail_scroll = 0;
            }
            Err(err) => {
                self.detail = None;
                self.status.error(format!("cannot read session: {err}"));
            }
        }
    }

    fn move_selection(&mut self, delta: isize) -> FollowUp {
        let list = self.list();
        self.state.move_selection(list.as_ref(), delta);
        self.load_selected()
    }

    fn select_index(&mut self, index: usize) -> FollowUp {
        let list = self.list();
        self.state.select_index(list.as_ref(), index);
        self.load_selected()
    }

    fn scroll_detail(&mut self, delta: i32) {
        self.detail_scroll = (i32::from(self.detail_scroll) + delta).max(0) as u16;
    }

    fn draw_list(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let mut title = "Conversations".to_string();
        if !self.filter.is_empty() || self.focus == Focus::Filter {
            title.push_str(&format!(" /{}", self.filter.text()));
        }
        let block = pane_block(title, theme::border_style(self.focus != Focus::Detail));
        let inner = block.inner(area);
        block.render(area, buf);
        self.list_area = inner;
        hits.register(RegionId::new("list"), inner);

        let list = self.list();
        if list.is_empty() {
            let text = if self.reader.is_none() {
                "loading..."
            } else if self.sessions.is_empty() {
                "no Cursor sessions for this project"
            } else {
                "no match"
            };
            buf.set_string(inner.x, inner.y, visible(text, 0, inner.width as usize), theme::DIM_STYLE);
            return;
        }
        let height = inner.height as usize;
        self.state.scroll = scroll_to_show(self.state.scroll, self.state.selected_index, height);
        let width = inner.width as usize;
        for (index, session) in list.records().iter().enumerate().skip(self.state.scroll).take(height) {
            let y = inner.y + (index - self.state.scroll) as u16;
            let when = session
                .updated_at
                .map(|at| at.format("%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let room = width.saturating_sub(when.len() + 1);
            let text = format!("{:<room$} {when}", visible(&session.name, 0, room));
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
        let title = self
            .detail
            .as_ref()
            .map_or_else(|| "Session".to_string(), |detail| detail.summary.name.clone());
        let block = pane_block(title, theme::border_style(self.focus == Focus::Detail));
        let inner = block.inner(area);
        block.render(area, buf);
        self.detail_area = inner;
        hits.register(RegionId::new("detail"), inner);

        let Some(detail) = &self.detail else {
            let text = if self.loading.is_some() { "loading..." } else { "" };
            buf.set_string(inner.x, inner.y, text, theme::DIM_STYLE);
            return;
        };
        let summary = &detail.summary;
        let mut lines = vec![Line::from(Span::styled(
            format!(
                "{} messages  model {}",
                summary.message_count,
                summary.model.as_deref().unwrap_or("-")
            ),
            theme::DIM_STYLE,
        ))];
        for message in &detail.messages {
            lines.push(Line::default());
            let style = match message.role {
                MessageRole::User => theme::KEY_STYLE,
                MessageRole::Assistant => theme::INFO_STYLE,
                MessageRole::Tool => theme::DIM_STYLE,
            };
            let when = message
                .timestamp
                .map(|at| at.format(" %H:%M").to_string())
                .unwrap_or_default();
            lines.push(Line::from(Span::styled(
                format!("{}{when}", message.role.label()),
                style,
            )));
            lines.extend(message.text.lines().map(|line| Line::from(line.to_string())));
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .scroll((self.detail_scroll, 0))
            .render(inner, buf);
    }
}

impl Pane for ConversationsPane {
    fn kind(&self) -> PluginKind {
        PluginKind::Conversations
    }

    fn title(&self) -> String {
        "Conversations".to_string()
    }

    fn init(&mut self, ctx: PluginCtx) {
        let reader = CursorReader::new(&ctx.core.home, &ctx.core.project_root);
        self.chat_dir = reader.chat_dir().to_path_buf();
        self.reader = Some(Arc::new(Mutex::new(reader)));
        self.sessions.clear();
        self.projection = ProjectionStore::new(ListProjection::default());
        self.state = PreservedState::default();
        self.detail = None;
        self.loading = None;
        self.focus = Focus::List;
        self.ctx = Some(ctx);
    }

    fn start(&mut self) -> FollowUp {
        debug!(dir = %self.chat_dir.display(), "reading cursor sessions");
        self.subscribe();
        self.refresh()
    }

    fn stop(&mut self) {
        if let Some(mut handle) = self.watch.take() {
            handle.close();
        }
        self.reader = None;
    }

    fn update(&mut self, msg: PluginMsg) -> FollowUp {
        match msg {
            PluginMsg::Tick(now) => {
                self.status.expire(now);
                // Without a watch the chat directory is polled until it appears.
                let Some(ctx) = &self.ctx else {
                    return FollowUp::None;
                };
                let interval = ctx.core.plugin_config(PluginKind::Conversations).refresh_interval;
                let due = self
                    .last_poll
                    .map_or(true, |last| now.saturating_duration_since(last) >= interval);
                if self.watch.is_none() && due {
                    return self.refresh();
                }
                FollowUp::None
            }
            PluginMsg::Watch(signal) => {
                if signal.terminal {
                    self.watch = None;
                }
                self.refresh()
            }
            PluginMsg::Conversations(ConversationsMsg::Listed { ticket, result }) => {
                self.on_listed(ticket, result)
            }
            PluginMsg::Conversations(ConversationsMsg::Loaded { session_id, result }) => {
                self.on_loaded(session_id, result);
                FollowUp::None
            }
            PluginMsg::Session(_)
            | PluginMsg::Files(_)
            | PluginMsg::Notes(_)
            | PluginMsg::Terminal(_) => FollowUp::None,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        if self.focus == Focus::Filter {
            return Some(match self.filter.handle(key) {
                InputOutcome::Changed => self.apply_filter(),
                InputOutcome::Submit => {
                    self.focus = Focus::List;
                    FollowUp::None
                }
                InputOutcome::Cancel => {
                    self.filter.clear();
                    self.focus = Focus::List;
                    self.apply_filter()
                }
                InputOutcome::Moved | InputOutcome::Ignored => FollowUp::None,
            });
        }
        let page = self.detail_area.height.max(1) as i32;
        if self.focus == Focus::Detail {
            match key.code {
                KeyCode::Char('j') | KeyCode::Down => self.scroll_detail(1),
                KeyCode::Char('k') | KeyCode::Up => self.scroll_detail(-1),
                KeyCode::PageDown | KeyCode::Char(' ') => self.scroll_detail(page),
                KeyCode::PageUp => self.scroll_detail(-page),
                KeyCode::Char('g') => self.detail_scroll = 0,
                KeyCode::Esc | KeyCode::Char('h') | KeyCode::Left => self.focus = Focus::List,
                _ => return None,
            }
            return Some(FollowUp::None);
        }
        Some(match key.code {
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('g') | KeyCode::Home => self.select_index(0),
            KeyCode::Char('G') | KeyCode::End => self.select_index(usize::MAX),
            KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => {
                self.focus = Focus::Detail;
                self.load_selected()
            }
            KeyCode::Char('/') => {
                self.focus = Focus::Filter;
                FollowUp::None
            }
            KeyCode::Esc if !self.filter.is_empty() => {
                self.filter.clear();
                self.apply_filter()
            }
            KeyCode::Char('r') => self.refresh(),
            _ => return None,
        })
    }

    fn handle_mouse(&mut self, action: MouseAction) -> FollowUp {
        match action.gesture {
            Gesture::Press { clicks, .. } if action.is_in("list.row") => {
                let Some(index) = action.item() else {
                    return FollowUp::None;
                };
                let follow = self.select_index(index);
                self.focus = if clicks >= 2 { Focus::Detail } else { Focus::List };
                follow
            }
            Gesture::Press { .. } if action.is_in("detail") => {
                self.focus = Focus::Detail;
                FollowUp::None
            }
            Gesture::Scroll { dy, .. } if action.is_in("detail") => {
                self.scroll_detail(i32::from(dy) * 3);
                FollowUp::None
            }
            Gesture::Scroll { dy, .. } if action.is_in("list") || action.is_in("list.row") => {
                self.move_selection(dy as isize)
            }
            _ => FollowUp::None,
        }
    }

    fn render(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        if area.width < 10 || area.height < 3 {
            return;
        }
        let body = Rect::new(area.x, area.y, area.width, area.height - 1);
        let list_width = (body.width * 2 / 5).max(24).min(body.width);
        self.draw_list(Rect::new(body.x, body.y, list_width, body.height), buf, hits);
        if body.width > list_width {
            let detail = Rect::new(body.x + list_width, body.y, body.width - list_width, body.height);
            self.draw_detail(detail, buf, hits);
        }
        let line = match self.status.current() {
            Some(toast) => render::toast_line(Some(toast)),
            None => {
                let mut text = format!("{} sessions", self.sessions.len());
                if self.skipped > 0 {
                    text.push_str(&format!("  {} records skipped", self.skipped));
                }
                if self.unreadable > 0 {
                    text.push_str(&format!("  {} stores unreadable", self.unreadable));
                }
                Line::from(Span::styled(text, theme::DIM_STYLE))
            }
        };
        buf.set_line(area.x, area.y + area.height - 1, &line, area.width);
    }

    fn focus(&self) -> &'static str {
        match self.focus {
            Focus::List => "list",
            Focus::Filter => "filter",
            Focus::Detail => "detail",
        }
    }

    fn commands(&self) -> Vec<Command> {
        match self.focus {
            Focus::Filter => vec![
                Command::new("type", "Filter by name or first message"),
                Command::new("Enter", "Keep filter"),
                Command::new("Esc", "Clear filter"),
            ],
            Focus::Detail => vec![
                Command::new("j / k", "Scroll"),
                Command::new("PgDn / PgUp", "Page"),
                Command::new("Esc", "Back to list"),
            ],
            Focus::List => vec![
                Command::new("j / k", "Move"),
                Command::new("Enter", "Read session"),
                Command::new("/", "Filter"),
                Command::new("r", "Refresh"),
            ],
        }
    }

    fn status(&self) -> Option<&Toast> {
        self.status.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::{harness, Harness};
    use crossterm::event::KeyModifiers;
    use rusqlite::Connection;
    use sidecar_core::SidecarConfig;
    use sidecar_cursor_adapter::{chat_dir_for, encode_hex};
    use std::collections::VecDeque;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn drive(pane: &mut ConversationsPane, follow: FollowUp) {
        let mut pending: VecDeque<PluginMsg> = follow.run_inline().into();
        while let Some(msg) = pending.pop_front() {
            pending.extend(pane.update(msg).run_inline());
        }
    }

    /// A store with one user message, one assistant message and one corrupt
    /// blob.
    fn seed(chat_dir: &Path, session: &str, name: &str, created_ms: i64) {
        let dir = chat_dir.join(session);
        fs::create_dir_all(&dir).expect("session dir");
        let conn = Connection::open(dir.join(STORE_DB)).expect("open");
        conn.execute_batch(
            "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE blobs (id TEXT PRIMARY KEY, data BLOB);",
        )
        .expect("schema");
        let id = |n: u8| encode_hex(&[n; 32]);
        let meta = format!(
            r#"{{"latestRootBlobId":"{}","name":"{name}","createdAt":{created_ms}}}"#,
            id(0)
        );
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('0', ?1)",
            [encode_hex(meta.as_bytes())],
        )
        .expect("meta");
        let mut root = Vec::new();
        for child in 1..=3u8 {
            root.extend_from_slice(&[0x0A, 0x20]);
            root.extend_from_slice(&[child; 32]);
        }
        let blobs: Vec<(String, Vec<u8>)> = vec![
            (id(0), root),
            (id(1), br#"{"role":"user","content":"explain the bus"}"#.to_vec()),
            (id(2), br#"{"role":"assistant","content":"It is bounded."}"#.to_vec()),
            (id(3), b"{broken".to_vec()),
        ];
        for (blob, data) in blobs {
            conn.execute(
                "INSERT INTO blobs (id, data) VALUES (?1, ?2)",
                rusqlite::params![blob, data],
            )
            .expect("blob");
        }
    }

    fn started(sessions: &[(&str, &str)]) -> (TempDir, Harness, ConversationsPane) {
        let dir = tempdir().expect("tempdir");
        let chat_dir = chat_dir_for(dir.path(), dir.path());
        for (index, (session, name)) in sessions.iter().enumerate() {
            seed(&chat_dir, session, name, 1_700_000_000_000 + index as i64);
        }
        let h = harness(PluginKind::Conversations, dir.path(), SidecarConfig::default());
        let mut pane = ConversationsPane::new();
        pane.init(h.ctx.clone());
        let follow = pane.start();
        drive(&mut pane, follow);
        (dir, h, pane)
    }

    fn screen_text(buf: &Buffer) -> String {
        buf.content.iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn lists_sessions_and_loads_the_selected_detail() {
        let (_dir, _h, pane) = started(&[("chat-a", "Bus design"), ("chat-b", "Tree sort")]);
        assert_eq!(pane.list().len(), 2);
        assert_eq!(pane.skipped, 2);
        let detail = pane.detail.as_ref().expect("detail loaded");
        assert_eq!(Some(&detail.summary.session_id), pane.state.selected.as_ref());
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[0].text, "explain the bus");
        assert!(pane.watch.is_some());
    }

    #[test]
    fn missing_chat_dir_shows_a_placeholder_and_polls() {
        let (_dir, _h, mut pane) = started(&[]);
        assert!(pane.watch.is_none());
        assert!(pane.list().is_empty());
        let mut buf = Buffer::empty(Rect::new(0, 0, 80, 10));
        let mut hits = HitMap::default();
        pane.render(buf.area, &mut buf, &mut hits);
        assert!(screen_text(&buf).contains("no Cursor sessions"));

        let interval = SidecarConfig::default()
            .plugin(PluginKind::Conversations)
            .refresh_interval;
        let later = Instant::now() + interval * 2;
        let follow = pane.update(PluginMsg::Tick(later));
        assert_eq!(follow.job_names(), vec!["conversations.list"]);
    }

    #[test]
    fn superseded_listing_is_dropped() {
        let (_dir, _h, mut pane) = started(&[("chat-a", "Bus design")]);
        let stale = pane.projection.begin_rebuild();
        let _current = pane.projection.begin_rebuild();
        let follow = pane.update(PluginMsg::Conversations(ConversationsMsg::Listed {
            ticket: stale,
            result: Ok(SessionListing::default()),
        }));
        assert!(follow.is_none());
        assert_eq!(pane.list().len(), 1);
        assert_eq!(pane.sessions.len(), 1);
    }

    #[test]
    fn filter_narrows_by_name_and_enter_focuses_detail() {
        let (_dir, _h, mut pane) = started(&[("chat-a", "Bus design"), ("chat-b", "Tree sort")]);
        pane.handle_key(key(KeyCode::Char('/')));
        for c in "tree".chars() {
            let follow = pane.handle_key(key(KeyCode::Char(c))).expect("handled");
            drive(&mut pane, follow);
        }
        assert_eq!(pane.list().len(), 1);
        assert_eq!(pane.selected().map(|s| s.name), Some("Tree sort".to_string()));
        pane.handle_key(key(KeyCode::Enter));
        let follow = pane.handle_key(key(KeyCode::Enter)).expect("handled");
        drive(&mut pane, follow);
        assert_eq!(pane.focus(), "detail");
        assert_eq!(
            pane.detail.as_ref().map(|d| d.summary.name.as_str()),
            Some("Tree sort")
        );
    }
}

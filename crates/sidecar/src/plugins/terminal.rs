//! Viewer for tmux sessions this process did not start. Sessions are adopted
//! while shown and released afterwards, never killed.

use crate::mouse::{Gesture, HitMap, MouseAction, RegionId};
use crate::plugin::{Command, FollowUp, Pane, PluginCtx, PluginMsg, StatusLine, Toast};
use crate::plugins::{scroll_to_show, SessionView};
use crate::render::{self, pane_block, visible};
use crate::sessions::{SessionCommand, SessionReply};
use crate::theme::{self, icons};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    text::{Line, Span},
    widgets::Widget,
};
use sidecar_core::PluginKind;
use sidecar_supervisor::TmuxSessionInfo;
use std::time::Instant;
use tracing::{debug, info};

/// Nothing flows through here yet; every reply arrives as a session reply.
#[derive(Debug)]
pub enum TerminalMsg {}

pub struct TerminalPane {
    ctx: Option<PluginCtx>,
    sessions: Vec<TmuxSessionInfo>,
    selected: usize,
    scroll: usize,
    listed: bool,
    last_list: Option<Instant>,
    viewer: Option<SessionView>,
    status: StatusLine,
    list_area: Rect,
    view_area: Rect,
}

impl Default for TerminalPane {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalPane {
    pub fn new() -> Self {
        Self {
            ctx: None,
            sessions: Vec::new(),
            selected: 0,
            scroll: 0,
            listed: false,
            last_list: None,
            viewer: None,
            status: StatusLine::default(),
            list_area: Rect::default(),
            view_area: Rect::default(),
        }
    }

    fn max_bytes(&self) -> usize {
        self.ctx.as_ref().map_or(0, |ctx| {
            ctx.core
                .plugin_config(PluginKind::Terminal)
                .tmux_capture_max_bytes
        })
    }

    fn list(&mut self) {
        if let Some(ctx) = &self.ctx {
            ctx.sessions.send(SessionCommand::ListForeign);
        }
        self.last_list = Some(Instant::now());
    }

    fn selected_name(&self) -> Option<String> {
        self.sessions.get(self.selected).map(|info| info.name.clone())
    }

    fn move_selection(&mut self, delta: isize) {
        if self.sessions.is_empty() {
            return;
        }
        let last = self.sessions.len() - 1;
        self.selected = self.selected.saturating_add_signed(delta).min(last);
    }

    fn open_selected(&mut self) {
        let (Some(name), Some(ctx)) = (self.selected_name(), &self.ctx) else {
            return;
        };
        let area = if self.view_area.width > 0 {
            self.view_area
        } else {
            self.list_area
        };
        ctx.sessions.send(SessionCommand::Adopt {
            name,
            cols: area.width.max(20),
            rows: area.height.max(5),
        });
    }

    /// Hands the viewed session back to tmux untouched.
    fn close_viewer(&mut self) {
        let Some(mut view) = self.viewer.take() else {
            return;
        };
        if let Some(ctx) = &self.ctx {
            view.detach(&ctx.sessions);
            ctx.sessions.send(SessionCommand::Release { name: view.name });
        }
        self.list();
    }

    fn viewer_named(&mut self, name: &str) -> Option<&mut SessionView> {
        self.viewer.as_mut().filter(|view| view.name == name)
    }

    fn on_session(&mut self, reply: SessionReply) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        let max_bytes = self.max_bytes();
        match reply {
            SessionReply::Foreign(Ok(mut sessions)) => {
                sessions.sort_by(|a, b| a.name.cmp(&b.name));
                let keep = self.selected_name();
                self.sessions = sessions;
                self.listed = true;
                self.selected = keep
                    .and_then(|name| self.sessions.iter().position(|info| info.name == name))
                    .unwrap_or_else(|| self.selected.min(self.sessions.len().saturating_sub(1)));
            }
            SessionReply::Foreign(Err(err)) => {
                self.listed = true;
                self.sessions.clear();
                self.status.error(format!("cannot list tmux sessions: {err}"));
            }
            SessionReply::Adopted { name, result } => match result {
                Ok(session) => {
                    info!(session = %name, "viewing tmux session");
                    if let Some(previous) = self.viewer.take() {
                        ctx.sessions.send(SessionCommand::Release { name: previous.name });
                    }
                    let mut view = SessionView::new(session.name, session.cols, session.rows);
                    view.force_capture(&ctx.sessions, max_bytes);
                    self.viewer = Some(view);
                }
                Err(err) => self.status.error(format!("cannot view {name}: {err}")),
            },
            SessionReply::Captured { name, result } => {
                let failed = self
                    .viewer_named(&name)
                    .map(|view| view.on_captured(result))
                    .and_then(Result::err);
                if let Some(err) = failed {
                    debug!(session = %name, error = %err, "capture failed");
                    self.status.error(format!("session {name} is gone"));
                    self.viewer = None;
                    ctx.sessions.send(SessionCommand::Release { name });
                    self.list();
                }
            }
            SessionReply::Resized { name, .. } => {
                if let Some(view) = self.viewer_named(&name) {
                    view.force_capture(&ctx.sessions, max_bytes);
                }
            }
            SessionReply::Closed { name, .. } | SessionReply::InlineEditExited { name, .. } => {
                if self.viewer_named(&name).is_some() {
                    self.viewer = None;
                    self.status.info(format!("session {name} ended"));
                    self.list();
                }
            }
            SessionReply::Failed { error, .. } => self.status.error(error),
            SessionReply::Opened { .. } => {}
        }
    }

    fn draw_list(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let block = pane_block("tmux sessions", theme::border_style(self.viewer.is_none()));
        let inner = block.inner(area);
        block.render(area, buf);
        self.list_area = inner;
        hits.register(RegionId::new("list"), inner);

        if self.sessions.is_empty() {
            let text = if self.listed {
                "no other tmux sessions"
            } else {
                "listing..."
            };
            buf.set_string(inner.x, inner.y, visible(text, 0, inner.width as usize), theme::DIM_STYLE);
            return;
        }
        let height = inner.height as usize;
        self.scroll = scroll_to_show(self.scroll, self.selected, height);
        let width = inner.width as usize;
        let viewing = self.viewer.as_ref().map(|view| view.name.as_str());
        for (index, info) in self.sessions.iter().enumerate().skip(self.scroll).take(height) {
            let y = inner.y + (index - self.scroll) as u16;
            let marker = if viewing == Some(info.name.as_str()) {
                icons::ATTACHED
            } else {
                " "
            };
            let suffix = if info.attached { " (attached)" } else { "" };
            let text = format!("{marker} {} [{}w]{suffix}", info.name, info.windows);
            let style = if index == self.selected {
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

    fn draw_viewer(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let (title, border) = match &self.viewer {
            Some(view) if view.is_interactive() => (
                format!("{} [Ctrl-] to leave]", view.name),
                theme::INTERACTIVE_BORDER,
            ),
            Some(view) => (view.name.clone(), theme::FOCUSED_BORDER),
            None => ("Viewer".to_string(), theme::IDLE_BORDER),
        };
        let block = pane_block(title, border);
        let inner = block.inner(area);
        block.render(area, buf);
        self.view_area = inner;
        hits.register(RegionId::new("viewer"), inner);
        match &mut self.viewer {
            Some(view) => {
                view.note_viewport(inner);
                view.render(inner, buf);
            }
            None => buf.set_string(
                inner.x,
                inner.y,
                visible("Enter views the selected session", 0, inner.width as usize),
                theme::DIM_STYLE,
            ),
        }
    }
}

impl Pane for TerminalPane {
    fn kind(&self) -> PluginKind {
        PluginKind::Terminal
    }

    fn title(&self) -> String {
        "Terminal".to_string()
    }

    fn init(&mut self, ctx: PluginCtx) {
        self.sessions.clear();
        self.selected = 0;
        self.listed = false;
        self.viewer = None;
        self.ctx = Some(ctx);
    }

    fn start(&mut self) -> FollowUp {
        self.list();
        FollowUp::None
    }

    fn stop(&mut self) {
        if let (Some(view), Some(ctx)) = (self.viewer.take(), &self.ctx) {
            ctx.sessions.send(SessionCommand::Release { name: view.name });
        }
    }

    fn update(&mut self, msg: PluginMsg) -> FollowUp {
        match msg {
            PluginMsg::Tick(now) => {
                self.status.expire(now);
                let Some(ctx) = self.ctx.clone() else {
                    return FollowUp::None;
                };
                let max_bytes = self.max_bytes();
                if let Some(view) = &mut self.viewer {
                    view.sync_size(&ctx.sessions);
                    view.request_capture(&ctx.sessions, max_bytes);
                } else {
                    let interval = ctx.core.plugin_config(PluginKind::Terminal).refresh_interval;
                    if self
                        .last_list
                        .map_or(true, |last| now.saturating_duration_since(last) >= interval)
                    {
                        self.list();
                    }
                }
                FollowUp::None
            }
            PluginMsg::Session(reply) => {
                self.on_session(reply);
                FollowUp::None
            }
            PluginMsg::Terminal(msg) => match msg {},
            PluginMsg::Watch(_)
            | PluginMsg::Files(_)
            | PluginMsg::Notes(_)
            | PluginMsg::Conversations(_) => FollowUp::None,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<FollowUp> {
        let ctx = self.ctx.clone()?;
        if let Some(view) = &mut self.viewer {
            if view.handle_key(&ctx.sessions, key) {
                return Some(FollowUp::None);
            }
            let rows = self.view_area.height;
            match key.code {
                KeyCode::Char('i') | KeyCode::Enter => view.attach(&ctx.sessions),
                KeyCode::Char('j') | KeyCode::Down => view.scroll_by(1, rows),
                KeyCode::Char('k') | KeyCode::Up => view.scroll_by(-1, rows),
                KeyCode::PageDown => view.scroll_by(rows as i16, rows),
                KeyCode::PageUp => view.scroll_by(-(rows as i16), rows),
                KeyCode::Esc | KeyCode::Char('x') => self.close_viewer(),
                _ => return None,
            }
            return Some(FollowUp::None);
        }
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('g') | KeyCode::Home => self.selected = 0,
            KeyCode::Char('G') | KeyCode::End => self.move_selection(isize::MAX),
            KeyCode::Enter | KeyCode::Char('l') => self.open_selected(),
            KeyCode::Char('r') => self.list(),
            _ => return None,
        }
        Some(FollowUp::None)
    }

    fn handle_mouse(&mut self, action: MouseAction) -> FollowUp {
        let Some(ctx) = self.ctx.clone() else {
            return FollowUp::None;
        };
        if let Some(view) = &mut self.viewer {
            if view.is_interactive() {
                view.handle_mouse(&ctx.sessions, &action, self.view_area);
                return FollowUp::None;
            }
            if let Gesture::Scroll { dy, .. } = action.gesture {
                if action.is_in("viewer") {
                    view.scroll_by(dy * 3, self.view_area.height);
                    return FollowUp::None;
                }
            }
        }
        match action.gesture {
            Gesture::Press { clicks, .. } if action.is_in("list.row") => {
                if let Some(index) = action.item() {
                    self.selected = index.min(self.sessions.len().saturating_sub(1));
                    if clicks >= 2 {
                        self.open_selected();
                    }
                }
            }
            Gesture::Press { .. } if action.is_in("viewer") => {
                if let Some(view) = &mut self.viewer {
                    view.attach(&ctx.sessions);
                }
            }
            Gesture::Scroll { dy, .. } if action.is_in("list") || action.is_in("list.row") => {
                self.move_selection(dy as isize);
            }
            _ => {}
        }
        FollowUp::None
    }

    fn render(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        if area.width < 10 || area.height < 3 {
            return;
        }
        let body = Rect::new(area.x, area.y, area.width, area.height - 1);
        let list_width = (body.width / 4).max(20).min(body.width);
        self.draw_list(Rect::new(body.x, body.y, list_width, body.height), buf, hits);
        if body.width > list_width {
            let viewer = Rect::new(body.x + list_width, body.y, body.width - list_width, body.height);
            self.draw_viewer(viewer, buf, hits);
        }
        let line = match self.status.current() {
            Some(toast) => render::toast_line(Some(toast)),
            None => Line::from(Span::styled(
                format!("{} sessions", self.sessions.len()),
                theme::DIM_STYLE,
            )),
        };
        buf.set_line(area.x, area.y + area.height - 1, &line, area.width);
    }

    fn focus(&self) -> &'static str {
        match &self.viewer {
            Some(view) if view.is_interactive() => "session",
            Some(_) => "viewer",
            None => "list",
        }
    }

    fn commands(&self) -> Vec<Command> {
        match self.focus() {
            "session" => vec![Command::new("Ctrl-]", "Stop forwarding keys")],
            "viewer" => vec![
                Command::new("i / Enter", "Forward keys to the session"),
                Command::new("j / k", "Scroll"),
                Command::new("Esc", "Close viewer"),
            ],
            _ => vec![
                Command::new("j / k", "Move"),
                Command::new("Enter", "View session"),
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
    use sidecar_core::SidecarConfig;
    use sidecar_supervisor::{EditSession, EditorKind};
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::{tempdir, TempDir};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn sent(h: &Harness) -> Vec<SessionCommand> {
        h.sessions.try_iter().map(|request| request.command).collect()
    }

    fn info(name: &str) -> TmuxSessionInfo {
        TmuxSessionInfo {
            name: name.to_string(),
            windows: 1,
            attached: false,
            created: None,
        }
    }

    fn adopted(name: &str) -> EditSession {
        EditSession {
            name: name.to_string(),
            owner: "terminal".to_string(),
            target: PathBuf::new(),
            editor: String::new(),
            kind: EditorKind::Unknown(String::new()),
            started_at: SystemTime::now(),
            original_mtime: None,
            cols: 60,
            rows: 20,
            attached: false,
            foreign: true,
        }
    }

    fn started() -> (TempDir, Harness, TerminalPane) {
        let dir = tempdir().expect("tempdir");
        let h = harness(PluginKind::Terminal, dir.path(), SidecarConfig::default());
        let mut pane = TerminalPane::new();
        pane.init(h.ctx.clone());
        pane.start();
        (dir, h, pane)
    }

    #[test]
    fn start_lists_foreign_sessions_sorted() {
        let (_dir, h, mut pane) = started();
        assert_eq!(sent(&h), vec![SessionCommand::ListForeign]);
        pane.update(PluginMsg::Session(SessionReply::Foreign(Ok(vec![
            info("work"),
            info("build"),
        ]))));
        let names: Vec<_> = pane.sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["build", "work"]);
    }

    #[test]
    fn enter_adopts_and_escape_releases() {
        let (_dir, h, mut pane) = started();
        pane.update(PluginMsg::Session(SessionReply::Foreign(Ok(vec![info("work")]))));
        sent(&h);

        pane.handle_key(key(KeyCode::Enter));
        assert!(matches!(
            sent(&h).as_slice(),
            [SessionCommand::Adopt { name, .. }] if name == "work"
        ));

        pane.update(PluginMsg::Session(SessionReply::Adopted {
            name: "work".into(),
            result: Ok(adopted("work")),
        }));
        assert_eq!(pane.focus(), "viewer");
        assert!(matches!(
            sent(&h).as_slice(),
            [SessionCommand::Capture { max_bytes, .. }] if *max_bytes == 512 * 1024
        ));

        pane.handle_key(key(KeyCode::Esc));
        assert_eq!(pane.focus(), "list");
        let commands = sent(&h);
        assert!(commands.contains(&SessionCommand::Release { name: "work".into() }));
        assert!(!commands
            .iter()
            .any(|command| matches!(command, SessionCommand::Kill { .. })));
    }

    #[test]
    fn interactive_keys_are_forwarded_until_detach() {
        let (_dir, h, mut pane) = started();
        pane.update(PluginMsg::Session(SessionReply::Adopted {
            name: "work".into(),
            result: Ok(adopted("work")),
        }));
        pane.handle_key(key(KeyCode::Char('i')));
        assert_eq!(pane.focus(), "session");
        sent(&h);

        pane.handle_key(key(KeyCode::Char('q')));
        assert!(matches!(sent(&h).as_slice(), [SessionCommand::Keys { .. }]));

        pane.handle_key(KeyEvent::new(KeyCode::Char(']'), KeyModifiers::CONTROL));
        assert_eq!(pane.focus(), "viewer");
        assert!(matches!(sent(&h).as_slice(), [SessionCommand::Detach { .. }]));
    }

    #[test]
    fn failed_capture_drops_the_viewer() {
        let (_dir, h, mut pane) = started();
        pane.update(PluginMsg::Session(SessionReply::Adopted {
            name: "work".into(),
            result: Ok(adopted("work")),
        }));
        sent(&h);
        pane.update(PluginMsg::Session(SessionReply::Captured {
            name: "work".into(),
            result: Err("no such session".into()),
        }));
        assert_eq!(pane.focus(), "list");
        assert!(pane.status().is_some());
        assert!(sent(&h).contains(&SessionCommand::ListForeign));
    }
}

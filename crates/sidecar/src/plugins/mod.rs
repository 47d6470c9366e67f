pub mod conversations;
pub mod files;
pub mod notes;
pub mod terminal;

use crate::input::{forward_key, is_detach_key, session_mouse};
use crate::mouse::MouseAction;
use crate::render;
use crate::sessions::{SessionCommand, SessionHandle};
use crossterm::event::KeyEvent;
use ratatui::{buffer::Buffer, layout::Rect};
use sidecar_supervisor::ScreenSnapshot;
use tracing::debug;

/// A pane's view of one supervisor session: the last captured screen plus
/// whether keys currently go to the child.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub name: String,
    interactive: bool,
    snapshot: Option<ScreenSnapshot>,
    capture_pending: bool,
    size: (u16, u16),
    wanted: Option<(u16, u16)>,
    scroll: u16,
}

impl SessionView {
    pub fn new(name: impl Into<String>, cols: u16, rows: u16) -> Self {
        Self {
            name: name.into(),
            interactive: false,
            snapshot: None,
            capture_pending: false,
            size: (cols, rows),
            wanted: None,
            scroll: 0,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn snapshot(&self) -> Option<&ScreenSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn attach(&mut self, sessions: &SessionHandle) {
        let (cols, rows) = self.size;
        sessions.send(SessionCommand::Attach {
            name: self.name.clone(),
            cols,
            rows,
        });
        self.interactive = true;
    }

    pub fn detach(&mut self, sessions: &SessionHandle) {
        if self.interactive {
            sessions.send(SessionCommand::Detach {
                name: self.name.clone(),
            });
            self.interactive = false;
        }
    }

    /// At most one capture in flight per session.
    pub fn request_capture(&mut self, sessions: &SessionHandle, max_bytes: usize) {
        if self.capture_pending {
            return;
        }
        self.capture_pending = sessions.send(SessionCommand::Capture {
            name: self.name.clone(),
            max_bytes,
        });
    }

    pub fn force_capture(&mut self, sessions: &SessionHandle, max_bytes: usize) {
        self.capture_pending = false;
        self.request_capture(sessions, max_bytes);
    }

    pub fn on_captured(&mut self, result: Result<ScreenSnapshot, String>) -> Result<(), String> {
        self.capture_pending = false;
        let snapshot = result?;
        if snapshot.truncated {
            debug!(session = %self.name, "capture truncated");
        }
        self.snapshot = Some(snapshot);
        Ok(())
    }

    /// Records the viewport seen at render time; the resize itself is sent
    /// from `sync_size`.
    pub fn note_viewport(&mut self, area: Rect) {
        if area.width == 0 || area.height == 0 {
            return;
        }
        let size = (area.width, area.height);
        self.wanted = (size != self.size).then_some(size);
    }

    pub fn sync_size(&mut self, sessions: &SessionHandle) {
        if let Some((cols, rows)) = self.wanted.take() {
            self.size = (cols, rows);
            sessions.send(SessionCommand::Resize {
                name: self.name.clone(),
                cols,
                rows,
            });
        }
    }

    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    /// Keys while interactive: the detach chord leaves, everything else is
    /// forwarded. Returns false when not interactive.
    pub fn handle_key(&mut self, sessions: &SessionHandle, key: KeyEvent) -> bool {
        if !self.interactive {
            return false;
        }
        if is_detach_key(&key) {
            self.detach(sessions);
            return true;
        }
        if let Some(forwarded) = forward_key(key) {
            sessions.send(SessionCommand::Keys {
                name: self.name.clone(),
                keys: vec![forwarded],
            });
        }
        true
    }

    pub fn handle_mouse(&mut self, sessions: &SessionHandle, action: &MouseAction, viewport: Rect) {
        if !self.interactive {
            return;
        }
        if let Some(input) = session_mouse(action, viewport) {
            sessions.send(SessionCommand::Mouse {
                name: self.name.clone(),
                input,
            });
        }
    }

    /// Scrolls a read-only view of a screen taller than the viewport.
    pub fn scroll_by(&mut self, delta: i16, viewport_rows: u16) {
        let rows = self
            .snapshot
            .as_ref()
            .map_or(0, |snapshot| snapshot.size().0);
        let max = rows.saturating_sub(viewport_rows);
        self.scroll = (self.scroll as i32 + delta as i32).clamp(0, max as i32) as u16;
    }

    pub fn render(&self, area: Rect, buf: &mut Buffer) {
        if let Some(snapshot) = &self.snapshot {
            let cursor = self.interactive.then_some(snapshot.cursor);
            let offset = if self.interactive { 0 } else { self.scroll };
            render::render_screen(&snapshot.screen, offset, cursor, area, buf);
        }
    }
}

/// Scroll offset that keeps `selected` inside a window of `height` rows.
pub fn scroll_to_show(scroll: usize, selected: usize, height: usize) -> usize {
    if height == 0 {
        return scroll;
    }
    if selected < scroll {
        selected
    } else if selected >= scroll + height {
        selected + 1 - height
    } else {
        scroll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_core::{EpochCounter, PluginKind};
    use std::sync::mpsc;

    #[test]
    fn session_view_keeps_one_capture_in_flight() {
        let (tx, rx) = mpsc::channel();
        let sessions = SessionHandle::new(PluginKind::Terminal, EpochCounter::new(), tx);
        let mut view = SessionView::new("work", 80, 24);
        view.request_capture(&sessions, 1024);
        view.request_capture(&sessions, 1024);
        assert_eq!(rx.try_iter().count(), 1);

        assert!(view.on_captured(Err("gone".into())).is_err());
        view.request_capture(&sessions, 1024);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn session_view_resizes_once_per_change() {
        let (tx, rx) = mpsc::channel();
        let sessions = SessionHandle::new(PluginKind::Files, EpochCounter::new(), tx);
        let mut view = SessionView::new("edit", 80, 24);
        view.note_viewport(Rect::new(0, 0, 80, 24));
        view.sync_size(&sessions);
        assert_eq!(rx.try_iter().count(), 0);

        view.note_viewport(Rect::new(0, 0, 100, 30));
        view.sync_size(&sessions);
        view.sync_size(&sessions);
        let sent: Vec<_> = rx.try_iter().map(|request| request.command).collect();
        assert_eq!(
            sent,
            vec![SessionCommand::Resize {
                name: "edit".into(),
                cols: 100,
                rows: 30
            }]
        );
        assert_eq!(view.size(), (100, 30));
    }

    #[test]
    fn detach_chord_leaves_interactive_mode() {
        let (tx, rx) = mpsc::channel();
        let sessions = SessionHandle::new(PluginKind::Files, EpochCounter::new(), tx);
        let mut view = SessionView::new("edit", 80, 24);
        assert!(!view.handle_key(&sessions, KeyEvent::from(crossterm::event::KeyCode::Char('a'))));
        view.attach(&sessions);
        assert!(view.handle_key(&sessions, KeyEvent::from(crossterm::event::KeyCode::Char('a'))));
        assert!(view.handle_key(
            &sessions,
            KeyEvent::new(
                crossterm::event::KeyCode::Char(']'),
                crossterm::event::KeyModifiers::CONTROL
            )
        ));
        assert!(!view.is_interactive());
        let sent: Vec<_> = rx.try_iter().map(|request| request.command).collect();
        assert!(matches!(sent[0], SessionCommand::Attach { .. }));
        assert!(matches!(sent[1], SessionCommand::Keys { .. }));
        assert!(matches!(sent[2], SessionCommand::Detach { .. }));
    }
}

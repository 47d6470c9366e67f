use crate::mouse::{Gesture, MouseAction};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::layout::Rect;
use sidecar_supervisor::{ForwardKey, MouseButton, MouseInput, MouseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Changed,
    Moved,
    Submit,
    Cancel,
    Ignored,
}

/// Single-line text entry used by modals, filters and search prompts.
/// `cursor` counts chars, not bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineInput {
    text: String,
    cursor: usize,
}

impl LineInput {
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let cursor = text.chars().count();
        Self { text, cursor }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    fn byte_at(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map_or(self.text.len(), |(idx, _)| idx)
    }

    pub fn insert(&mut self, c: char) {
        let at = self.byte_at(self.cursor);
        self.text.insert(at, c);
        self.cursor += 1;
    }

    pub fn handle(&mut self, key: KeyEvent) -> InputOutcome {
        let len = self.text.chars().count();
        match key.code {
            KeyCode::Enter => InputOutcome::Submit,
            KeyCode::Esc => InputOutcome::Cancel,
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                let at = self.byte_at(self.cursor);
                self.text.drain(..at);
                self.cursor = 0;
                InputOutcome::Changed
            }
            KeyCode::Char('a') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.cursor = 0;
                InputOutcome::Moved
            }
            KeyCode::Char('e') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.cursor = len;
                InputOutcome::Moved
            }
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                self.insert(c);
                InputOutcome::Changed
            }
            KeyCode::Backspace if self.cursor > 0 => {
                self.cursor -= 1;
                let at = self.byte_at(self.cursor);
                self.text.remove(at);
                InputOutcome::Changed
            }
            KeyCode::Delete if self.cursor < len => {
                let at = self.byte_at(self.cursor);
                self.text.remove(at);
                InputOutcome::Changed
            }
            KeyCode::Left if self.cursor > 0 => {
                self.cursor -= 1;
                InputOutcome::Moved
            }
            KeyCode::Right if self.cursor < len => {
                self.cursor += 1;
                InputOutcome::Moved
            }
            KeyCode::Home => {
                self.cursor = 0;
                InputOutcome::Moved
            }
            KeyCode::End => {
                self.cursor = len;
                InputOutcome::Moved
            }
            _ => InputOutcome::Ignored,
        }
    }
}

fn byte_index(line: &str, col: usize) -> usize {
    line.char_indices().nth(col).map_or(line.len(), |(idx, _)| idx)
}

/// Multi-line editor for note bodies. Esc is the only way out; Enter inserts
/// a newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextArea {
    lines: Vec<String>,
    row: usize,
    col: usize,
    scroll: usize,
}

impl Default for TextArea {
    fn default() -> Self {
        Self {
            lines: vec![String::new()],
            row: 0,
            col: 0,
            scroll: 0,
        }
    }
}

impl TextArea {
    pub fn with_text(text: &str) -> Self {
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// (row, col) in chars.
    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn follow_cursor(&mut self, height: usize) {
        if height == 0 {
            return;
        }
        if self.row < self.scroll {
            self.scroll = self.row;
        } else if self.row >= self.scroll + height {
            self.scroll = self.row + 1 - height;
        }
    }

    fn line_len(&self, row: usize) -> usize {
        self.lines.get(row).map_or(0, |line| line.chars().count())
    }

    pub fn handle(&mut self, key: KeyEvent) -> InputOutcome {
        let len = self.line_len(self.row);
        match key.code {
            KeyCode::Esc => InputOutcome::Cancel,
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                let line = &mut self.lines[self.row];
                let at = byte_index(line, self.col);
                line.insert(at, c);
                self.col += 1;
                InputOutcome::Changed
            }
            KeyCode::Tab => {
                let line = &mut self.lines[self.row];
                let at = byte_index(line, self.col);
                line.insert_str(at, "    ");
                self.col += 4;
                InputOutcome::Changed
            }
            KeyCode::Enter => {
                let line = &mut self.lines[self.row];
                let at = byte_index(line, self.col);
                let rest = line.split_off(at);
                self.row += 1;
                self.col = 0;
                self.lines.insert(self.row, rest);
                InputOutcome::Changed
            }
            KeyCode::Backspace if self.col > 0 => {
                self.col -= 1;
                let line = &mut self.lines[self.row];
                let at = byte_index(line, self.col);
                line.remove(at);
                InputOutcome::Changed
            }
            KeyCode::Backspace if self.row > 0 => {
                let line = self.lines.remove(self.row);
                self.row -= 1;
                self.col = self.line_len(self.row);
                self.lines[self.row].push_str(&line);
                InputOutcome::Changed
            }
            KeyCode::Delete if self.col < len => {
                let line = &mut self.lines[self.row];
                let at = byte_index(line, self.col);
                line.remove(at);
                InputOutcome::Changed
            }
            KeyCode::Delete if self.row + 1 < self.lines.len() => {
                let next = self.lines.remove(self.row + 1);
                self.lines[self.row].push_str(&next);
                InputOutcome::Changed
            }
            KeyCode::Left if self.col > 0 => {
                self.col -= 1;
                InputOutcome::Moved
            }
            KeyCode::Left if self.row > 0 => {
                self.row -= 1;
                self.col = self.line_len(self.row);
                InputOutcome::Moved
            }
            KeyCode::Right if self.col < len => {
                self.col += 1;
                InputOutcome::Moved
            }
            KeyCode::Right if self.row + 1 < self.lines.len() => {
                self.row += 1;
                self.col = 0;
                InputOutcome::Moved
            }
            KeyCode::Up if self.row > 0 => {
                self.row -= 1;
                self.col = self.col.min(self.line_len(self.row));
                InputOutcome::Moved
            }
            KeyCode::Down if self.row + 1 < self.lines.len() => {
                self.row += 1;
                self.col = self.col.min(self.line_len(self.row));
                InputOutcome::Moved
            }
            KeyCode::Home => {
                self.col = 0;
                InputOutcome::Moved
            }
            KeyCode::End => {
                self.col = len;
                InputOutcome::Moved
            }
            _ => InputOutcome::Ignored,
        }
    }
}

/// Leaves an interactive session and returns keys to the pane.
pub fn is_detach_key(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
}

/// Maps a terminal key to what tmux `send-keys` expects.
pub fn forward_key(key: KeyEvent) -> Option<ForwardKey> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let named = |name: &str| Some(ForwardKey::Named(name.to_string()));
    match key.code {
        KeyCode::Char(c) if ctrl => Some(ForwardKey::Ctrl(c)),
        KeyCode::Char(c) if alt => Some(ForwardKey::Alt(c)),
        KeyCode::Char(c) => Some(ForwardKey::Char(c)),
        KeyCode::Enter => named("Enter"),
        KeyCode::Tab => named("Tab"),
        KeyCode::BackTab => named("BTab"),
        KeyCode::Backspace => named("BSpace"),
        KeyCode::Esc => named("Escape"),
        KeyCode::Up => named("Up"),
        KeyCode::Down => named("Down"),
        KeyCode::Left => named("Left"),
        KeyCode::Right => named("Right"),
        KeyCode::Home => named("Home"),
        KeyCode::End => named("End"),
        KeyCode::PageUp => named("PPage"),
        KeyCode::PageDown => named("NPage"),
        KeyCode::Delete => named("DC"),
        KeyCode::Insert => named("IC"),
        KeyCode::F(n) => Some(ForwardKey::Named(format!("F{n}"))),
        _ => None,
    }
}

fn button(button: crossterm::event::MouseButton) -> MouseButton {
    match button {
        crossterm::event::MouseButton::Left => MouseButton::Left,
        crossterm::event::MouseButton::Middle => MouseButton::Middle,
        crossterm::event::MouseButton::Right => MouseButton::Right,
    }
}

/// Converts a routed mouse action to session-relative coordinates. Presses
/// and wheel outside `viewport` are dropped; drags and releases clamp to its
/// edge.
pub fn session_mouse(action: &MouseAction, viewport: Rect) -> Option<MouseInput> {
    if viewport.width == 0 || viewport.height == 0 {
        return None;
    }
    let inside = crate::mouse::contains(viewport, action.col, action.row);
    let kind = match action.gesture {
        Gesture::Press { button: b, .. } if inside => MouseKind::Press(button(b)),
        Gesture::Release => MouseKind::Release(MouseButton::Left),
        Gesture::Drag => MouseKind::Drag(MouseButton::Left),
        Gesture::Hover if inside => MouseKind::Move,
        Gesture::Scroll { dy, .. } if inside && dy < 0 => MouseKind::WheelUp,
        Gesture::Scroll { dy, .. } if inside && dy > 0 => MouseKind::WheelDown,
        Gesture::Scroll { dx, .. } if inside && dx < 0 => MouseKind::WheelLeft,
        Gesture::Scroll { dx, .. } if inside && dx > 0 => MouseKind::WheelRight,
        _ => return None,
    };
    let col = action
        .col
        .clamp(viewport.x, viewport.x + viewport.width - 1)
        - viewport.x;
    let row = action
        .row
        .clamp(viewport.y, viewport.y + viewport.height - 1)
        - viewport.y;
    Some(MouseInput {
        kind,
        col,
        row,
        shift: action.modifiers.contains(KeyModifiers::SHIFT),
        alt: action.modifiers.contains(KeyModifiers::ALT),
        ctrl: action.modifiers.contains(KeyModifiers::CONTROL),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn line_input_edits_at_cursor() {
        let mut input = LineInput::with_text("héllo");
        assert_eq!(input.handle(key(KeyCode::Left)), InputOutcome::Moved);
        assert_eq!(input.handle(key(KeyCode::Backspace)), InputOutcome::Changed);
        assert_eq!(input.text(), "hélo");
        input.handle(key(KeyCode::Home));
        input.handle(key(KeyCode::Char('>')));
        assert_eq!(input.text(), ">hélo");
        assert_eq!(input.cursor(), 1);
        assert_eq!(input.handle(key(KeyCode::Enter)), InputOutcome::Submit);
        assert_eq!(
            input.handle(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL)),
            InputOutcome::Changed
        );
        assert_eq!(input.text(), "hélo");
    }

    #[test]
    fn text_area_splits_and_joins_lines() {
        let mut area = TextArea::with_text("title\nbody");
        area.handle(key(KeyCode::End));
        area.handle(key(KeyCode::Enter));
        area.handle(key(KeyCode::Char('x')));
        assert_eq!(area.text(), "title\nx\nbody");
        assert_eq!(area.cursor(), (1, 1));

        area.handle(key(KeyCode::Home));
        assert_eq!(area.handle(key(KeyCode::Backspace)), InputOutcome::Changed);
        assert_eq!(area.text(), "titlex\nbody");
        assert_eq!(area.cursor(), (0, 5));
        assert_eq!(area.handle(key(KeyCode::Esc)), InputOutcome::Cancel);
    }

    #[test]
    fn keys_map_to_tmux_names() {
        assert_eq!(forward_key(key(KeyCode::Enter)), Some(ForwardKey::Named("Enter".into())));
        assert_eq!(forward_key(key(KeyCode::PageDown)), Some(ForwardKey::Named("NPage".into())));
        assert_eq!(forward_key(key(KeyCode::F(5))), Some(ForwardKey::Named("F5".into())));
        assert_eq!(
            forward_key(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CONTROL)),
            Some(ForwardKey::Ctrl('x'))
        );
        assert_eq!(forward_key(key(KeyCode::Char('q'))), Some(ForwardKey::Char('q')));
    }

    fn action(gesture: Gesture, col: u16, row: u16) -> MouseAction {
        MouseAction {
            gesture,
            region: None,
            col,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    #[test]
    fn mouse_is_translated_into_viewport() {
        let viewport = Rect::new(10, 5, 20, 10);
        let press = action(
            Gesture::Press {
                button: crossterm::event::MouseButton::Left,
                clicks: 1,
            },
            12,
            7,
        );
        let input = session_mouse(&press, viewport).expect("inside");
        assert_eq!((input.col, input.row), (2, 2));
        assert_eq!(input.kind, MouseKind::Press(MouseButton::Left));

        let outside = MouseAction { col: 2, ..press };
        assert!(session_mouse(&outside, viewport).is_none());

        let drag = action(Gesture::Drag, 50, 1);
        let input = session_mouse(&drag, viewport).expect("drag clamps");
        assert_eq!((input.col, input.row), (19, 0));

        let wheel = action(Gesture::Scroll { dx: 0, dy: 1 }, 11, 6);
        assert_eq!(
            session_mouse(&wheel, viewport).map(|input| input.kind),
            Some(MouseKind::WheelDown)
        );
    }
}

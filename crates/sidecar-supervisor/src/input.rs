/// A key to forward to a child session, already decoupled from the terminal
/// library the host reads input with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardKey {
    Char(char),
    /// Pasted or batched text, sent literally.
    Text(String),
    /// tmux key name such as `Enter`, `BSpace`, `Up`, `PageDown`, `F5`.
    Named(String),
    Ctrl(char),
    Alt(char),
}

impl ForwardKey {
    /// Arguments for `send-keys` and whether they must be sent with `-l`.
    pub fn to_tmux(&self) -> (String, bool) {
        match self {
            ForwardKey::Char(c) => (c.to_string(), true),
            ForwardKey::Text(text) => (text.clone(), true),
            ForwardKey::Named(name) => (name.clone(), false),
            ForwardKey::Ctrl(c) => (format!("C-{}", c.to_ascii_lowercase()), false),
            ForwardKey::Alt(c) => (format!("M-{c}"), false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    fn code(self) -> u16 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseKind {
    Press(MouseButton),
    Release(MouseButton),
    Drag(MouseButton),
    Move,
    WheelUp,
    WheelDown,
    WheelLeft,
    WheelRight,
}

/// Mouse event in coordinates relative to the session's viewport, zero based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseInput {
    pub kind: MouseKind,
    pub col: u16,
    pub row: u16,
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
}

impl MouseInput {
    pub fn new(kind: MouseKind, col: u16, row: u16) -> Self {
        Self {
            kind,
            col,
            row,
            shift: false,
            alt: false,
            ctrl: false,
        }
    }

    pub fn is_drag(&self) -> bool {
        matches!(self.kind, MouseKind::Drag(_) | MouseKind::Move)
    }
}

/// SGR (1006) encoding: `ESC [ < Cb ; Cx ; Cy M` for press and motion, `m`
/// for release. Coordinates are one based.
pub fn encode_sgr_mouse(event: &MouseInput) -> String {
    let (mut code, release) = match event.kind {
        MouseKind::Press(button) => (button.code(), false),
        MouseKind::Release(button) => (button.code(), true),
        MouseKind::Drag(button) => (button.code() + 32, false),
        MouseKind::Move => (3 + 32, false),
        MouseKind::WheelUp => (64, false),
        MouseKind::WheelDown => (65, false),
        MouseKind::WheelLeft => (66, false),
        MouseKind::WheelRight => (67, false),
    };
    if event.shift {
        code += 4;
    }
    if event.alt {
        code += 8;
    }
    if event.ctrl {
        code += 16;
    }
    format!(
        "\x1b[<{};{};{}{}",
        code,
        u32::from(event.col) + 1,
        u32::from(event.row) + 1,
        if release { 'm' } else { 'M' }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_press_and_release() {
        let press = MouseInput::new(MouseKind::Press(MouseButton::Left), 0, 0);
        assert_eq!(encode_sgr_mouse(&press), "\x1b[<0;1;1M");
        let release = MouseInput::new(MouseKind::Release(MouseButton::Left), 9, 4);
        assert_eq!(encode_sgr_mouse(&release), "\x1b[<0;10;5m");
    }

    #[test]
    fn drag_sets_motion_bit_and_modifiers_add() {
        let mut drag = MouseInput::new(MouseKind::Drag(MouseButton::Left), 2, 3);
        drag.ctrl = true;
        assert_eq!(encode_sgr_mouse(&drag), "\x1b[<48;3;4M");
    }

    #[test]
    fn wheel_codes() {
        let mut wheel = MouseInput::new(MouseKind::WheelDown, 5, 5);
        assert_eq!(encode_sgr_mouse(&wheel), "\x1b[<65;6;6M");
        wheel.shift = true;
        assert_eq!(encode_sgr_mouse(&wheel), "\x1b[<69;6;6M");
    }

    #[test]
    fn keys_map_to_tmux_names() {
        assert_eq!(ForwardKey::Ctrl('C').to_tmux(), ("C-c".to_string(), false));
        assert_eq!(ForwardKey::Char(';').to_tmux(), (";".to_string(), true));
        assert_eq!(
            ForwardKey::Named("BSpace".to_string()).to_tmux(),
            ("BSpace".to_string(), false)
        );
    }
}

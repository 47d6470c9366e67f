use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const FOCUSED_BORDER: Style = Style::new().fg(Color::Cyan);
pub const IDLE_BORDER: Style = Style::new().fg(Color::Rgb(102, 92, 84));
pub const INTERACTIVE_BORDER: Style = Style::new()
    .fg(Color::Rgb(250, 189, 47))
    .add_modifier(Modifier::BOLD);
pub const MODAL_BORDER: Style = Style::new().fg(Color::Yellow);
pub const DIM_STYLE: Style = Style::new().fg(Color::Rgb(146, 131, 116));
pub const IGNORED_STYLE: Style = Style::new()
    .fg(Color::Rgb(102, 92, 84))
    .add_modifier(Modifier::ITALIC);
pub const DIR_STYLE: Style = Style::new()
    .fg(Color::Rgb(131, 165, 152))
    .add_modifier(Modifier::BOLD);
pub const MATCH_STYLE: Style = Style::new()
    .fg(Color::Black)
    .bg(Color::Rgb(250, 189, 47));
pub const CURRENT_MATCH_STYLE: Style = Style::new()
    .fg(Color::Black)
    .bg(Color::Rgb(254, 128, 25))
    .add_modifier(Modifier::BOLD);
pub const SELECTION_STYLE: Style = Style::new().bg(Color::Rgb(69, 133, 136));
pub const INFO_STYLE: Style = Style::new().fg(Color::Rgb(184, 187, 38));
pub const ERROR_STYLE: Style = Style::new()
    .fg(Color::Rgb(251, 73, 52))
    .add_modifier(Modifier::BOLD);
pub const KEY_STYLE: Style = Style::new().fg(Color::Cyan);
pub const ACTIVE_TAB_STYLE: Style = Style::new()
    .fg(Color::Black)
    .bg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const PREVIEW_TAB_STYLE: Style = Style::new()
    .fg(Color::Rgb(189, 174, 147))
    .add_modifier(Modifier::ITALIC);
pub const PINNED_TAB_STYLE: Style = Style::new().fg(Color::Rgb(189, 174, 147));
pub const DIVIDER_STYLE: Style = Style::new().fg(Color::Rgb(80, 73, 69));

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub fn border_style(focused: bool) -> Style {
    if focused {
        FOCUSED_BORDER
    } else {
        IDLE_BORDER
    }
}

pub mod icons {
    pub const EXPANDED: &str = "v";
    pub const COLLAPSED: &str = ">";
    pub const FILE: &str = " ";
    pub const SYMLINK: &str = "@";
    pub const PINNED: &str = "*";
    pub const ARCHIVED: &str = "~";
    pub const DELETED: &str = "x";
    pub const ATTACHED: &str = "+";
    pub const CUT: &str = "-";
    pub const COPIED: &str = "=";
}

use crate::plugin::{Level, Toast};
use crate::theme;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Widget},
};

pub fn pane_block(title: impl Into<String>, border: Style) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title(title.into())
        .border_style(border)
}

/// Rectangle of `width` x `height` centred in `area`, clipped to it.
pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

pub fn clear(area: Rect, buf: &mut Buffer) {
    Clear.render(area, buf);
}

/// The visible slice of `text` after skipping `skip` chars, at most `width`
/// chars long.
pub fn visible(text: &str, skip: usize, width: usize) -> String {
    text.chars().skip(skip).take(width).collect()
}

/// Splits `text` into styled spans. `ranges` are char offsets; later ranges
/// override earlier ones where they overlap.
pub fn highlight(text: &str, base: Style, ranges: &[(usize, usize, Style)]) -> Line<'static> {
    if ranges.is_empty() {
        return Line::from(Span::styled(text.to_string(), base));
    }
    let chars: Vec<char> = text.chars().collect();
    let mut styles = vec![base; chars.len()];
    for &(start, end, style) in ranges {
        for slot in styles
            .iter_mut()
            .take(end.min(chars.len()))
            .skip(start)
        {
            *slot = base.patch(style);
        }
    }
    let mut spans = Vec::new();
    let mut current = String::new();
    let mut current_style = base;
    for (c, style) in chars.into_iter().zip(styles) {
        if style != current_style && !current.is_empty() {
            spans.push(Span::styled(std::mem::take(&mut current), current_style));
        }
        current_style = style;
        current.push(c);
    }
    if !current.is_empty() {
        spans.push(Span::styled(current, current_style));
    }
    Line::from(spans)
}

/// Fuzzy-match positions as highlight ranges.
pub fn positions_to_ranges(positions: &[usize], style: Style) -> Vec<(usize, usize, Style)> {
    positions.iter().map(|&pos| (pos, pos + 1, style)).collect()
}

pub fn toast_line(toast: Option<&Toast>) -> Line<'static> {
    match toast {
        Some(toast) => {
            let style = match toast.level {
                Level::Info => theme::INFO_STYLE,
                Level::Error => theme::ERROR_STYLE,
            };
            Line::from(Span::styled(toast.text.clone(), style))
        }
        None => Line::default(),
    }
}

pub fn convert_color(color: vt100::Color) -> Color {
    match color {
        vt100::Color::Default => Color::Reset,
        vt100::Color::Idx(idx) => Color::Indexed(idx),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

fn cell_style(cell: &vt100::Cell) -> Style {
    let mut style = Style::default()
        .fg(convert_color(cell.fgcolor()))
        .bg(convert_color(cell.bgcolor()));
    if cell.bold() {
        style = style.add_modifier(Modifier::BOLD);
    }
    if cell.italic() {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if cell.underline() {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if cell.inverse() {
        style = style.add_modifier(Modifier::REVERSED);
    }
    style
}

/// Paints a terminal screen model into `area`, cell for cell. `row_offset`
/// scrolls the view down when the screen is taller than the area.
pub fn render_screen(
    screen: &vt100::Screen,
    row_offset: u16,
    cursor: Option<(u16, u16)>,
    area: Rect,
    buf: &mut Buffer,
) {
    let (rows, cols) = screen.size();
    for y in 0..area.height {
        let row = y + row_offset;
        if row >= rows {
            break;
        }
        for x in 0..area.width.min(cols) {
            let Some(cell) = screen.cell(row, x) else {
                continue;
            };
            if cell.is_wide_continuation() {
                continue;
            }
            let contents = cell.contents().to_string();
            let target = buf.get_mut(area.x + x, area.y + y);
            target.set_symbol(if contents.is_empty() { " " } else { &contents });
            target.set_style(cell_style(cell));
        }
    }
    if let Some((row, col)) = cursor {
        if row >= row_offset && row - row_offset < area.height && col < area.width {
            let target = buf.get_mut(area.x + col, area.y + row - row_offset);
            target.set_style(Style::default().add_modifier(Modifier::REVERSED));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlight_splits_spans_at_range_edges() {
        let line = highlight("hello world", Style::default(), &[(6, 11, theme::MATCH_STYLE)]);
        let texts: Vec<&str> = line.spans.iter().map(|span| span.content.as_ref()).collect();
        assert_eq!(texts, vec!["hello ", "world"]);
        assert_eq!(line.spans[1].style.bg, theme::MATCH_STYLE.bg);
    }

    #[test]
    fn visible_respects_horizontal_scroll() {
        assert_eq!(visible("abcdef", 2, 3), "cde");
        assert_eq!(visible("ab", 5, 3), "");
    }

    #[test]
    fn screen_cells_land_in_buffer() {
        let mut parser = vt100::Parser::new(3, 10, 0);
        parser.process(b"hi \x1b[1mB\x1b[0m");
        let area = Rect::new(0, 0, 10, 3);
        let mut buf = Buffer::empty(area);
        render_screen(parser.screen(), 0, None, area, &mut buf);
        assert_eq!(buf.get(0, 0).symbol(), "h");
        assert_eq!(buf.get(1, 0).symbol(), "i");
        assert_eq!(buf.get(3, 0).symbol(), "B");
        assert!(buf.get(3, 0).modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn centered_rect_clips_to_area() {
        let area = Rect::new(0, 0, 10, 4);
        assert_eq!(centered_rect(20, 2, area), Rect::new(0, 1, 10, 2));
    }
}

use super::{FileBrowser, Focus, Overlay, MIN_PREVIEW_WIDTH, MIN_TREE_WIDTH};
use crate::mouse::{HitMap, RegionId};
use crate::plugins::scroll_to_show;
use crate::render::{self, centered_rect, highlight, pane_block, positions_to_ranges, visible};
use crate::theme::{self, icons};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Paragraph, Widget, Wrap},
};
use sidecar_core::Projection;
use sidecar_files::{wrap_line, ClipboardMode, NodeKind, PreviewContent, ResultRow};

impl FileBrowser {
    pub(super) fn draw(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        self.layout.area = area;
        if area.width < 4 || area.height < 3 {
            return;
        }
        let body = Rect::new(area.x, area.y, area.width, area.height - 1);
        let status = Rect::new(area.x, area.y + area.height - 1, area.width, 1);

        let max_tree = body.width.saturating_sub(MIN_PREVIEW_WIDTH + 1).max(MIN_TREE_WIDTH);
        let tree_width = self.divider.clamp(MIN_TREE_WIDTH, max_tree).min(body.width);
        let tree_area = Rect::new(body.x, body.y, tree_width, body.height);
        let divider = Rect::new(body.x + tree_width, body.y, 1, body.height).intersection(body);
        let preview_x = divider.x + divider.width;
        let preview_area = Rect::new(
            preview_x,
            body.y,
            (body.x + body.width).saturating_sub(preview_x),
            body.height,
        );

        self.draw_tree(tree_area, buf, hits);
        for y in divider.top()..divider.bottom() {
            buf.set_string(divider.x, y, "│", theme::DIVIDER_STYLE);
        }
        hits.register(RegionId::new("divider"), divider);
        if preview_area.width > 2 {
            self.draw_preview(preview_area, buf, hits);
        }

        let line = match self.status.current() {
            Some(toast) => render::toast_line(Some(toast)),
            None => self.status_hint(),
        };
        buf.set_line(status.x, status.y, &line, status.width);

        match self.overlay {
            Overlay::None => self.layout.overlay_rows = 0,
            Overlay::QuickOpen(_) => self.draw_quick_open(area, buf, hits),
            Overlay::Search(_) => self.draw_project_search(area, buf, hits),
            Overlay::Modal(_) => self.draw_modal(area, buf, hits),
        }
    }

    fn status_hint(&self) -> Line<'static> {
        let tree = self.tree();
        let mut spans = vec![Span::styled(
            format!("{} entries", tree.len()),
            theme::DIM_STYLE,
        )];
        if tree.skipped() > 0 {
            spans.push(Span::styled(
                format!("  {} unreadable", tree.skipped()),
                theme::ERROR_STYLE,
            ));
        }
        if let Some(path) = &self.state.clipboard {
            let (icon, verb) = match self.clipboard_mode {
                ClipboardMode::Copy => (icons::COPIED, "copy"),
                ClipboardMode::Cut => (icons::CUT, "cut"),
            };
            spans.push(Span::styled(
                format!("  {icon} {verb} {}", path.display()),
                theme::KEY_STYLE,
            ));
        }
        Line::from(spans)
    }

    fn draw_tree(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let tree = self.tree();
        let title = format!(
            "{} [{}{}]",
            tree.root()
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| tree.root().display().to_string()),
            self.options.sort.label(),
            if self.options.show_ignored { ", all" } else { "" }
        );
        let block = pane_block(
            title,
            theme::border_style(self.focus == Focus::Tree && matches!(self.overlay, Overlay::None)),
        );
        let inner = block.inner(area);
        block.render(area, buf);
        self.layout.tree = inner;
        hits.register(RegionId::new("tree"), inner);
        if inner.height == 0 {
            return;
        }

        self.state.scroll = scroll_to_show(self.state.scroll, self.state.selected_index, inner.height as usize);
        if tree.is_empty() {
            buf.set_string(inner.x, inner.y, "(empty)", theme::DIM_STYLE);
            return;
        }
        let width = inner.width as usize;
        for (index, node) in tree
            .rows()
            .enumerate()
            .skip(self.state.scroll)
            .take(inner.height as usize)
        {
            let y = inner.y + (index - self.state.scroll) as u16;
            let icon = match node.kind {
                NodeKind::Dir if tree.is_expanded(&node.path) => icons::EXPANDED,
                NodeKind::Dir => icons::COLLAPSED,
                NodeKind::Symlink => icons::SYMLINK,
                NodeKind::File => icons::FILE,
            };
            let marker = match &self.state.clipboard {
                Some(path) if *path == node.path => match self.clipboard_mode {
                    ClipboardMode::Copy => icons::COPIED,
                    ClipboardMode::Cut => icons::CUT,
                },
                _ => " ",
            };
            let indent = "  ".repeat(node.depth.saturating_sub(1));
            let text = format!("{marker}{indent}{icon} {}", node.name);
            let mut style = if node.ignored {
                theme::IGNORED_STYLE
            } else if node.is_dir() {
                theme::DIR_STYLE
            } else {
                Style::default()
            };
            if self.state.selected_index == index {
                style = style.patch(theme::SELECTED_STYLE);
            }
            let row = Rect::new(inner.x, y, inner.width, 1);
            buf.set_style(row, style);
            buf.set_string(inner.x, y, visible(&text, 0, width), style);
            hits.register(RegionId::item("tree.row", index), row);
        }
    }

    fn draw_tabs(&self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let mut x = area.x;
        let active = self.tabs.active_index();
        for (index, tab) in self.tabs.tabs().iter().enumerate() {
            let name = tab
                .target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| tab.target.display().to_string());
            let mut label = format!(" {name} ");
            if tab.edit_session.is_some() {
                label = format!(" {}{name} ", icons::ATTACHED);
            } else if tab.is_pinned() {
                label = format!(" {}{name} ", icons::PINNED);
            }
            let style = if Some(index) == active {
                theme::ACTIVE_TAB_STYLE
            } else if tab.is_pinned() {
                theme::PINNED_TAB_STYLE
            } else {
                theme::PREVIEW_TAB_STYLE
            };
            let remaining = (area.x + area.width).saturating_sub(x);
            if remaining == 0 {
                break;
            }
            let width = (label.chars().count() as u16).min(remaining);
            buf.set_string(x, area.y, visible(&label, 0, width as usize), style);
            hits.register(RegionId::item("tab", index), Rect::new(x, area.y, width, 1));
            x += width;
        }
    }

    fn draw_preview(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let editing = self.is_editing();
        let border = if editing {
            theme::INTERACTIVE_BORDER
        } else {
            theme::border_style(self.focus == Focus::Preview && matches!(self.overlay, Overlay::None))
        };
        let mut title = match self.tabs.active() {
            Some(tab) => tab.target.display().to_string(),
            None => "Preview".to_string(),
        };
        if editing {
            title.push_str(" [editing, Ctrl-] to leave]");
        } else if self.search.is_active() {
            let position = self
                .search
                .current_index()
                .map_or(0, |index| index + 1);
            title.push_str(&format!(
                " /{} {}/{}",
                self.search.query(),
                position,
                self.search.matches().len()
            ));
        }
        let block = pane_block(title, border);
        let inner = block.inner(area);
        block.render(area, buf);
        hits.register(RegionId::new("preview"), inner);
        if inner.height < 2 {
            self.layout.preview_body = Rect::default();
            return;
        }
        let tab_row = Rect::new(inner.x, inner.y, inner.width, 1);
        let body = Rect::new(inner.x, inner.y + 1, inner.width, inner.height - 1);
        self.layout.preview_body = body;
        self.layout.display_rows.clear();
        self.draw_tabs(tab_row, buf, hits);
        hits.register(RegionId::new("preview.body"), body);

        if let Some(name) = self.active_session().map(str::to_string) {
            if let Some(view) = self.edits.get_mut(&name) {
                view.note_viewport(body);
                view.render(body, buf);
                if view.snapshot().is_none() {
                    buf.set_string(body.x, body.y, "starting editor...", theme::DIM_STYLE);
                }
                return;
            }
        }

        let Some(tab) = self.tabs.active() else {
            buf.set_string(body.x, body.y, "no file selected", theme::DIM_STYLE);
            return;
        };
        if let Some((path, err)) = &self.preview_error {
            if *path == tab.target {
                buf.set_string(body.x, body.y, visible(err, 0, body.width as usize), theme::ERROR_STYLE);
                return;
            }
        }
        let Some(content) = &tab.cache else {
            buf.set_string(body.x, body.y, "loading...", theme::DIM_STYLE);
            return;
        };
        if let Some(placeholder) = content.placeholder() {
            buf.set_string(body.x, body.y, placeholder, theme::DIM_STYLE);
            return;
        }
        let PreviewContent::Text { lines } = content else {
            return;
        };

        let width = body.width as usize;
        let h_scroll = if self.wrap { 0 } else { tab.h_scroll };
        let current = self.search.current();
        let mut rows: Vec<(usize, usize)> = Vec::with_capacity(body.height as usize);
        for (line_no, line) in lines.iter().enumerate().skip(tab.scroll) {
            if rows.len() >= body.height as usize {
                break;
            }
            if self.wrap {
                let mut start = 0;
                for chunk in wrap_line(line, width) {
                    if rows.len() >= body.height as usize {
                        break;
                    }
                    let len = chunk.chars().count();
                    rows.push((line_no, start));
                    let ranges = self.line_ranges(line_no, line, start, start + len.max(1), current);
                    let y = body.y + rows.len() as u16 - 1;
                    buf.set_line(body.x, y, &highlight(&chunk, Style::default(), &ranges), body.width);
                    start += len;
                }
            } else {
                rows.push((line_no, 0));
                let shown = visible(line, h_scroll, width);
                let ranges = self.line_ranges(line_no, line, h_scroll, h_scroll + width, current);
                let y = body.y + rows.len() as u16 - 1;
                buf.set_line(body.x, y, &highlight(&shown, Style::default(), &ranges), body.width);
            }
        }
        self.layout.display_rows = rows;
    }

    /// Search and selection highlights for the part of `line` between chars
    /// `from` and `to`, shifted so `from` is column zero.
    fn line_ranges(
        &self,
        line_no: usize,
        line: &str,
        from: usize,
        to: usize,
        current: Option<sidecar_files::PreviewMatch>,
    ) -> Vec<(usize, usize, Style)> {
        let clip = |start: usize, end: usize, style: Style| {
            let (start, end) = (start.max(from), end.min(to));
            (start < end).then(|| (start - from, end - from, style))
        };
        let mut ranges: Vec<(usize, usize, Style)> = self
            .search
            .matches()
            .iter()
            .filter(|found| found.line == line_no)
            .filter_map(|found| {
                let style = if Some(*found) == current {
                    theme::CURRENT_MATCH_STYLE
                } else {
                    theme::MATCH_STYLE
                };
                clip(found.start, found.end, style)
            })
            .collect();
        if let Some((start, end)) = self
            .selection
            .columns_on(line_no, line.chars().count())
        {
            ranges.extend(clip(start, end, theme::SELECTION_STYLE));
        }
        ranges
    }

    fn overlay_frame(&self, area: Rect, title: String, buf: &mut Buffer, hits: &mut HitMap) -> Rect {
        let width = (area.width * 3 / 4).max(30);
        let height = (area.height * 2 / 3).max(8);
        let rect = centered_rect(width, height, area);
        render::clear(rect, buf);
        let block = pane_block(title, theme::MODAL_BORDER);
        let inner = block.inner(rect);
        block.render(rect, buf);
        hits.register(RegionId::new("overlay"), rect);
        inner
    }

    fn draw_quick_open(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let Overlay::QuickOpen(picker) = &self.overlay else {
            return;
        };
        let title = match &picker.index {
            None => "Quick open (indexing...)".to_string(),
            Some(index) if picker.limited() => format!("Quick open ({} files, limited)", index.len()),
            Some(index) => format!("Quick open ({} files)", index.len()),
        };
        let inner = self.overlay_frame(area, title, buf, hits);
        let Overlay::QuickOpen(picker) = &mut self.overlay else {
            return;
        };
        if inner.height < 2 {
            return;
        }
        buf.set_string(inner.x, inner.y, format!("> {}", picker.input.text()), theme::HEADER_STYLE);
        let list_height = (inner.height - 1) as usize;
        picker.scroll = scroll_to_show(picker.scroll, picker.selected, list_height);
        for (index, hit) in picker
            .hits
            .iter()
            .enumerate()
            .skip(picker.scroll)
            .take(list_height)
        {
            let y = inner.y + 1 + (index - picker.scroll) as u16;
            let base = if index == picker.selected {
                theme::SELECTED_STYLE
            } else {
                Style::default()
            };
            let ranges = positions_to_ranges(&hit.positions, theme::MATCH_STYLE);
            let row = Rect::new(inner.x, y, inner.width, 1);
            buf.set_style(row, base);
            buf.set_line(inner.x, y, &highlight(&hit.display, base, &ranges), inner.width);
            hits.register(RegionId::item("overlay.row", index), row);
        }
        self.layout.overlay_rows = picker.hits.len();
    }

    fn draw_project_search(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let Overlay::Search(search) = &self.overlay else {
            return;
        };
        let title = format!("Search project {}", search.option_flags());
        let inner = self.overlay_frame(area, title, buf, hits);
        let Overlay::Search(search) = &mut self.overlay else {
            return;
        };
        if inner.height < 3 {
            return;
        }
        buf.set_string(inner.x, inner.y, format!("> {}", search.input.text()), theme::HEADER_STYLE);
        let summary = if let Some(err) = &search.error {
            Span::styled(err.clone(), theme::ERROR_STYLE)
        } else if search.running {
            Span::styled("searching...", theme::DIM_STYLE)
        } else if let Some(results) = &search.results {
            let found = results.results();
            let count: usize = found.files.iter().map(|file| file.matches.len()).sum();
            let mut text = format!(
                "{count} matches in {} files ({} scanned)",
                found.files.len(),
                found.files_scanned
            );
            if found.limited {
                text.push_str(", limited");
            }
            Span::styled(text, theme::DIM_STYLE)
        } else {
            Span::styled("type to search", theme::DIM_STYLE)
        };
        buf.set_line(inner.x, inner.y + 1, &Line::from(summary), inner.width);

        let Some(results) = &search.results else {
            self.layout.overlay_rows = 0;
            return;
        };
        let list_height = (inner.height - 2) as usize;
        search.scroll = scroll_to_show(search.scroll, results.selected(), list_height);
        for (index, row) in results
            .rows()
            .iter()
            .enumerate()
            .skip(search.scroll)
            .take(list_height)
        {
            let y = inner.y + 2 + (index - search.scroll) as u16;
            let base = if index == results.selected() {
                theme::SELECTED_STYLE
            } else {
                Style::default()
            };
            let line = match *row {
                ResultRow::File { file } => {
                    let file = &results.results().files[file];
                    let icon = if results.is_collapsed(&file.path) {
                        icons::COLLAPSED
                    } else {
                        icons::EXPANDED
                    };
                    Line::from(Span::styled(
                        format!("{icon} {} ({})", file.path.display(), file.matches.len()),
                        base.patch(theme::DIR_STYLE),
                    ))
                }
                ResultRow::Match { file, index } => {
                    let found = &results.results().files[file].matches[index];
                    let prefix = format!("    {:>5}: ", found.line_no);
                    let shift = prefix.chars().count();
                    let ranges: Vec<_> = found
                        .ranges
                        .iter()
                        .map(|&(start, end)| (start + shift, end + shift, theme::MATCH_STYLE))
                        .collect();
                    highlight(&format!("{prefix}{}", found.text), base, &ranges)
                }
            };
            let rect = Rect::new(inner.x, y, inner.width, 1);
            buf.set_style(rect, base);
            buf.set_line(inner.x, y, &line, inner.width);
            hits.register(RegionId::item("overlay.row", index), rect);
        }
        self.layout.overlay_rows = results.rows().len();
    }

    fn draw_modal(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap) {
        let Overlay::Modal(modal) = &self.overlay else {
            return;
        };
        let width = (area.width * 2 / 3).clamp(30u16.min(area.width), area.width);
        let rect = centered_rect(width, 7, area);
        render::clear(rect, buf);
        let block = pane_block(modal.title(), theme::MODAL_BORDER);
        let inner = block.inner(rect);
        block.render(rect, buf);
        hits.register(RegionId::new("overlay"), rect);

        let mut lines = Vec::new();
        if modal.has_input() {
            let text = modal.input.text();
            let cursor = modal.input.cursor();
            let before: String = text.chars().take(cursor).collect();
            let at: String = text.chars().skip(cursor).take(1).collect();
            let after: String = text.chars().skip(cursor + 1).collect();
            lines.push(Line::from(vec![
                Span::raw(before),
                Span::styled(
                    if at.is_empty() { " ".to_string() } else { at },
                    theme::SELECTED_STYLE,
                ),
                Span::raw(after),
            ]));
        }
        if let Some(err) = &modal.error {
            lines.push(Line::from(Span::styled(err.clone(), theme::ERROR_STYLE)));
        }
        let prompt = if modal.busy { "working..." } else { modal.prompt() };
        lines.push(Line::from(Span::styled(prompt, theme::DIM_STYLE)));
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .render(inner, buf);
        self.layout.overlay_rows = 0;
    }
}

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextPos {
    pub line: usize,
    pub col: usize,
}

impl TextPos {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl PartialOrd for TextPos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TextPos {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line
            .cmp(&other.line)
            .then_with(|| self.col.cmp(&other.col))
    }
}

/// Character-range selection over rendered lines. Columns count chars, and
/// the head column is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionState {
    anchor: TextPos,
    head: TextPos,
    active: bool,
}

impl SelectionState {
    pub fn begin(&mut self, at: TextPos) {
        self.anchor = at;
        self.head = at;
        self.active = true;
    }

    pub fn extend(&mut self, to: TextPos) {
        if self.active {
            self.head = to;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        !self.active || self.anchor == self.head
    }

    pub fn anchor(&self) -> TextPos {
        self.anchor
    }

    pub fn head(&self) -> TextPos {
        self.head
    }

    /// Ordered (start, end) when active.
    pub fn range(&self) -> Option<(TextPos, TextPos)> {
        if !self.active {
            return None;
        }
        if self.anchor <= self.head {
            Some((self.anchor, self.head))
        } else {
            Some((self.head, self.anchor))
        }
    }

    pub fn lines(&self) -> Option<std::ops::RangeInclusive<usize>> {
        self.range().map(|(start, end)| start.line..=end.line)
    }

    /// Selected char columns on `line` as a half-open range, for highlighting.
    pub fn columns_on(&self, line: usize, line_len: usize) -> Option<(usize, usize)> {
        let (start, end) = self.range()?;
        if line < start.line || line > end.line {
            return None;
        }
        let from = if line == start.line { start.col } else { 0 };
        let to = if line == end.line { end.col } else { line_len };
        let from = from.min(line_len);
        let to = to.min(line_len);
        if from >= to {
            None
        } else {
            Some((from, to))
        }
    }

    pub fn extract<S: AsRef<str>>(&self, lines: &[S]) -> String {
        let Some((start, end)) = self.range() else {
            return String::new();
        };
        let mut out = Vec::new();
        for line_no in start.line..=end.line {
            let Some(line) = lines.get(line_no) else {
                break;
            };
            let line = line.as_ref();
            let len = line.chars().count();
            let from = if line_no == start.line { start.col.min(len) } else { 0 };
            let to = if line_no == end.line { end.col.min(len) } else { len };
            let piece: String = line
                .chars()
                .skip(from)
                .take(to.saturating_sub(from))
                .collect();
            out.push(piece);
        }
        out.join("\n")
    }

    /// Clears the selection when any line it covers differs between the old
    /// and new content. Returns true when it was cleared.
    pub fn clear_if_touched<A, B>(&mut self, previous: &[A], current: &[B]) -> bool
    where
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let Some(lines) = self.lines() else {
            return false;
        };
        let touched = lines.into_iter().any(|line| {
            match (previous.get(line), current.get(line)) {
                (Some(old), Some(new)) => old.as_ref() != new.as_ref(),
                (None, None) => false,
                _ => true,
            }
        });
        if touched {
            self.clear();
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_spans_lines_in_either_direction() {
        let lines = ["alpha", "beta", "gamma"];
        let mut selection = SelectionState::default();
        selection.begin(TextPos::new(2, 3));
        selection.extend(TextPos::new(0, 2));
        assert_eq!(selection.extract(&lines), "pha\nbeta\ngam");
        assert_eq!(selection.columns_on(1, 4), Some((0, 4)));
        assert_eq!(selection.columns_on(2, 5), Some((0, 3)));
    }

    #[test]
    fn extend_without_begin_is_ignored() {
        let mut selection = SelectionState::default();
        selection.extend(TextPos::new(3, 3));
        assert!(selection.range().is_none());
        assert_eq!(selection.extract(&["x"]), "");
    }

    #[test]
    fn replacing_selected_lines_clears_selection() {
        let before = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let mut selection = SelectionState::default();
        selection.begin(TextPos::new(0, 0));
        selection.extend(TextPos::new(1, 2));

        let unrelated = vec!["one".to_string(), "two".to_string(), "THREE".to_string()];
        assert!(!selection.clear_if_touched(&before, &unrelated));
        assert!(selection.is_active());

        let touched = vec!["one".to_string(), "TWO".to_string()];
        assert!(selection.clear_if_touched(&unrelated, &touched));
        assert!(!selection.is_active());
    }

    #[test]
    fn multibyte_columns_count_chars() {
        let lines = ["héllo wörld"];
        let mut selection = SelectionState::default();
        selection.begin(TextPos::new(0, 1));
        selection.extend(TextPos::new(0, 8));
        assert_eq!(selection.extract(&lines), "éllo wö");
    }
}

/// One hit inside the previewed text; columns are char offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewMatch {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

/// Search inside the preview. Typing edits the query and recomputes matches
/// live; `commit` freezes it so `n`/`N` navigate; `clear` drops everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewSearch {
    query: String,
    editing: bool,
    committed: bool,
    matches: Vec<PreviewMatch>,
    current: Option<usize>,
}

impl PreviewSearch {
    pub fn begin(&mut self) {
        *self = Self {
            editing: true,
            ..Self::default()
        };
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_active(&self) -> bool {
        self.editing || self.committed
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[PreviewMatch] {
        &self.matches
    }

    pub fn current(&self) -> Option<PreviewMatch> {
        self.current.and_then(|idx| self.matches.get(idx).copied())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn push_char<S: AsRef<str>>(&mut self, c: char, lines: &[S]) {
        self.query.push(c);
        self.recompute(lines);
    }

    pub fn pop_char<S: AsRef<str>>(&mut self, lines: &[S]) {
        self.query.pop();
        self.recompute(lines);
    }

    pub fn commit(&mut self) {
        self.editing = false;
        self.committed = !self.query.is_empty();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Re-runs the query, e.g. after the previewed content changed. The
    /// current match stays on the first hit at or after its old line.
    pub fn recompute<S: AsRef<str>>(&mut self, lines: &[S]) {
        let anchor = self.current().map(|m| m.line).unwrap_or(0);
        self.matches = find_matches(&self.query, lines);
        self.current = if self.matches.is_empty() {
            None
        } else {
            Some(
                self.matches
                    .iter()
                    .position(|m| m.line >= anchor)
                    .unwrap_or(0),
            )
        };
    }

    pub fn next(&mut self) -> Option<PreviewMatch> {
        if self.matches.is_empty() {
            return None;
        }
        let idx = self.current.map_or(0, |idx| (idx + 1) % self.matches.len());
        self.current = Some(idx);
        self.current()
    }

    pub fn prev(&mut self) -> Option<PreviewMatch> {
        if self.matches.is_empty() {
            return None;
        }
        let len = self.matches.len();
        let idx = self.current.map_or(len - 1, |idx| (idx + len - 1) % len);
        self.current = Some(idx);
        self.current()
    }
}

/// Case-insensitive substring matches, non-overlapping, in reading order.
fn find_matches<S: AsRef<str>>(query: &str, lines: &[S]) -> Vec<PreviewMatch> {
    let needle: Vec<char> = query.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for (line_idx, line) in lines.iter().enumerate() {
        let hay: Vec<char> = line
            .as_ref()
            .chars()
            .map(|c| c.to_lowercase().next().unwrap_or(c))
            .collect();
        let mut col = 0;
        while col + needle.len() <= hay.len() {
            if hay[col..col + needle.len()] == needle[..] {
                out.push(PreviewMatch {
                    line: line_idx,
                    start: col,
                    end: col + needle.len(),
                });
                col += needle.len();
            } else {
                col += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<&'static str> {
        vec!["fn main() {", "    let Main = 1;", "}", "// main again main"]
    }

    #[test]
    fn typing_updates_matches_live() {
        let text = lines();
        let mut search = PreviewSearch::default();
        search.begin();
        for c in "mai".chars() {
            search.push_char(c, &text);
        }
        assert_eq!(search.matches().len(), 4);
        search.push_char('x', &text);
        assert!(search.matches().is_empty());
        search.pop_char(&text);
        assert_eq!(search.matches().len(), 4);
        assert!(search.is_editing());
    }

    #[test]
    fn committed_query_navigates_and_wraps() {
        let text = lines();
        let mut search = PreviewSearch::default();
        search.begin();
        for c in "main".chars() {
            search.push_char(c, &text);
        }
        search.commit();
        assert!(search.is_committed());
        assert_eq!(search.current().map(|m| m.line), Some(0));
        assert_eq!(search.next().map(|m| (m.line, m.start)), Some((1, 8)));
        assert_eq!(search.next().map(|m| (m.line, m.start)), Some((3, 3)));
        assert_eq!(search.next().map(|m| (m.line, m.start)), Some((3, 14)));
        assert_eq!(search.next().map(|m| m.line), Some(0));
        assert_eq!(search.prev().map(|m| (m.line, m.start)), Some((3, 14)));
    }

    #[test]
    fn clear_resets_state() {
        let text = lines();
        let mut search = PreviewSearch::default();
        search.begin();
        search.push_char('m', &text);
        search.commit();
        search.clear();
        assert!(!search.is_active());
        assert!(search.matches().is_empty());
    }

    #[test]
    fn committing_empty_query_is_not_committed() {
        let mut search = PreviewSearch::default();
        search.begin();
        search.commit();
        assert!(!search.is_committed());
    }
}

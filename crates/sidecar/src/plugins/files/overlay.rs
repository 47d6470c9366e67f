use crate::input::LineInput;
use sidecar_core::Debounce;
use sidecar_files::{QuickOpenHit, QuickOpenIndex, ResultTree, SearchOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const QUICK_OPEN_LIMIT: usize = 200;
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Filename picker. The index arrives from a job; until then keystrokes only
/// edit the query.
#[derive(Debug, Default)]
pub struct QuickOpen {
    pub input: LineInput,
    pub index: Option<QuickOpenIndex>,
    pub hits: Vec<QuickOpenHit>,
    pub selected: usize,
    pub scroll: usize,
}

impl QuickOpen {
    pub fn set_index(&mut self, index: QuickOpenIndex) {
        self.index = Some(index);
        self.refilter();
    }

    pub fn refilter(&mut self) {
        self.hits = self
            .index
            .as_ref()
            .map(|index| index.search(self.input.text(), QUICK_OPEN_LIMIT))
            .unwrap_or_default();
        self.selected = 0;
        self.scroll = 0;
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.hits.is_empty() {
            return;
        }
        let last = self.hits.len() as isize - 1;
        self.selected = (self.selected as isize + delta).clamp(0, last) as usize;
    }

    pub fn chosen(&self) -> Option<PathBuf> {
        self.hits.get(self.selected).map(|hit| hit.path.clone())
    }

    pub fn limited(&self) -> bool {
        self.index.as_ref().is_some_and(QuickOpenIndex::limited)
    }
}

/// Project-wide text search with a debounced query.
#[derive(Debug)]
pub struct ProjectSearch {
    pub input: LineInput,
    pub options: SearchOptions,
    pub results: Option<ResultTree>,
    pub generation: u64,
    pub running: bool,
    pub error: Option<String>,
    pub scroll: usize,
    debounce: Debounce,
}

impl Default for ProjectSearch {
    fn default() -> Self {
        Self {
            input: LineInput::default(),
            options: SearchOptions::default(),
            results: None,
            generation: 0,
            running: false,
            error: None,
            scroll: 0,
            debounce: Debounce::new(SEARCH_DEBOUNCE),
        }
    }
}

impl ProjectSearch {
    pub fn query_changed(&mut self, now: Instant) {
        self.debounce.poke(now);
    }

    /// Returns the generation to search with when the quiet window passed.
    pub fn due(&mut self, now: Instant) -> Option<u64> {
        if !self.debounce.fire_if_due(now) {
            return None;
        }
        self.generation += 1;
        self.running = !self.input.is_empty();
        Some(self.generation)
    }

    /// Rerun immediately, e.g. after a toggle.
    pub fn rerun(&mut self) -> u64 {
        self.debounce.cancel();
        self.generation += 1;
        self.running = !self.input.is_empty();
        self.generation
    }

    pub fn accept(&mut self, generation: u64, results: Result<ResultTree, String>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.running = false;
        match results {
            Ok(tree) => {
                self.results = Some(tree);
                self.error = None;
            }
            Err(err) => self.error = Some(err),
        }
        self.scroll = 0;
        true
    }

    pub fn option_flags(&self) -> String {
        let flag = |on: bool, c: char| if on { c.to_ascii_uppercase() } else { c };
        format!(
            "[{}{}{}]",
            flag(self.options.regex, 'r'),
            flag(self.options.case_sensitive, 'c'),
            flag(self.options.whole_word, 'w')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_files::SearchResults;

    #[test]
    fn stale_search_generations_are_ignored() {
        let mut search = ProjectSearch::default();
        let start = Instant::now();
        search.input = LineInput::with_text("foo");
        search.query_changed(start);
        assert_eq!(search.due(start), None);
        let first = search.due(start + SEARCH_DEBOUNCE).expect("due");
        let second = search.rerun();
        assert!(!search.accept(first, Ok(ResultTree::new(SearchResults::default()))));
        assert!(search.running);
        assert!(search.accept(second, Ok(ResultTree::new(SearchResults::default()))));
        assert!(!search.running);
    }

    #[test]
    fn option_flags_show_enabled_toggles() {
        let mut search = ProjectSearch::default();
        search.options.case_sensitive = true;
        assert_eq!(search.option_flags(), "[rCw]");
    }
}

use crate::filter::IgnoreRules;
use crate::scan::{scan_files, ScanBudget};
use crate::ScanError;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const MAX_SEARCH_FILE_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub regex: bool,
    pub case_sensitive: bool,
    pub whole_word: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub max_files: usize,
    pub max_matches: usize,
    pub timeout: Duration,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_files: 20_000,
            max_matches: 5_000,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    /// One based.
    pub line_no: usize,
    pub text: String,
    /// Char ranges of each hit within `text`.
    pub ranges: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatches {
    pub path: PathBuf,
    pub matches: Vec<LineMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub query: String,
    pub files: Vec<FileMatches>,
    pub files_scanned: usize,
    pub limited: bool,
}

impl SearchResults {
    pub fn match_count(&self) -> usize {
        self.files.iter().map(|file| file.matches.len()).sum()
    }
}

pub fn build_pattern(query: &str, options: SearchOptions) -> Result<Regex, ScanError> {
    let mut pattern = if options.regex {
        query.to_string()
    } else {
        regex::escape(query)
    };
    if options.whole_word {
        pattern = format!(r"\b(?:{pattern})\b");
    }
    Ok(RegexBuilder::new(&pattern)
        .case_insensitive(!options.case_sensitive)
        .build()?)
}

fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

/// Scans the project with the same ignore rules as the tree.
pub fn search_project(
    root: &Path,
    rules: &IgnoreRules,
    query: &str,
    options: SearchOptions,
    limits: SearchLimits,
) -> Result<SearchResults, ScanError> {
    let mut results = SearchResults {
        query: query.to_string(),
        ..SearchResults::default()
    };
    if query.is_empty() {
        return Ok(results);
    }
    let pattern = build_pattern(query, options)?;
    let mut total = 0usize;
    let mut hit_match_cap = false;

    let stats = scan_files(
        root,
        rules,
        ScanBudget::new(limits.max_files, limits.timeout),
        |rel, abs| {
            let too_big = fs::metadata(abs).map_or(true, |meta| meta.len() > MAX_SEARCH_FILE_BYTES);
            if too_big {
                return true;
            }
            let Ok(bytes) = fs::read(abs) else {
                return true;
            };
            if bytes[..bytes.len().min(8000)].contains(&0) {
                return true;
            }
            let text = String::from_utf8_lossy(&bytes);
            let mut matches = Vec::new();
            for (idx, line) in text.lines().enumerate() {
                let ranges: Vec<(usize, usize)> = pattern
                    .find_iter(line)
                    .filter(|m| !m.as_str().is_empty())
                    .map(|m| (char_offset(line, m.start()), char_offset(line, m.end())))
                    .collect();
                if ranges.is_empty() {
                    continue;
                }
                matches.push(LineMatch {
                    line_no: idx + 1,
                    text: line.to_string(),
                    ranges,
                });
                total += 1;
                if total >= limits.max_matches {
                    hit_match_cap = true;
                    break;
                }
            }
            if !matches.is_empty() {
                results.files.push(FileMatches {
                    path: rel.to_path_buf(),
                    matches,
                });
            }
            !hit_match_cap
        },
    )?;

    results.files_scanned = stats.files;
    results.limited = stats.limited || hit_match_cap;
    debug!(
        query,
        files = results.files.len(),
        matches = total,
        limited = results.limited,
        "project search finished"
    );
    Ok(results)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultRow {
    File { file: usize },
    Match { file: usize, index: usize },
}

/// Collapsible per-file view over search results. Navigation moves between
/// match rows and never lands on a file header.
#[derive(Debug, Clone, Default)]
pub struct ResultTree {
    results: SearchResults,
    collapsed: BTreeSet<PathBuf>,
    rows: Vec<ResultRow>,
    selected: usize,
}

impl ResultTree {
    pub fn new(results: SearchResults) -> Self {
        let mut tree = Self {
            results,
            ..Self::default()
        };
        tree.rebuild_rows();
        tree.selected = tree.first_match_row().unwrap_or(0);
        tree
    }

    pub fn results(&self) -> &SearchResults {
        &self.results
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn is_collapsed(&self, path: &Path) -> bool {
        self.collapsed.contains(path)
    }

    fn rebuild_rows(&mut self) {
        self.rows.clear();
        for (file_idx, file) in self.results.files.iter().enumerate() {
            self.rows.push(ResultRow::File { file: file_idx });
            if self.collapsed.contains(&file.path) {
                continue;
            }
            for index in 0..file.matches.len() {
                self.rows.push(ResultRow::Match {
                    file: file_idx,
                    index,
                });
            }
        }
        if self.selected >= self.rows.len() {
            self.selected = self.rows.len().saturating_sub(1);
        }
    }

    fn first_match_row(&self) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| matches!(row, ResultRow::Match { .. }))
    }

    fn file_of(&self, row: usize) -> Option<usize> {
        match self.rows.get(row)? {
            ResultRow::File { file } | ResultRow::Match { file, .. } => Some(*file),
        }
    }

    /// Collapses or expands the file owning the selected row; selection moves
    /// to that file's header when collapsing.
    pub fn toggle_selected_file(&mut self) {
        let Some(file_idx) = self.file_of(self.selected) else {
            return;
        };
        let path = self.results.files[file_idx].path.clone();
        if !self.collapsed.remove(&path) {
            self.collapsed.insert(path);
        }
        self.rebuild_rows();
        if let Some(header) = self
            .rows
            .iter()
            .position(|row| *row == ResultRow::File { file: file_idx })
        {
            self.selected = header;
        }
    }

    pub fn set_all_collapsed(&mut self, collapsed: bool) {
        self.collapsed = if collapsed {
            self.results
                .files
                .iter()
                .map(|file| file.path.clone())
                .collect()
        } else {
            BTreeSet::new()
        };
        self.rebuild_rows();
    }

    pub fn next_match(&mut self) -> bool {
        let found = self
            .rows
            .iter()
            .enumerate()
            .skip(self.selected + 1)
            .find(|(_, row)| matches!(row, ResultRow::Match { .. }))
            .map(|(idx, _)| idx);
        match found {
            Some(idx) => {
                self.selected = idx;
                true
            }
            None => false,
        }
    }

    pub fn prev_match(&mut self) -> bool {
        let found = self.rows[..self.selected.min(self.rows.len())]
            .iter()
            .rposition(|row| matches!(row, ResultRow::Match { .. }));
        match found {
            Some(idx) => {
                self.selected = idx;
                true
            }
            None => false,
        }
    }

    pub fn select_row(&mut self, row: usize) {
        if row < self.rows.len() {
            self.selected = row;
        }
    }

    /// File and one based line to open for the selected row.
    pub fn selected_target(&self) -> Option<(PathBuf, usize)> {
        match *self.rows.get(self.selected)? {
            ResultRow::File { file } => {
                let file = &self.results.files[file];
                Some((file.path.clone(), file.matches.first().map_or(1, |m| m.line_no)))
            }
            ResultRow::Match { file, index } => {
                let file = &self.results.files[file];
                Some((file.path.clone(), file.matches[index].line_no))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture() -> tempfile::TempDir {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("src")).expect("src");
        fs::write(
            dir.path().join("src/a.rs"),
            "let total = 1;\nlet subtotal = 2;\nTOTAL\n",
        )
        .expect("a");
        fs::write(dir.path().join("src/b.rs"), "no hits here\ntotal again\n").expect("b");
        dir
    }

    #[test]
    fn toggles_change_matching() {
        let dir = fixture();
        let rules = IgnoreRules::none();
        let run = |options| {
            search_project(dir.path(), &rules, "total", options, SearchLimits::default())
                .expect("search")
                .match_count()
        };
        assert_eq!(run(SearchOptions::default()), 4);
        assert_eq!(
            run(SearchOptions {
                case_sensitive: true,
                ..SearchOptions::default()
            }),
            3
        );
        assert_eq!(
            run(SearchOptions {
                whole_word: true,
                ..SearchOptions::default()
            }),
            3
        );
    }

    #[test]
    fn regex_mode_and_invalid_patterns() {
        let options = SearchOptions {
            regex: true,
            ..SearchOptions::default()
        };
        assert!(build_pattern("to(tal", options).is_err());
        assert!(build_pattern("to(tal", SearchOptions::default()).is_ok());
        let pattern = build_pattern("sub.*l", options).expect("pattern");
        assert!(pattern.is_match("let subtotal"));
    }

    #[test]
    fn match_cap_marks_results_limited() {
        let dir = fixture();
        let limits = SearchLimits {
            max_matches: 2,
            ..SearchLimits::default()
        };
        let results = search_project(
            dir.path(),
            &IgnoreRules::none(),
            "total",
            SearchOptions::default(),
            limits,
        )
        .expect("search");
        assert!(results.limited);
        assert_eq!(results.match_count(), 2);
    }

    #[test]
    fn navigation_skips_file_headers() {
        let dir = fixture();
        let results = search_project(
            dir.path(),
            &IgnoreRules::none(),
            "total",
            SearchOptions::default(),
            SearchLimits::default(),
        )
        .expect("search");
        let mut tree = ResultTree::new(results);
        // a.rs header, 3 matches, b.rs header, 1 match
        assert_eq!(tree.rows().len(), 6);
        assert_eq!(tree.selected(), 1);
        assert!(tree.next_match());
        assert!(tree.next_match());
        assert!(tree.next_match());
        assert_eq!(tree.selected(), 5);
        assert_eq!(
            tree.selected_target(),
            Some((PathBuf::from("src/b.rs"), 2))
        );
        assert!(!tree.next_match());
        assert!(tree.prev_match());
        assert_eq!(tree.selected(), 3);
    }

    #[test]
    fn collapsing_hides_matches() {
        let dir = fixture();
        let results = search_project(
            dir.path(),
            &IgnoreRules::none(),
            "total",
            SearchOptions::default(),
            SearchLimits::default(),
        )
        .expect("search");
        let mut tree = ResultTree::new(results);
        tree.toggle_selected_file();
        assert!(tree.is_collapsed(Path::new("src/a.rs")));
        assert_eq!(tree.rows().len(), 3);
        assert_eq!(tree.selected(), 0);
        assert!(tree.next_match());
        assert_eq!(tree.selected(), 2);
        tree.set_all_collapsed(false);
        assert_eq!(tree.rows().len(), 6);
    }
}

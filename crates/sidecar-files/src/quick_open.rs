use crate::filter::IgnoreRules;
use crate::fuzzy::fuzzy_match;
use crate::scan::{scan_files, ScanBudget};
use crate::ScanError;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const QUICK_OPEN_MAX_FILES: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickOpenHit {
    pub path: PathBuf,
    pub display: String,
    pub score: i64,
    pub positions: Vec<usize>,
}

/// Flat list of non-ignored files, built once per open of the picker.
#[derive(Debug, Clone, Default)]
pub struct QuickOpenIndex {
    entries: Vec<(PathBuf, String)>,
    limited: bool,
    built_in: Duration,
}

impl QuickOpenIndex {
    pub fn build(
        root: &Path,
        rules: &IgnoreRules,
        max_files: usize,
        timeout: Duration,
    ) -> Result<Self, ScanError> {
        let started = Instant::now();
        let mut entries = Vec::new();
        let stats = scan_files(root, rules, ScanBudget::new(max_files, timeout), |rel, _| {
            entries.push((rel.to_path_buf(), rel.to_string_lossy().into_owned()));
            true
        })?;
        let built_in = started.elapsed();
        info!(
            files = entries.len(),
            limited = stats.limited,
            elapsed_ms = built_in.as_millis() as u64,
            "quick-open index built"
        );
        Ok(Self {
            entries,
            limited: stats.limited,
            built_in,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the scan stopped at the file cap or the timeout.
    pub fn limited(&self) -> bool {
        self.limited
    }

    pub fn built_in(&self) -> Duration {
        self.built_in
    }

    /// Ranked matches, best first. Ties go to the shorter, then the
    /// lexically smaller path.
    pub fn search(&self, query: &str, limit: usize) -> Vec<QuickOpenHit> {
        let started = Instant::now();
        let mut hits: Vec<QuickOpenHit> = self
            .entries
            .iter()
            .filter_map(|(path, display)| {
                fuzzy_match(query, display).map(|hit| QuickOpenHit {
                    path: path.clone(),
                    display: display.clone(),
                    score: hit.score,
                    positions: hit.positions,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.display.len().cmp(&b.display.len()))
                .then_with(|| a.display.cmp(&b.display))
        });
        hits.truncate(limit);
        debug!(
            query,
            hits = hits.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "quick-open filter"
        );
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn populate(root: &Path, dirs: usize, per_dir: usize) {
        for d in 0..dirs {
            let dir = root.join(format!("pkg{d:03}"));
            fs::create_dir_all(&dir).expect("dir");
            for f in 0..per_dir {
                fs::write(dir.join(format!("file{f:03}.txt")), "").expect("file");
            }
        }
    }

    #[test]
    fn cap_marks_index_limited_and_filter_is_fast() {
        let dir = tempdir().expect("tempdir");
        populate(dir.path(), 12, 50);
        let timeout = Duration::from_secs(5);
        let index =
            QuickOpenIndex::build(dir.path(), &IgnoreRules::none(), 500, timeout).expect("index");
        assert_eq!(index.len(), 500);
        assert!(index.limited());

        let started = Instant::now();
        let hits = index.search("f", 50);
        assert!(started.elapsed() < timeout);
        assert_eq!(hits.len(), 50);
    }

    #[test]
    fn zero_timeout_returns_partial_limited_index() {
        let dir = tempdir().expect("tempdir");
        populate(dir.path(), 2, 5);
        let index = QuickOpenIndex::build(dir.path(), &IgnoreRules::none(), 1000, Duration::ZERO)
            .expect("index");
        assert!(index.limited());
        assert!(index.len() < 10);
    }

    #[test]
    fn ranks_basename_hits_first_and_skips_ignored() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("src/widgets")).expect("src");
        fs::create_dir_all(dir.path().join("node_modules/main")).expect("nm");
        fs::write(dir.path().join("src/main.rs"), "").expect("main");
        fs::write(dir.path().join("src/widgets/domain.rs"), "").expect("domain");
        fs::write(dir.path().join("node_modules/main/main.js"), "").expect("nm main");

        let index = QuickOpenIndex::build(
            dir.path(),
            &IgnoreRules::load(dir.path()),
            QUICK_OPEN_MAX_FILES,
            Duration::from_secs(5),
        )
        .expect("index");
        assert!(!index.limited());
        assert_eq!(index.len(), 2);

        let hits = index.search("main", 10);
        assert_eq!(hits[0].display, "src/main.rs");
        assert_eq!(hits[0].positions, vec![4, 5, 6, 7]);
        assert!(hits.iter().all(|hit| !hit.display.contains("node_modules")));
    }
}

use crate::filter::{relative_to, IgnoreRules};
use crate::ScanError;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;
use walkdir::WalkDir;

/// Work bound for a scan; hitting either limit marks the result limited.
#[derive(Debug, Clone, Copy)]
pub struct ScanBudget {
    pub max_files: usize,
    pub deadline: Instant,
}

impl ScanBudget {
    pub fn new(max_files: usize, timeout: Duration) -> Self {
        Self {
            max_files,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files: usize,
    pub skipped: usize,
    pub limited: bool,
}

/// Visits non-ignored regular files under `root` in a stable order. The
/// visitor gets the root-relative and absolute path and returns false to
/// stop early.
pub(crate) fn scan_files<F>(
    root: &Path,
    rules: &IgnoreRules,
    budget: ScanBudget,
    mut visit: F,
) -> Result<ScanStats, ScanError>
where
    F: FnMut(&Path, &Path) -> bool,
{
    if !root.is_dir() {
        return Err(ScanError::MissingRoot(root.to_path_buf()));
    }
    let mut stats = ScanStats::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let Some(rel) = relative_to(root, entry.path()) else {
                return false;
            };
            !IgnoreRules::is_hidden(&rel) && !rules.is_ignored(&rel, entry.file_type().is_dir())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                stats.skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if stats.files >= budget.max_files || budget.expired() {
            stats.limited = true;
            break;
        }
        let Some(rel) = relative_to(root, entry.path()) else {
            continue;
        };
        stats.files += 1;
        if !visit(&rel, entry.path()) {
            break;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn skips_ignored_and_system_entries() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("src")).expect("src");
        fs::create_dir_all(dir.path().join("node_modules/pkg")).expect("nm");
        fs::write(dir.path().join("src/lib.rs"), "").expect("lib");
        fs::write(dir.path().join("node_modules/pkg/index.js"), "").expect("index");
        fs::write(dir.path().join(".DS_Store"), "").expect("ds");

        let mut seen: Vec<PathBuf> = Vec::new();
        let stats = scan_files(
            dir.path(),
            &IgnoreRules::load(dir.path()),
            ScanBudget::new(100, Duration::from_secs(5)),
            |rel, _| {
                seen.push(rel.to_path_buf());
                true
            },
        )
        .expect("scan");
        assert_eq!(seen, vec![PathBuf::from("src/lib.rs")]);
        assert!(!stats.limited);
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempdir().expect("tempdir");
        let gone = dir.path().join("gone");
        let result = scan_files(
            &gone,
            &IgnoreRules::none(),
            ScanBudget::new(10, Duration::from_secs(1)),
            |_, _| true,
        );
        assert!(matches!(result, Err(ScanError::MissingRoot(_))));
    }
}

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const BLOCKED_DIRS: [&str; 12] = [
    ".git",
    "node_modules",
    "vendor",
    ".next",
    "dist",
    "build",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

pub const SYSTEM_FILES: [&str; 9] = [
    ".DS_Store",
    ".Spotlight-V100",
    ".Trashes",
    ".fseventsd",
    ".TemporaryItems",
    ".DocumentRevisions-V100",
    "Thumbs.db",
    "desktop.ini",
    "$RECYCLE.BIN",
];

/// Entries that are hidden no matter what the user toggles.
pub fn is_system_file(name: &str) -> bool {
    name.starts_with("._") || SYSTEM_FILES.contains(&name)
}

/// Ignore rules shared by the tree, quick-open and project search.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    gitignore: Option<Gitignore>,
}

impl IgnoreRules {
    /// Reads `.gitignore` and `.git/info/exclude` at the root. Unreadable
    /// files are logged and skipped.
    pub fn load(root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let mut found = false;
        for candidate in [root.join(".gitignore"), root.join(".git/info/exclude")] {
            if !candidate.is_file() {
                continue;
            }
            match builder.add(&candidate) {
                Some(err) => warn!(path = %candidate.display(), error = %err, "bad ignore file"),
                None => found = true,
            }
        }
        let gitignore = if found {
            match builder.build() {
                Ok(gitignore) => Some(gitignore),
                Err(err) => {
                    warn!(root = %root.display(), error = %err, "failed to build ignore rules");
                    None
                }
            }
        } else {
            None
        };
        debug!(root = %root.display(), gitignore = gitignore.is_some(), "loaded ignore rules");
        Self { gitignore }
    }

    pub fn none() -> Self {
        Self { gitignore: None }
    }

    pub fn is_blocked_dir(name: &str) -> bool {
        BLOCKED_DIRS.contains(&name)
    }

    /// `rel` is relative to the project root.
    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        let blocked = rel.components().any(|component| match component {
            Component::Normal(name) => name.to_str().is_some_and(Self::is_blocked_dir),
            _ => false,
        });
        if blocked {
            return true;
        }
        match &self.gitignore {
            Some(gitignore) if !rel.as_os_str().is_empty() => gitignore
                .matched_path_or_any_parents(rel, is_dir)
                .is_ignore(),
            _ => false,
        }
    }

    /// Hidden in every mode: system files anywhere along the path.
    pub fn is_hidden(rel: &Path) -> bool {
        rel.components().any(|component| match component {
            Component::Normal(name) => name.to_str().is_some_and(is_system_file),
            _ => false,
        })
    }
}

pub(crate) fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn system_files_are_always_hidden() {
        assert!(is_system_file(".DS_Store"));
        assert!(is_system_file("._photo.jpg"));
        assert!(is_system_file("Thumbs.db"));
        assert!(!is_system_file(".env"));
        assert!(IgnoreRules::is_hidden(Path::new("docs/._notes.md")));
    }

    #[test]
    fn blocked_dirs_and_gitignore_entries_are_ignored() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(".gitignore"), "*.log\nout/\n").expect("gitignore");
        let rules = IgnoreRules::load(dir.path());

        assert!(rules.is_ignored(Path::new("node_modules"), true));
        assert!(rules.is_ignored(Path::new("web/node_modules/react/index.js"), false));
        assert!(rules.is_ignored(Path::new("debug.log"), false));
        assert!(rules.is_ignored(Path::new("out"), true));
        assert!(rules.is_ignored(Path::new("out/bundle.js"), false));
        assert!(!rules.is_ignored(Path::new("src/main.rs"), false));
    }

    #[test]
    fn no_gitignore_still_blocks_builtin_dirs() {
        let rules = IgnoreRules::none();
        assert!(rules.is_ignored(Path::new(".git"), true));
        assert!(!rules.is_ignored(Path::new("debug.log"), false));
    }
}

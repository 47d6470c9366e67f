use crate::FileOpError;
use std::fs::{self, OpenOptions};
use std::path::{Component, Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardMode {
    Copy,
    Cut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// New root-relative path of the moved entry.
    Moved(PathBuf),
    /// The destination directory does not exist; ask before creating it.
    NeedsDirectory(PathBuf),
}

pub fn validate_name(name: &str) -> Result<(), FileOpError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FileOpError::InvalidName(name.to_string()));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(FileOpError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Resolves user input to a root-relative path that stays inside the
/// project. Absolute paths and `..` escapes are rejected, as are existing
/// ancestors that resolve outside the root through a symlink.
pub fn validate_destination(root: &Path, input: &str) -> Result<PathBuf, FileOpError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FileOpError::InvalidName(String::new()));
    }
    if input.starts_with('~') {
        return Err(FileOpError::AbsolutePath(input.to_string()));
    }
    let mut rel = PathBuf::new();
    for component in Path::new(input).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(FileOpError::AbsolutePath(input.to_string()));
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !rel.pop() {
                    return Err(FileOpError::OutsideRoot(PathBuf::from(input)));
                }
            }
            Component::Normal(part) => {
                validate_name(&part.to_string_lossy())?;
                rel.push(part);
            }
        }
    }
    if rel.as_os_str().is_empty() {
        return Err(FileOpError::InvalidName(input.to_string()));
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|err| FileOpError::io(root, err))?;
    let mut probe = root.join(&rel);
    while !probe.exists() {
        match probe.parent() {
            Some(parent) => probe = parent.to_path_buf(),
            None => break,
        }
    }
    if let Ok(resolved) = probe.canonicalize() {
        if !resolved.starts_with(&canonical_root) {
            return Err(FileOpError::OutsideRoot(rel));
        }
    }
    Ok(rel)
}

fn require_exists(root: &Path, rel: &Path) -> Result<PathBuf, FileOpError> {
    let abs = root.join(rel);
    if abs.symlink_metadata().is_err() {
        return Err(FileOpError::NotFound(rel.to_path_buf()));
    }
    Ok(abs)
}

fn file_name_of(rel: &Path) -> Result<String, FileOpError> {
    rel.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| FileOpError::InvalidName(rel.display().to_string()))
}

pub fn create_file(root: &Path, rel: &Path) -> Result<PathBuf, FileOpError> {
    let abs = root.join(rel);
    if abs.exists() {
        return Err(FileOpError::AlreadyExists(rel.to_path_buf()));
    }
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).map_err(|err| FileOpError::io(parent, err))?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .map_err(|err| FileOpError::io(&abs, err))?;
    info!(path = %rel.display(), "created file");
    Ok(rel.to_path_buf())
}

pub fn create_dir(root: &Path, rel: &Path) -> Result<PathBuf, FileOpError> {
    let abs = root.join(rel);
    if abs.exists() {
        return Err(FileOpError::AlreadyExists(rel.to_path_buf()));
    }
    fs::create_dir_all(&abs).map_err(|err| FileOpError::io(&abs, err))?;
    info!(path = %rel.display(), "created directory");
    Ok(rel.to_path_buf())
}

/// Same directory, names equal ignoring case, but not identical.
pub fn case_only_rename(from: &Path, to: &Path) -> bool {
    match (from.file_name(), to.file_name()) {
        (Some(a), Some(b)) => {
            from.parent() == to.parent()
                && a != b
                && a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
        }
        _ => false,
    }
}

fn dir_lists_exact(dir: &Path, name: &str) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .any(|entry| entry.file_name().to_string_lossy() == name)
        })
        .unwrap_or(false)
}

pub fn rename_entry(root: &Path, from: &Path, to: &Path) -> Result<PathBuf, FileOpError> {
    let from_abs = require_exists(root, from)?;
    let to_abs = root.join(to);
    if from == to {
        return Ok(to.to_path_buf());
    }

    if case_only_rename(from, to) {
        let parent = from_abs.parent().unwrap_or(root);
        let to_name = file_name_of(to)?;
        // A distinct entry with the target name only exists on case-sensitive filesystems.
        if dir_lists_exact(parent, &to_name) {
            return Err(FileOpError::AlreadyExists(to.to_path_buf()));
        }
        let temp = parent.join(format!(
            ".{}.rename-{}",
            file_name_of(from)?,
            std::process::id()
        ));
        fs::rename(&from_abs, &temp).map_err(|err| FileOpError::io(&from_abs, err))?;
        if let Err(err) = fs::rename(&temp, &to_abs) {
            let _ = fs::rename(&temp, &from_abs);
            return Err(FileOpError::io(&to_abs, err));
        }
        info!(from = %from.display(), to = %to.display(), "case-only rename");
        return Ok(to.to_path_buf());
    }

    if to_abs.symlink_metadata().is_ok() {
        return Err(FileOpError::AlreadyExists(to.to_path_buf()));
    }
    if let Some(parent) = to_abs.parent() {
        if !parent.is_dir() {
            return Err(FileOpError::NotFound(
                to.parent().map(Path::to_path_buf).unwrap_or_default(),
            ));
        }
    }
    fs::rename(&from_abs, &to_abs).map_err(|err| FileOpError::io(&from_abs, err))?;
    info!(from = %from.display(), to = %to.display(), "renamed");
    Ok(to.to_path_buf())
}

/// Moves `from` into the directory `dest_dir`. A missing directory is only
/// created when `create_missing` is set.
pub fn move_entry(
    root: &Path,
    from: &Path,
    dest_dir: &Path,
    create_missing: bool,
) -> Result<MoveOutcome, FileOpError> {
    let from_abs = require_exists(root, from)?;
    let dest_abs = root.join(dest_dir);
    if dest_dir.starts_with(from) {
        return Err(FileOpError::InvalidName(format!(
            "cannot move {} into itself",
            from.display()
        )));
    }
    if !dest_abs.exists() {
        if !create_missing {
            return Ok(MoveOutcome::NeedsDirectory(dest_dir.to_path_buf()));
        }
        fs::create_dir_all(&dest_abs).map_err(|err| FileOpError::io(&dest_abs, err))?;
    } else if !dest_abs.is_dir() {
        return Err(FileOpError::InvalidName(format!(
            "{} is not a directory",
            dest_dir.display()
        )));
    }
    let target = dest_dir.join(file_name_of(from)?);
    let target_abs = root.join(&target);
    if target_abs.symlink_metadata().is_ok() {
        return Err(FileOpError::AlreadyExists(target));
    }
    fs::rename(&from_abs, &target_abs).map_err(|err| FileOpError::io(&from_abs, err))?;
    info!(from = %from.display(), to = %target.display(), "moved");
    Ok(MoveOutcome::Moved(target))
}

pub fn delete_entry(root: &Path, rel: &Path) -> Result<(), FileOpError> {
    if rel.as_os_str().is_empty() {
        return Err(FileOpError::InvalidName("project root".to_string()));
    }
    let abs = require_exists(root, rel)?;
    let meta = abs
        .symlink_metadata()
        .map_err(|err| FileOpError::io(&abs, err))?;
    let removed = if meta.is_dir() {
        fs::remove_dir_all(&abs)
    } else {
        fs::remove_file(&abs)
    };
    removed.map_err(|err| FileOpError::io(&abs, err))?;
    info!(path = %rel.display(), "deleted");
    Ok(())
}

/// First free name in `dir`: `name`, `stem copy.ext`, `stem copy 2.ext`, ...
pub fn copy_name(dir: &Path, name: &str) -> String {
    if dir.join(name).symlink_metadata().is_err() {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = if n == 1 {
            format!("{stem} copy{ext}")
        } else {
            format!("{stem} copy {n}{ext}")
        };
        if dir.join(&candidate).symlink_metadata().is_err() {
            return candidate;
        }
        n += 1;
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), FileOpError> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(from).to_path_buf();
            FileOpError::io(path, err.into())
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(Path::new(""));
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| FileOpError::io(&target, err))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|err| FileOpError::io(&target, err))?;
        }
    }
    Ok(())
}

/// Pastes a copied or cut entry into `dest_dir` without clobbering anything.
pub fn paste(
    root: &Path,
    source: &Path,
    dest_dir: &Path,
    mode: ClipboardMode,
) -> Result<PathBuf, FileOpError> {
    let source_abs = require_exists(root, source)?;
    let dest_abs = root.join(dest_dir);
    if !dest_abs.is_dir() {
        return Err(FileOpError::NotFound(dest_dir.to_path_buf()));
    }
    let name = file_name_of(source)?;
    if mode == ClipboardMode::Cut && source.parent() == Some(dest_dir) {
        return Ok(source.to_path_buf());
    }
    if source_abs.is_dir() && dest_dir.starts_with(source) {
        return Err(FileOpError::InvalidName(format!(
            "cannot paste {} into itself",
            source.display()
        )));
    }
    let target = dest_dir.join(copy_name(&dest_abs, &name));
    let target_abs = root.join(&target);
    match mode {
        ClipboardMode::Copy if source_abs.is_dir() => copy_tree(&source_abs, &target_abs)?,
        ClipboardMode::Copy => {
            fs::copy(&source_abs, &target_abs).map_err(|err| FileOpError::io(&target_abs, err))?;
        }
        ClipboardMode::Cut => {
            fs::rename(&source_abs, &target_abs)
                .map_err(|err| FileOpError::io(&source_abs, err))?;
        }
    }
    info!(from = %source.display(), to = %target.display(), ?mode, "pasted");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn destinations_must_stay_inside_root() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        assert!(matches!(
            validate_destination(root, "/etc/passwd"),
            Err(FileOpError::AbsolutePath(_))
        ));
        assert!(matches!(
            validate_destination(root, "~/x"),
            Err(FileOpError::AbsolutePath(_))
        ));
        assert!(matches!(
            validate_destination(root, "a/../../x"),
            Err(FileOpError::OutsideRoot(_))
        ));
        assert_eq!(
            validate_destination(root, "./a/./b/../c.txt").expect("valid"),
            PathBuf::from("a/c.txt")
        );
        assert!(matches!(
            validate_destination(root, "a/bad\u{7}name"),
            Err(FileOpError::InvalidName(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_ancestor_outside_root_is_rejected() {
        let outside = tempdir().expect("outside");
        let dir = tempdir().expect("tempdir");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");
        assert!(matches!(
            validate_destination(dir.path(), "link/new.txt"),
            Err(FileOpError::OutsideRoot(_))
        ));
    }

    #[test]
    fn case_only_rename_leaves_exactly_one_entry() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("a")).expect("a");
        fs::write(dir.path().join("a/B.txt"), "body").expect("B");

        assert!(case_only_rename(Path::new("a/B.txt"), Path::new("a/b.txt")));
        rename_entry(dir.path(), Path::new("a/B.txt"), Path::new("a/b.txt")).expect("rename");

        assert_eq!(names_in(&dir.path().join("a")), vec!["b.txt".to_string()]);
        assert_eq!(
            fs::read_to_string(dir.path().join("a/b.txt")).expect("read"),
            "body"
        );
    }

    #[test]
    fn rename_refuses_to_clobber() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("x.txt"), "x").expect("x");
        fs::write(dir.path().join("y.txt"), "y").expect("y");
        assert!(matches!(
            rename_entry(dir.path(), Path::new("x.txt"), Path::new("y.txt")),
            Err(FileOpError::AlreadyExists(_))
        ));
        assert!(matches!(
            rename_entry(dir.path(), Path::new("gone.txt"), Path::new("z.txt")),
            Err(FileOpError::NotFound(_))
        ));
    }

    #[test]
    fn move_asks_before_creating_directories() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("x.txt"), "x").expect("x");

        let outcome =
            move_entry(dir.path(), Path::new("x.txt"), Path::new("new/dir"), false).expect("move");
        assert_eq!(outcome, MoveOutcome::NeedsDirectory(PathBuf::from("new/dir")));
        assert!(dir.path().join("x.txt").exists());

        let outcome =
            move_entry(dir.path(), Path::new("x.txt"), Path::new("new/dir"), true).expect("move");
        assert_eq!(outcome, MoveOutcome::Moved(PathBuf::from("new/dir/x.txt")));
        assert!(dir.path().join("new/dir/x.txt").exists());
        assert!(!dir.path().join("x.txt").exists());
    }

    #[test]
    fn cannot_move_directory_into_itself() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("a/b")).expect("a/b");
        assert!(matches!(
            move_entry(dir.path(), Path::new("a"), Path::new("a/b"), false),
            Err(FileOpError::InvalidName(_))
        ));
    }

    #[test]
    fn paste_copies_never_clobber() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("docs")).expect("docs");
        fs::write(dir.path().join("docs/name.ext"), "1").expect("file");
        let source = Path::new("docs/name.ext");
        let docs = Path::new("docs");

        let first = paste(dir.path(), source, docs, ClipboardMode::Copy).expect("copy");
        let second = paste(dir.path(), source, docs, ClipboardMode::Copy).expect("copy");
        assert_eq!(first, PathBuf::from("docs/name copy.ext"));
        assert_eq!(second, PathBuf::from("docs/name copy 2.ext"));
        assert_eq!(copy_name(&dir.path().join("docs"), ".env"), ".env");
    }

    #[test]
    fn paste_cut_moves_and_copies_directories() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("src/nested")).expect("src");
        fs::create_dir_all(dir.path().join("dest")).expect("dest");
        fs::write(dir.path().join("src/nested/f.txt"), "f").expect("f");

        let copied = paste(dir.path(), Path::new("src"), Path::new("dest"), ClipboardMode::Copy)
            .expect("copy dir");
        assert_eq!(copied, PathBuf::from("dest/src"));
        assert!(dir.path().join("dest/src/nested/f.txt").exists());

        let moved = paste(
            dir.path(),
            Path::new("src/nested/f.txt"),
            Path::new("dest"),
            ClipboardMode::Cut,
        )
        .expect("cut");
        assert_eq!(moved, PathBuf::from("dest/f.txt"));
        assert!(!dir.path().join("src/nested/f.txt").exists());
    }

    #[test]
    fn delete_removes_files_and_trees_but_not_root() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("t/u")).expect("t/u");
        fs::write(dir.path().join("t/u/v.txt"), "").expect("v");
        delete_entry(dir.path(), Path::new("t")).expect("delete");
        assert!(!dir.path().join("t").exists());
        assert!(matches!(
            delete_entry(dir.path(), Path::new("")),
            Err(FileOpError::InvalidName(_))
        ));
    }

    #[test]
    fn names_with_separators_are_invalid() {
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("ok name.txt").is_ok());
    }
}

use crate::config::{PluginConfig, PluginKind, SidecarConfig, ROOT_ENV};
use crate::epoch::{Epoch, EpochCounter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a plugin is bound to at `init`. Replaced wholesale when the
/// project root switches; plugins never read process globals.
#[derive(Debug, Clone)]
pub struct Context {
    pub project_root: PathBuf,
    pub work_dir: PathBuf,
    pub home: PathBuf,
    pub config: Arc<SidecarConfig>,
    pub epochs: EpochCounter,
}

impl Context {
    pub fn new(project_root: PathBuf, home: PathBuf, config: Arc<SidecarConfig>) -> Self {
        Self {
            work_dir: project_root.clone(),
            project_root,
            home,
            config,
            epochs: EpochCounter::new(),
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epochs.current()
    }

    pub fn plugin_config(&self, kind: PluginKind) -> &PluginConfig {
        self.config.plugin(kind)
    }

    /// Same counter, new root; the caller advances the epoch.
    pub fn with_root(&self, project_root: PathBuf) -> Self {
        Self {
            work_dir: project_root.clone(),
            project_root,
            home: self.home.clone(),
            config: Arc::clone(&self.config),
            epochs: self.epochs.clone(),
        }
    }

    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.project_root).ok()
    }
}

/// Explicit argument, then `SIDECAR_ROOT`, then the current directory.
pub fn resolve_project_root(explicit: Option<PathBuf>) -> io::Result<PathBuf> {
    let candidate = match explicit {
        Some(path) => path,
        None => match std::env::var_os(ROOT_ENV).filter(|value| !value.is_empty()) {
            Some(value) => PathBuf::from(value),
            None => std::env::current_dir()?,
        },
    };
    let root = candidate.canonicalize()?;
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", root.display()),
        ));
    }
    Ok(root)
}

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn with_root_shares_the_epoch_counter() {
        let ctx = Context::new(
            PathBuf::from("/a"),
            PathBuf::from("/home/dev"),
            Arc::new(SidecarConfig::default()),
        );
        let switched = ctx.with_root(PathBuf::from("/b"));
        switched.epochs.advance();
        assert_eq!(ctx.epoch(), Epoch(1));
        assert_eq!(switched.work_dir, PathBuf::from("/b"));
    }

    #[test]
    fn explicit_root_must_be_a_directory() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").expect("write");
        assert!(resolve_project_root(Some(file)).is_err());
        let root = resolve_project_root(Some(dir.path().to_path_buf())).expect("root");
        assert!(root.is_absolute());
    }
}

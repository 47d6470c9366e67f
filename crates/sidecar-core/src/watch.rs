use crate::debounce::{DebounceTrigger, Debouncer};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch root {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("watch backend error: {0}")]
    Backend(#[from] notify::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub source: SourceId,
    pub kind: SignalKind,
    pub path: PathBuf,
    /// Set on the final signal of a handle whose root vanished.
    pub terminal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Recursive,
    /// Watch only the directory itself; child entries report through it.
    Directory,
}

pub type Predicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

pub fn any_path() -> Predicate {
    Arc::new(|_| true)
}

pub fn suffix_predicate(suffixes: &[&str]) -> Predicate {
    let suffixes: Vec<String> = suffixes.iter().map(|s| s.to_string()).collect();
    Arc::new(move |path: &Path| {
        let name = path.to_string_lossy();
        suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    })
}

pub fn basename_predicate(names: &[&str]) -> Predicate {
    let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    Arc::new(move |path: &Path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| names.iter().any(|wanted| wanted == name))
    })
}

/// Rejects anything under a blocked directory component (`.git`, `node_modules`, ...).
pub fn excluding_components(inner: Predicate, blocked: &[&str]) -> Predicate {
    let blocked: Vec<String> = blocked.iter().map(|s| s.to_string()).collect();
    Arc::new(move |path: &Path| {
        let hit = path.components().any(|component| {
            let part = component.as_os_str().to_string_lossy();
            blocked.iter().any(|b| b == part.as_ref())
        });
        !hit && inner(path)
    })
}

#[derive(Clone)]
pub struct WatchSpec {
    pub root: PathBuf,
    pub mode: WatchMode,
    pub debounce: Duration,
    pub predicate: Predicate,
}

impl fmt::Debug for WatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSpec")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

type SharedSink = Arc<Mutex<Box<dyn FnMut(Signal) + Send>>>;

/// Producer side of the coalescer. Cheap to clone into backend callbacks.
#[derive(Clone)]
pub struct CoalescerFeed {
    source: SourceId,
    predicate: Predicate,
    trigger: DebounceTrigger<Signal>,
    closed: Arc<AtomicBool>,
    sink: SharedSink,
}

impl CoalescerFeed {
    /// Returns true when the raw change matched and reset the debounce timer.
    pub fn feed(&self, kind: SignalKind, path: &Path) -> bool {
        if self.closed.load(Ordering::Acquire) || !(self.predicate)(path) {
            return false;
        }
        self.trigger.trigger(Signal {
            source: self.source.clone(),
            kind,
            path: path.to_path_buf(),
            terminal: false,
        })
    }

    /// Emits the terminal `Removed` signal immediately and stops further emission.
    pub fn terminate(&self, path: &Path) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink(Signal {
            source: self.source.clone(),
            kind: SignalKind::Removed,
            path: path.to_path_buf(),
            terminal: true,
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One debounce timer per handle. The emitted signal carries the kind of the
/// last raw change in the window.
pub struct Coalescer {
    feed: Option<CoalescerFeed>,
    debouncer: Debouncer<Signal>,
}

impl Coalescer {
    pub fn new<F>(source: SourceId, window: Duration, predicate: Predicate, sink: F) -> Self
    where
        F: FnMut(Signal) + Send + 'static,
    {
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(sink)));
        let closed = Arc::new(AtomicBool::new(false));

        let debounced_sink = Arc::clone(&sink);
        let debounced_closed = Arc::clone(&closed);
        let debouncer = Debouncer::spawn(&source.0, window, move |signal: Signal| {
            if debounced_closed.load(Ordering::Acquire) {
                return;
            }
            let mut sink = debounced_sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sink(signal);
        });

        let feed = debouncer.trigger_handle().map(|trigger| CoalescerFeed {
            source,
            predicate,
            trigger,
            closed,
            sink,
        });

        Self { feed, debouncer }
    }

    pub fn feed(&self) -> Option<&CoalescerFeed> {
        self.feed.as_ref()
    }

    pub fn close(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.closed.store(true, Ordering::Release);
        }
        self.debouncer.stop();
    }
}

impl Drop for Coalescer {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct WatchHandle {
    source: SourceId,
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    coalescer: Coalescer,
}

impl WatchHandle {
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_closed(&self) -> bool {
        self.watcher.is_none()
            || self
                .coalescer
                .feed()
                .map_or(true, |feed| feed.is_closed())
    }

    /// Stops emission and releases the OS watch. Signals already handed to the
    /// sink may still be in flight on the bus.
    pub fn close(&mut self) {
        self.watcher = None;
        self.coalescer.close();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn watch<F>(source: SourceId, spec: WatchSpec, sink: F) -> Result<WatchHandle, WatchError>
where
    F: FnMut(Signal) + Send + 'static,
{
    if !spec.root.exists() {
        return Err(WatchError::MissingRoot(spec.root));
    }

    let coalescer = Coalescer::new(source.clone(), spec.debounce, spec.predicate, sink);
    let Some(feed) = coalescer.feed().cloned() else {
        return Err(WatchError::Backend(notify::Error::generic(
            "debounce worker failed to start",
        )));
    };

    let root = spec.root.clone();
    let callback_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                for (kind, path) in classify_event(&event) {
                    if kind == SignalKind::Removed && path == callback_root {
                        feed.terminate(&callback_root);
                        return;
                    }
                    feed.feed(kind, &path);
                }
            }
            Err(err) => {
                if !callback_root.exists() {
                    warn!(root = %callback_root.display(), "watch root vanished: {err}");
                    feed.terminate(&callback_root);
                } else {
                    warn!(root = %callback_root.display(), "transient watch error: {err}");
                }
            }
        }
    })?;

    let recursive = match spec.mode {
        WatchMode::Recursive => RecursiveMode::Recursive,
        WatchMode::Directory => RecursiveMode::NonRecursive,
    };
    watcher.watch(&root, recursive)?;
    debug!(source = %source, root = %root.display(), ?recursive, "watch started");

    Ok(WatchHandle {
        source,
        root,
        watcher: Some(watcher),
        coalescer,
    })
}

fn classify_event(event: &notify::Event) -> Vec<(SignalKind, PathBuf)> {
    match &event.kind {
        EventKind::Create(_) => tag_all(SignalKind::Created, &event.paths),
        EventKind::Remove(_) => tag_all(SignalKind::Removed, &event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            tag_all(SignalKind::Removed, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            tag_all(SignalKind::Created, &event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(event.paths.len());
            if let Some(from) = event.paths.first() {
                out.push((SignalKind::Removed, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((SignalKind::Created, to.clone()));
            }
            out
        }
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            tag_all(SignalKind::Modified, &event.paths)
        }
        EventKind::Access(_) => Vec::new(),
    }
}

fn tag_all(kind: SignalKind, paths: &[PathBuf]) -> Vec<(SignalKind, PathBuf)> {
    paths.iter().map(|path| (kind, path.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Instant;

    #[test]
    fn burst_of_raw_changes_yields_one_signal() {
        let (tx, rx) = channel();
        let window = Duration::from_millis(100);
        let coalescer = Coalescer::new(
            SourceId::new("files"),
            window,
            suffix_predicate(&[".txt"]),
            move |signal| {
                let _ = tx.send((signal, Instant::now()));
            },
        );
        let feed = coalescer.feed().expect("feed").clone();

        let path = PathBuf::from("/root/x.txt");
        for _ in 0..49 {
            assert!(feed.feed(SignalKind::Modified, &path));
        }
        let last_raw = Instant::now();
        assert!(feed.feed(SignalKind::Modified, &path));

        let (signal, at) = rx.recv_timeout(Duration::from_secs(2)).expect("signal");
        let elapsed = at.duration_since(last_raw);
        assert_eq!(signal.kind, SignalKind::Modified);
        assert!(elapsed >= window, "fired too early: {elapsed:?}");
        assert!(elapsed <= window * 2, "fired too late: {elapsed:?}");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn later_kind_wins_inside_one_window() {
        let (tx, rx) = channel();
        let coalescer = Coalescer::new(
            SourceId::new("db"),
            Duration::from_millis(50),
            basename_predicate(&["store.db", "store.db-wal"]),
            move |signal| {
                let _ = tx.send(signal);
            },
        );
        let feed = coalescer.feed().expect("feed");

        assert!(feed.feed(SignalKind::Removed, Path::new("/s/store.db")));
        assert!(!feed.feed(SignalKind::Modified, Path::new("/s/other.db")));
        assert!(feed.feed(SignalKind::Created, Path::new("/s/store.db-wal")));

        let signal = rx.recv_timeout(Duration::from_secs(2)).expect("signal");
        assert_eq!(signal.kind, SignalKind::Created);
        assert_eq!(signal.path, PathBuf::from("/s/store.db-wal"));
    }

    #[test]
    fn terminate_emits_once_and_silences_feed() {
        let (tx, rx) = channel();
        let coalescer = Coalescer::new(
            SourceId::new("files"),
            Duration::from_millis(20),
            any_path(),
            move |signal| {
                let _ = tx.send(signal);
            },
        );
        let feed = coalescer.feed().expect("feed");
        feed.terminate(Path::new("/gone"));
        feed.terminate(Path::new("/gone"));
        assert!(!feed.feed(SignalKind::Modified, Path::new("/gone/a")));

        let signal = rx.recv_timeout(Duration::from_secs(1)).expect("terminal");
        assert!(signal.terminal);
        assert_eq!(signal.kind, SignalKind::Removed);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn excluded_components_never_match() {
        let predicate = excluding_components(any_path(), &[".git", "node_modules"]);
        assert!(!predicate(Path::new("/repo/.git/index")));
        assert!(!predicate(Path::new("/repo/web/node_modules/x.js")));
        assert!(predicate(Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn watch_reports_file_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = channel();
        let spec = WatchSpec {
            root: dir.path().to_path_buf(),
            mode: WatchMode::Recursive,
            debounce: Duration::from_millis(50),
            predicate: any_path(),
        };
        let handle = watch(SourceId::new("tmp"), spec, move |signal| {
            let _ = tx.send(signal);
        })
        .expect("start watch");

        std::fs::write(dir.path().join("new.txt"), "hello").expect("write file");
        let signal = rx.recv_timeout(Duration::from_secs(5)).expect("signal");
        assert_eq!(signal.source, SourceId::new("tmp"));
        assert!(!signal.terminal);
        drop(handle);
    }

    #[test]
    fn watch_rejects_missing_root() {
        let spec = WatchSpec {
            root: PathBuf::from("/definitely/not/here/sidecar"),
            mode: WatchMode::Directory,
            debounce: Duration::from_millis(10),
            predicate: any_path(),
        };
        let result = watch(SourceId::new("missing"), spec, |_| {});
        assert!(matches!(result, Err(WatchError::MissingRoot(_))));
    }
}

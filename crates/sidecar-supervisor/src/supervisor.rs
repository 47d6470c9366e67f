use crate::backend::{NewSession, TmuxBackend, TmuxSessionInfo};
use crate::editor::{normalize_editor, save_quit_recipe, EditorKind};
use crate::input::{encode_sgr_mouse, ForwardKey, MouseInput};
use crate::screen::CaptureJob;
use crate::SupervisorError;
use sha2::{Digest, Sha256};
use sidecar_core::debounce::Debounce;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

pub const SESSION_PREFIX: &str = "sidecar-";
pub const DRAG_RATE_LIMIT: Duration = Duration::from_millis(30);
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(150);
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Deterministic tmux session name for one (owner, target) pair.
pub fn session_name_for(owner: &str, target: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update([0u8]);
    hasher.update(target.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let short: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
    format!("{SESSION_PREFIX}{owner}-{short}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub name: String,
    pub owner: String,
    /// Empty for adopted sessions that were not started here.
    pub target: PathBuf,
    pub editor: String,
    pub kind: EditorKind,
    pub started_at: SystemTime,
    pub original_mtime: Option<SystemTime>,
    pub cols: u16,
    pub rows: u16,
    pub attached: bool,
    pub foreign: bool,
}

impl EditSession {
    /// True when the target was written after the session started.
    pub fn target_changed(&self) -> bool {
        if self.foreign {
            return false;
        }
        let current = fs::metadata(&self.target).and_then(|meta| meta.modified()).ok();
        current != self.original_mtime
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The editor ran its save-and-quit recipe and exited.
    Saved,
    /// The editor did not exit in time and was killed.
    Killed,
    /// No recipe for this editor; the session is left running.
    NeedsPrompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Resized {
        session: String,
        owner: String,
        cols: u16,
        rows: u16,
    },
    Closed {
        session: String,
        owner: String,
        outcome: CloseOutcome,
    },
    Died {
        session: String,
        owner: String,
        target: PathBuf,
        target_changed: bool,
    },
}

#[derive(Debug, Clone)]
pub struct OpenRequest<'a> {
    pub owner: &'a str,
    pub target: &'a Path,
    pub editor: &'a str,
    pub cwd: &'a Path,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug)]
struct Entry {
    session: EditSession,
    resize: Debounce,
    pending_size: Option<(u16, u16)>,
    last_drag: Option<Instant>,
    close_deadline: Option<Instant>,
}

impl Entry {
    fn new(session: EditSession) -> Self {
        Self {
            session,
            resize: Debounce::new(RESIZE_DEBOUNCE),
            pending_size: None,
            last_drag: None,
            close_deadline: None,
        }
    }
}

/// Owns every child terminal session. Plugins refer to sessions by name only.
pub struct Supervisor<B> {
    backend: B,
    term: String,
    sessions: BTreeMap<String, Entry>,
}

impl<B: TmuxBackend + Clone> Supervisor<B> {
    pub fn new(backend: B, term: impl Into<String>) -> Self {
        Self {
            backend,
            term: term.into(),
            sessions: BTreeMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn get(&self, name: &str) -> Option<&EditSession> {
        self.sessions.get(name).map(|entry| &entry.session)
    }

    pub fn session_for(&self, owner: &str, target: &Path) -> Option<&EditSession> {
        self.get(&session_name_for(owner, target))
    }

    pub fn sessions(&self) -> impl Iterator<Item = &EditSession> {
        self.sessions.values().map(|entry| &entry.session)
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut Entry, SupervisorError> {
        self.sessions
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownSession(name.to_string()))
    }

    /// Starts `editor target` in a detached session, or returns the live
    /// session already editing this target for this owner.
    pub fn open(&mut self, request: OpenRequest<'_>) -> Result<EditSession, SupervisorError> {
        validate_size(request.cols, request.rows)?;
        let name = session_name_for(request.owner, request.target);
        let alive = self.backend.has_session(&name)?;

        if let Some(entry) = self.sessions.get(&name) {
            if alive {
                debug!(session = %name, "reusing edit session");
                return Ok(entry.session.clone());
            }
            info!(session = %name, "edit session died; restarting");
            self.sessions.remove(&name);
        }

        let kind = normalize_editor(request.editor);
        let original_mtime = fs::metadata(request.target)
            .and_then(|meta| meta.modified())
            .ok();
        let session = EditSession {
            name: name.clone(),
            owner: request.owner.to_string(),
            target: request.target.to_path_buf(),
            editor: request.editor.to_string(),
            kind,
            started_at: SystemTime::now(),
            original_mtime,
            cols: request.cols,
            rows: request.rows,
            attached: true,
            foreign: false,
        };

        if alive {
            // Left over from an earlier run; adopt rather than start a second editor.
            info!(session = %name, "adopting existing edit session");
            self.backend.resize(&name, request.cols, request.rows)?;
        } else {
            let mut command: Vec<String> = request
                .editor
                .split_whitespace()
                .map(str::to_string)
                .collect();
            command.push(request.target.to_string_lossy().into_owned());
            self.backend.new_session(&NewSession {
                name: name.clone(),
                cols: request.cols,
                rows: request.rows,
                cwd: request.cwd.to_path_buf(),
                term: self.term.clone(),
                command,
            })?;
            info!(
                session = %name,
                editor = %request.editor,
                target = %request.target.display(),
                "started edit session"
            );
        }

        self.sessions.insert(name, Entry::new(session.clone()));
        Ok(session)
    }

    /// Tracks a session this process did not start. It is never killed by
    /// the supervisor, only released.
    pub fn adopt(
        &mut self,
        owner: &str,
        name: &str,
        cols: u16,
        rows: u16,
    ) -> Result<EditSession, SupervisorError> {
        validate_size(cols, rows)?;
        if let Some(entry) = self.sessions.get(name) {
            return Ok(entry.session.clone());
        }
        if !self.backend.has_session(name)? {
            return Err(SupervisorError::UnknownSession(name.to_string()));
        }
        let session = EditSession {
            name: name.to_string(),
            owner: owner.to_string(),
            target: PathBuf::new(),
            editor: String::new(),
            kind: EditorKind::Unknown(String::new()),
            started_at: SystemTime::now(),
            original_mtime: None,
            cols,
            rows,
            attached: false,
            foreign: true,
        };
        self.sessions
            .insert(name.to_string(), Entry::new(session.clone()));
        Ok(session)
    }

    /// Stops tracking a session without touching the child.
    pub fn release(&mut self, name: &str) -> Option<EditSession> {
        self.sessions.remove(name).map(|entry| entry.session)
    }

    pub fn attach(&mut self, name: &str, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        validate_size(cols, rows)?;
        let backend = self.backend.clone();
        let entry = self.entry_mut(name)?;
        entry.session.attached = true;
        if (entry.session.cols, entry.session.rows) != (cols, rows) {
            backend.resize(name, cols, rows)?;
            entry.session.cols = cols;
            entry.session.rows = rows;
            entry.pending_size = None;
            entry.resize.cancel();
        }
        Ok(())
    }

    pub fn detach(&mut self, name: &str) -> Result<(), SupervisorError> {
        self.entry_mut(name)?.session.attached = false;
        Ok(())
    }

    /// Records the wanted size; `poll` applies it once the burst settles.
    pub fn request_resize(
        &mut self,
        name: &str,
        cols: u16,
        rows: u16,
        now: Instant,
    ) -> Result<(), SupervisorError> {
        validate_size(cols, rows)?;
        let entry = self.entry_mut(name)?;
        entry.pending_size = Some((cols, rows));
        entry.resize.poke(now);
        Ok(())
    }

    /// Time until the earliest pending resize or close deadline.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.sessions
            .values()
            .filter_map(|entry| {
                let resize = entry.resize.time_until_due(now);
                let close = entry
                    .close_deadline
                    .map(|deadline| deadline.saturating_duration_since(now));
                match (resize, close) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            })
            .min()
    }

    /// Applies settled resizes, resolves pending closes and reports sessions
    /// whose child has exited.
    pub fn poll(&mut self, now: Instant) -> Vec<SupervisorEvent> {
        let mut events = Vec::new();
        let mut finished = Vec::new();

        for (name, entry) in self.sessions.iter_mut() {
            let alive = match self.backend.has_session(name) {
                Ok(alive) => alive,
                Err(err) => {
                    warn!(session = %name, error = %err, "tmux probe failed");
                    continue;
                }
            };

            if entry.close_deadline.is_some() {
                let outcome = if !alive {
                    Some(CloseOutcome::Saved)
                } else if entry.close_deadline.is_some_and(|deadline| now >= deadline) {
                    if let Err(err) = self.backend.kill_session(name) {
                        warn!(session = %name, error = %err, "kill after close timeout failed");
                    }
                    Some(CloseOutcome::Killed)
                } else {
                    None
                };
                if let Some(outcome) = outcome {
                    info!(session = %name, ?outcome, "edit session closed");
                    events.push(SupervisorEvent::Closed {
                        session: name.clone(),
                        owner: entry.session.owner.clone(),
                        outcome,
                    });
                    finished.push(name.clone());
                }
                continue;
            }

            if !alive {
                let target_changed = entry.session.target_changed();
                info!(session = %name, target_changed, "edit session exited");
                events.push(SupervisorEvent::Died {
                    session: name.clone(),
                    owner: entry.session.owner.clone(),
                    target: entry.session.target.clone(),
                    target_changed,
                });
                finished.push(name.clone());
                continue;
            }

            if entry.resize.fire_if_due(now) {
                if let Some((cols, rows)) = entry.pending_size.take() {
                    if (cols, rows) != (entry.session.cols, entry.session.rows) {
                        match self.backend.resize(name, cols, rows) {
                            Ok(()) => {
                                debug!(session = %name, cols, rows, "resized");
                                entry.session.cols = cols;
                                entry.session.rows = rows;
                                events.push(SupervisorEvent::Resized {
                                    session: name.clone(),
                                    owner: entry.session.owner.clone(),
                                    cols,
                                    rows,
                                });
                            }
                            Err(err) => {
                                warn!(session = %name, error = %err, "resize failed")
                            }
                        }
                    }
                }
            }
        }

        for name in finished {
            self.sessions.remove(&name);
        }
        events
    }

    pub fn forward_keys(&self, name: &str, keys: &[ForwardKey]) -> Result<(), SupervisorError> {
        if !self.sessions.contains_key(name) {
            return Err(SupervisorError::UnknownSession(name.to_string()));
        }
        let mut batch: Vec<String> = Vec::new();
        let mut batch_literal = false;
        for key in keys {
            let (arg, literal) = key.to_tmux();
            if !batch.is_empty() && literal != batch_literal {
                self.backend.send_keys(name, &batch, batch_literal)?;
                batch.clear();
            }
            batch_literal = literal;
            batch.push(arg);
        }
        self.backend.send_keys(name, &batch, batch_literal)
    }

    /// Forwards a mouse event. Drag and motion events closer than
    /// `DRAG_RATE_LIMIT` to the previous one are dropped; returns whether the
    /// event was sent.
    pub fn forward_mouse(
        &mut self,
        name: &str,
        event: &MouseInput,
        now: Instant,
    ) -> Result<bool, SupervisorError> {
        let backend = self.backend.clone();
        let entry = self.entry_mut(name)?;
        if event.is_drag() {
            if let Some(last) = entry.last_drag {
                if now.saturating_duration_since(last) < DRAG_RATE_LIMIT {
                    return Ok(false);
                }
            }
            entry.last_drag = Some(now);
        }
        backend.send_keys(name, &[encode_sgr_mouse(event)], true)?;
        Ok(true)
    }

    pub fn is_alive(&self, name: &str) -> Result<bool, SupervisorError> {
        if !self.sessions.contains_key(name) {
            return Ok(false);
        }
        self.backend.has_session(name)
    }

    /// Asks the editor to save and quit. `None` means the recipe was sent and
    /// the outcome arrives from `poll` as `SupervisorEvent::Closed`.
    pub fn close(
        &mut self,
        name: &str,
        now: Instant,
    ) -> Result<Option<CloseOutcome>, SupervisorError> {
        let backend = self.backend.clone();
        let entry = self.entry_mut(name)?;
        if entry.session.foreign {
            self.sessions.remove(name);
            return Ok(Some(CloseOutcome::Saved));
        }
        if !backend.has_session(name)? {
            self.sessions.remove(name);
            return Ok(Some(CloseOutcome::Saved));
        }
        let Some(recipe) = save_quit_recipe(&entry.session.kind) else {
            return Ok(Some(CloseOutcome::NeedsPrompt));
        };
        for step in &recipe {
            backend.send_keys(name, &step.keys, step.literal)?;
        }
        entry.close_deadline = Some(now + CLOSE_TIMEOUT);
        debug!(session = %name, editor = entry.session.kind.id(), "sent save-and-quit");
        Ok(None)
    }

    /// Kills the child immediately. Adopted sessions are only released.
    pub fn kill(&mut self, name: &str) -> Result<(), SupervisorError> {
        let Some(entry) = self.sessions.remove(name) else {
            return Ok(());
        };
        if entry.session.foreign {
            return Ok(());
        }
        if self.backend.has_session(name)? {
            self.backend.kill_session(name)?;
            info!(session = %name, "killed edit session");
        }
        Ok(())
    }

    /// Tears down everything an owner holds; used when a plugin stops.
    pub fn stop_owner(&mut self, owner: &str) -> usize {
        let names: Vec<String> = self
            .sessions
            .values()
            .filter(|entry| entry.session.owner == owner)
            .map(|entry| entry.session.name.clone())
            .collect();
        for name in &names {
            if let Err(err) = self.kill(name) {
                warn!(session = %name, error = %err, "failed to stop session");
            }
        }
        names.len()
    }

    pub fn capture_job(
        &self,
        name: &str,
        max_bytes: usize,
    ) -> Result<CaptureJob<B>, SupervisorError> {
        let entry = self
            .sessions
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownSession(name.to_string()))?;
        Ok(CaptureJob::new(
            self.backend.clone(),
            name.to_string(),
            entry.session.cols,
            entry.session.rows,
            max_bytes,
        ))
    }

    /// Sessions on the tmux server that this process did not start.
    pub fn list_foreign_sessions(&self) -> Result<Vec<TmuxSessionInfo>, SupervisorError> {
        Ok(self
            .backend
            .list_sessions()?
            .into_iter()
            .filter(|info| !info.name.starts_with(SESSION_PREFIX))
            .collect())
    }
}

fn validate_size(cols: u16, rows: u16) -> Result<(), SupervisorError> {
    if cols == 0 || rows == 0 {
        return Err(SupervisorError::InvalidSize { cols, rows });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeTmux;
    use crate::input::{MouseButton, MouseKind};
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn request<'a>(target: &'a Path, editor: &'a str, cwd: &'a Path) -> OpenRequest<'a> {
        OpenRequest {
            owner: "files",
            target,
            editor,
            cwd,
            cols: 80,
            rows: 24,
        }
    }

    #[test]
    fn second_open_reuses_the_same_child() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x.txt");
        fs::write(&target, "x").expect("write");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm-256color");

        let first = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("open");
        let second = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("reopen");
        assert_eq!(first.name, second.name);
        assert_eq!(tmux.spawned(), 1);
        assert_eq!(
            tmux.command_of(&first.name),
            Some(vec!["vim".to_string(), target.to_string_lossy().into_owned()])
        );
        assert_eq!(tmux.term_of(&first.name).as_deref(), Some("xterm-256color"));
    }

    #[test]
    fn reattach_after_tab_switch_keeps_process_and_screen_advances() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        fs::write(&target, "").expect("write");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm-256color");
        let session = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("open");

        supervisor
            .forward_keys(&session.name, &[ForwardKey::Text("hello".to_string())])
            .expect("keys");
        let before = supervisor
            .capture_job(&session.name, 4096)
            .expect("job")
            .run()
            .expect("capture");
        assert_eq!(before.text_lines()[0], "hello");

        supervisor.detach(&session.name).expect("detach");
        tmux.append_screen(&session.name, b" world");
        supervisor.attach(&session.name, 80, 24).expect("attach");
        let again = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("reopen");

        assert_eq!(again.name, session.name);
        assert!(supervisor.is_alive(&session.name).expect("alive"));
        let after = supervisor
            .capture_job(&session.name, 4096)
            .expect("job")
            .run()
            .expect("capture");
        assert_eq!(after.text_lines()[0], "hello world");
        assert_eq!(tmux.spawned(), 1);
    }

    #[test]
    fn dead_session_is_restarted_on_next_open() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        let session = supervisor
            .open(request(&target, "nano", dir.path()))
            .expect("open");
        tmux.simulate_exit(&session.name);
        assert!(!supervisor.is_alive(&session.name).expect("probe"));
        supervisor
            .open(request(&target, "nano", dir.path()))
            .expect("reopen");
        assert_eq!(tmux.spawned(), 2);
    }

    #[test]
    fn resize_burst_applies_once_after_quiet_window() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        let name = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("open")
            .name;

        let start = Instant::now();
        for (offset, cols) in [(0, 90), (50, 100), (100, 110)] {
            supervisor
                .request_resize(&name, cols, 30, start + Duration::from_millis(offset))
                .expect("request");
        }
        assert!(supervisor
            .poll(start + Duration::from_millis(200))
            .is_empty());
        let events = supervisor.poll(start + Duration::from_millis(260));
        assert_eq!(
            events,
            vec![SupervisorEvent::Resized {
                session: name.clone(),
                owner: "files".to_string(),
                cols: 110,
                rows: 30,
            }]
        );
        assert_eq!(tmux.resizes(), vec![(name.clone(), 110, 30)]);
        assert!(supervisor
            .poll(start + Duration::from_millis(600))
            .is_empty());
    }

    #[test]
    fn close_with_recipe_reports_saved_when_editor_exits() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        let tmux = FakeTmux::default();
        tmux.exit_when_sent(":wq Enter");
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        let name = supervisor
            .open(request(&target, "/usr/bin/nvim", dir.path()))
            .expect("open")
            .name;

        let now = Instant::now();
        assert_eq!(supervisor.close(&name, now).expect("close"), None);
        let events = supervisor.poll(now);
        assert_eq!(
            events,
            vec![SupervisorEvent::Closed {
                session: name.clone(),
                owner: "files".to_string(),
                outcome: CloseOutcome::Saved,
            }]
        );
        assert!(supervisor.get(&name).is_none());
    }

    #[test]
    fn close_times_out_into_kill() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        let name = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("open")
            .name;

        let now = Instant::now();
        assert_eq!(supervisor.close(&name, now).expect("close"), None);
        assert!(supervisor.poll(now + Duration::from_millis(10)).is_empty());
        let events = supervisor.poll(now + CLOSE_TIMEOUT);
        assert!(matches!(
            events.as_slice(),
            [SupervisorEvent::Closed {
                outcome: CloseOutcome::Killed,
                ..
            }]
        ));
        assert!(tmux.live_sessions().is_empty());
    }

    #[test]
    fn unknown_editor_needs_prompt_and_stays_alive() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        let name = supervisor
            .open(request(&target, "ed", dir.path()))
            .expect("open")
            .name;
        assert_eq!(
            supervisor.close(&name, Instant::now()).expect("close"),
            Some(CloseOutcome::NeedsPrompt)
        );
        assert!(supervisor.is_alive(&name).expect("alive"));
    }

    #[test]
    fn death_reports_whether_target_was_written() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("notes.md");
        fs::write(&target, "draft").expect("write");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        let session = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("open");

        let later = session.original_mtime.expect("mtime") + Duration::from_secs(5);
        OpenOptions::new()
            .write(true)
            .open(&target)
            .expect("open target")
            .set_modified(later)
            .expect("set mtime");
        tmux.simulate_exit(&session.name);

        let events = supervisor.poll(Instant::now());
        assert_eq!(
            events,
            vec![SupervisorEvent::Died {
                session: session.name.clone(),
                owner: "files".to_string(),
                target: target.clone(),
                target_changed: true,
            }]
        );
    }

    #[test]
    fn drag_motion_is_rate_limited() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        let tmux = FakeTmux::default();
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        let name = supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("open")
            .name;

        let drag = MouseInput::new(MouseKind::Drag(MouseButton::Left), 3, 3);
        let press = MouseInput::new(MouseKind::Press(MouseButton::Left), 3, 3);
        let t = Instant::now();
        assert!(supervisor.forward_mouse(&name, &drag, t).expect("send"));
        assert!(!supervisor
            .forward_mouse(&name, &drag, t + Duration::from_millis(10))
            .expect("send"));
        assert!(supervisor
            .forward_mouse(&name, &press, t + Duration::from_millis(11))
            .expect("send"));
        assert!(supervisor
            .forward_mouse(&name, &drag, t + Duration::from_millis(40))
            .expect("send"));
        assert_eq!(tmux.keys_sent(&name).len(), 3);
    }

    #[test]
    fn foreign_sessions_exclude_our_own_and_are_never_killed() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("x");
        let tmux = FakeTmux::default();
        tmux.insert_session("work", 120, 40);
        let mut supervisor = Supervisor::new(tmux.clone(), "xterm");
        supervisor
            .open(request(&target, "vim", dir.path()))
            .expect("open");

        let foreign = supervisor.list_foreign_sessions().expect("list");
        assert_eq!(foreign.len(), 1);
        assert_eq!(foreign[0].name, "work");

        supervisor.adopt("terminal", "work", 80, 24).expect("adopt");
        assert_eq!(supervisor.stop_owner("terminal"), 1);
        assert_eq!(supervisor.stop_owner("files"), 1);
        assert_eq!(tmux.live_sessions(), vec!["work".to_string()]);
    }

    #[test]
    fn session_names_are_stable_per_owner_and_target() {
        let a = session_name_for("files", Path::new("/p/a.txt"));
        assert_eq!(a, session_name_for("files", Path::new("/p/a.txt")));
        assert_ne!(a, session_name_for("notes", Path::new("/p/a.txt")));
        assert!(a.starts_with("sidecar-files-"));
        assert_eq!(a.len(), "sidecar-files-".len() + 12);
    }
}

//! In-memory tmux used by tests here and in the binary crate.

use crate::backend::{NewSession, TmuxBackend, TmuxSessionInfo};
use crate::SupervisorError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct FakeSession {
    cols: u16,
    rows: u16,
    command: Vec<String>,
    term: String,
    screen: Vec<u8>,
    transcript: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    sessions: BTreeMap<String, FakeSession>,
    spawned: usize,
    resizes: Vec<(String, u16, u16)>,
    exit_suffix: Option<String>,
}

/// Cheap to clone; clones share state so a test can keep a handle while the
/// supervisor owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeTmux {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTmux {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Adds a session that was not started through `new_session`.
    pub fn insert_session(&self, name: &str, cols: u16, rows: u16) {
        self.lock().sessions.insert(
            name.to_string(),
            FakeSession {
                cols,
                rows,
                ..FakeSession::default()
            },
        );
    }

    pub fn set_screen(&self, name: &str, bytes: Vec<u8>) {
        if let Some(session) = self.lock().sessions.get_mut(name) {
            session.screen = bytes;
        }
    }

    pub fn append_screen(&self, name: &str, bytes: &[u8]) {
        if let Some(session) = self.lock().sessions.get_mut(name) {
            session.screen.extend_from_slice(bytes);
        }
    }

    /// The child exits as if the user quit it.
    pub fn simulate_exit(&self, name: &str) {
        self.lock().sessions.remove(name);
    }

    /// Sessions exit once the keys sent to them, joined by spaces, end with
    /// `suffix`.
    pub fn exit_when_sent(&self, suffix: &str) {
        self.lock().exit_suffix = Some(suffix.to_string());
    }

    pub fn spawned(&self) -> usize {
        self.lock().spawned
    }

    pub fn live_sessions(&self) -> Vec<String> {
        self.lock().sessions.keys().cloned().collect()
    }

    pub fn keys_sent(&self, name: &str) -> Vec<String> {
        self.lock()
            .sessions
            .get(name)
            .map(|session| session.transcript.clone())
            .unwrap_or_default()
    }

    pub fn resizes(&self) -> Vec<(String, u16, u16)> {
        self.lock().resizes.clone()
    }

    pub fn size_of(&self, name: &str) -> Option<(u16, u16)> {
        self.lock()
            .sessions
            .get(name)
            .map(|session| (session.cols, session.rows))
    }

    pub fn command_of(&self, name: &str) -> Option<Vec<String>> {
        self.lock()
            .sessions
            .get(name)
            .map(|session| session.command.clone())
    }

    pub fn term_of(&self, name: &str) -> Option<String> {
        self.lock()
            .sessions
            .get(name)
            .map(|session| session.term.clone())
    }
}

fn missing(name: &str, command: &str) -> SupervisorError {
    SupervisorError::Tmux {
        command: command.to_string(),
        stderr: format!("can't find session: {name}"),
    }
}

impl TmuxBackend for FakeTmux {
    fn new_session(&self, spec: &NewSession) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        if state.sessions.contains_key(&spec.name) {
            return Err(SupervisorError::Tmux {
                command: "new-session".to_string(),
                stderr: format!("duplicate session: {}", spec.name),
            });
        }
        state.spawned += 1;
        state.sessions.insert(
            spec.name.clone(),
            FakeSession {
                cols: spec.cols,
                rows: spec.rows,
                command: spec.command.clone(),
                term: spec.term.clone(),
                screen: Vec::new(),
                transcript: Vec::new(),
            },
        );
        Ok(())
    }

    fn has_session(&self, name: &str) -> Result<bool, SupervisorError> {
        Ok(self.lock().sessions.contains_key(name))
    }

    fn kill_session(&self, name: &str) -> Result<(), SupervisorError> {
        match self.lock().sessions.remove(name) {
            Some(_) => Ok(()),
            None => Err(missing(name, "kill-session")),
        }
    }

    fn resize(&self, name: &str, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(name)
            .ok_or_else(|| missing(name, "resize-window"))?;
        session.cols = cols;
        session.rows = rows;
        state.resizes.push((name.to_string(), cols, rows));
        Ok(())
    }

    fn send_keys(&self, name: &str, keys: &[String], literal: bool) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        let suffix = state.exit_suffix.clone();
        let session = state
            .sessions
            .get_mut(name)
            .ok_or_else(|| missing(name, "send-keys"))?;
        for key in keys {
            if literal {
                session.screen.extend_from_slice(key.as_bytes());
            }
            session.transcript.push(key.clone());
        }
        let exited = suffix.is_some_and(|suffix| session.transcript.join(" ").ends_with(&suffix));
        if exited {
            state.sessions.remove(name);
        }
        Ok(())
    }

    fn capture(&self, name: &str) -> Result<Vec<u8>, SupervisorError> {
        self.lock()
            .sessions
            .get(name)
            .map(|session| session.screen.clone())
            .ok_or_else(|| missing(name, "capture-pane"))
    }

    fn cursor(&self, name: &str) -> Result<Option<(u16, u16)>, SupervisorError> {
        if self.lock().sessions.contains_key(name) {
            Ok(None)
        } else {
            Err(missing(name, "display-message"))
        }
    }

    fn list_sessions(&self) -> Result<Vec<TmuxSessionInfo>, SupervisorError> {
        Ok(self
            .lock()
            .sessions
            .keys()
            .map(|name| TmuxSessionInfo {
                name: name.clone(),
                windows: 1,
                attached: false,
                created: None,
            })
            .collect())
    }
}

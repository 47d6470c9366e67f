use crate::plugin::{HostMsg, PluginMsg};
use sidecar_core::bus::{BusSender, Envelope, Priority};
use sidecar_core::{Epoch, EpochCounter, PluginKind};
use sidecar_supervisor::{
    CloseOutcome, EditSession, ForwardKey, MouseInput, OpenRequest, ScreenSnapshot, Supervisor,
    SupervisorEvent, TmuxBackend, TmuxSessionInfo,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Open {
        target: PathBuf,
        editor: String,
        cwd: PathBuf,
        cols: u16,
        rows: u16,
    },
    Adopt {
        name: String,
        cols: u16,
        rows: u16,
    },
    Attach {
        name: String,
        cols: u16,
        rows: u16,
    },
    Detach {
        name: String,
    },
    Resize {
        name: String,
        cols: u16,
        rows: u16,
    },
    Keys {
        name: String,
        keys: Vec<ForwardKey>,
    },
    Mouse {
        name: String,
        input: MouseInput,
    },
    Capture {
        name: String,
        max_bytes: usize,
    },
    Close {
        name: String,
    },
    Kill {
        name: String,
    },
    Release {
        name: String,
    },
    StopOwner,
    ListForeign,
}

#[derive(Debug)]
pub struct SessionRequest {
    pub owner: PluginKind,
    pub epoch: Epoch,
    pub command: SessionCommand,
}

#[derive(Debug)]
pub enum SessionReply {
    Opened {
        target: PathBuf,
        result: Result<EditSession, String>,
    },
    Adopted {
        name: String,
        result: Result<EditSession, String>,
    },
    Captured {
        name: String,
        result: Result<ScreenSnapshot, String>,
    },
    Resized {
        name: String,
        cols: u16,
        rows: u16,
    },
    Closed {
        name: String,
        outcome: CloseOutcome,
    },
    /// The child exited on its own.
    InlineEditExited {
        name: String,
        target: PathBuf,
        target_changed: bool,
    },
    Foreign(Result<Vec<TmuxSessionInfo>, String>),
    Failed {
        name: Option<String>,
        error: String,
    },
}

/// A plugin's end of the session worker. Sending never blocks.
#[derive(Clone)]
pub struct SessionHandle {
    owner: PluginKind,
    epochs: EpochCounter,
    tx: Sender<SessionRequest>,
}

impl SessionHandle {
    pub fn new(owner: PluginKind, epochs: EpochCounter, tx: Sender<SessionRequest>) -> Self {
        Self { owner, epochs, tx }
    }

    pub fn send(&self, command: SessionCommand) -> bool {
        let request = SessionRequest {
            owner: self.owner,
            epoch: self.epochs.current(),
            command,
        };
        if self.tx.send(request).is_err() {
            warn!(owner = self.owner.as_str(), "session worker is gone");
            return false;
        }
        true
    }
}

/// Thread that owns the supervisor. Commands run in arrival order, so key
/// batches reach the child in the order they were typed.
pub struct SessionWorker {
    tx: Option<Sender<SessionRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl SessionWorker {
    pub fn spawn<B>(
        supervisor: Supervisor<B>,
        bus: BusSender<HostMsg>,
        epochs: BTreeMap<PluginKind, EpochCounter>,
    ) -> std::io::Result<Self>
    where
        B: TmuxBackend + Clone + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("sidecar-sessions".to_string())
            .spawn(move || {
                let mut state = WorkerState {
                    supervisor,
                    bus,
                    epochs,
                };
                state.run(rx);
            })?;
        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self, owner: PluginKind, epochs: EpochCounter) -> Option<SessionHandle> {
        self.tx
            .as_ref()
            .map(|tx| SessionHandle::new(owner, epochs, tx.clone()))
    }

    /// Closes the command channel and waits for queued commands to finish.
    /// Every handle must be dropped first for the worker to observe it.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("session worker panicked");
            }
        }
    }
}

struct WorkerState<B> {
    supervisor: Supervisor<B>,
    bus: BusSender<HostMsg>,
    epochs: BTreeMap<PluginKind, EpochCounter>,
}

impl<B: TmuxBackend + Clone> WorkerState<B> {
    fn run(&mut self, rx: Receiver<SessionRequest>) {
        let mut last_poll = Instant::now();
        loop {
            let now = Instant::now();
            let wait = self
                .supervisor
                .next_deadline(now)
                .map_or(POLL_INTERVAL, |due| due.min(POLL_INTERVAL));
            match rx.recv_timeout(wait) {
                Ok(request) => self.handle(request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            let now = Instant::now();
            let deadline_due = self
                .supervisor
                .next_deadline(now)
                .is_some_and(|due| due.is_zero());
            if deadline_due || now.duration_since(last_poll) >= POLL_INTERVAL {
                for event in self.supervisor.poll(now) {
                    self.publish_event(event);
                }
                last_poll = now;
            }
        }
        debug!("session worker stopped");
    }

    fn reply(&self, owner: PluginKind, epoch: Epoch, reply: SessionReply) {
        let envelope = Envelope::new(
            "sessions",
            epoch,
            Priority::Normal,
            HostMsg::Plugin(owner, PluginMsg::Session(reply)),
        );
        if self.bus.post(envelope).is_err() {
            trace!(owner = owner.as_str(), "session reply after bus close");
        }
    }

    fn publish_event(&self, event: SupervisorEvent) {
        let (owner, reply) = match event {
            SupervisorEvent::Resized {
                session,
                owner,
                cols,
                rows,
            } => (
                owner,
                SessionReply::Resized {
                    name: session,
                    cols,
                    rows,
                },
            ),
            SupervisorEvent::Closed {
                session,
                owner,
                outcome,
            } => (
                owner,
                SessionReply::Closed {
                    name: session,
                    outcome,
                },
            ),
            SupervisorEvent::Died {
                session,
                owner,
                target,
                target_changed,
            } => (
                owner,
                SessionReply::InlineEditExited {
                    name: session,
                    target,
                    target_changed,
                },
            ),
        };
        let Some(kind) = PluginKind::parse(&owner) else {
            warn!(owner = %owner, "session event for unknown owner");
            return;
        };
        let epoch = self
            .epochs
            .get(&kind)
            .map_or(Epoch::ZERO, EpochCounter::current);
        self.reply(kind, epoch, reply);
    }

    fn handle(&mut self, request: SessionRequest) {
        let SessionRequest {
            owner,
            epoch,
            command,
        } = request;
        let now = Instant::now();
        let failed = |name: Option<String>, error: String| SessionReply::Failed { name, error };

        let reply = match command {
            SessionCommand::Open {
                target,
                editor,
                cwd,
                cols,
                rows,
            } => {
                let result = self
                    .supervisor
                    .open(OpenRequest {
                        owner: owner.as_str(),
                        target: &target,
                        editor: &editor,
                        cwd: &cwd,
                        cols,
                        rows,
                    })
                    .map_err(|err| err.to_string());
                Some(SessionReply::Opened { target, result })
            }
            SessionCommand::Adopt { name, cols, rows } => {
                let result = self
                    .supervisor
                    .adopt(owner.as_str(), &name, cols, rows)
                    .map_err(|err| err.to_string());
                Some(SessionReply::Adopted { name, result })
            }
            SessionCommand::Attach { name, cols, rows } => self
                .supervisor
                .attach(&name, cols, rows)
                .err()
                .map(|err| failed(Some(name), err.to_string())),
            SessionCommand::Detach { name } => self
                .supervisor
                .detach(&name)
                .err()
                .map(|err| failed(Some(name), err.to_string())),
            SessionCommand::Resize { name, cols, rows } => self
                .supervisor
                .request_resize(&name, cols, rows, now)
                .err()
                .map(|err| failed(Some(name), err.to_string())),
            SessionCommand::Keys { name, keys } => self
                .supervisor
                .forward_keys(&name, &keys)
                .err()
                .map(|err| failed(Some(name), err.to_string())),
            SessionCommand::Mouse { name, input } => self
                .supervisor
                .forward_mouse(&name, &input, now)
                .err()
                .map(|err| failed(Some(name), err.to_string())),
            SessionCommand::Capture { name, max_bytes } => {
                let result = self
                    .supervisor
                    .capture_job(&name, max_bytes)
                    .and_then(|job| job.run())
                    .map_err(|err| err.to_string());
                Some(SessionReply::Captured { name, result })
            }
            SessionCommand::Close { name } => match self.supervisor.close(&name, now) {
                Ok(Some(outcome)) => Some(SessionReply::Closed { name, outcome }),
                Ok(None) => None,
                Err(err) => Some(failed(Some(name), err.to_string())),
            },
            SessionCommand::Kill { name } => self
                .supervisor
                .kill(&name)
                .err()
                .map(|err| failed(Some(name), err.to_string())),
            SessionCommand::Release { name } => {
                self.supervisor.release(&name);
                None
            }
            SessionCommand::StopOwner => {
                let stopped = self.supervisor.stop_owner(owner.as_str());
                if stopped > 0 {
                    info!(owner = owner.as_str(), stopped, "stopped owned sessions");
                }
                None
            }
            SessionCommand::ListForeign => Some(SessionReply::Foreign(
                self.supervisor
                    .list_foreign_sessions()
                    .map_err(|err| err.to_string()),
            )),
        };

        if let Some(reply) = reply {
            self.reply(owner, epoch, reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_core::bus::{self, BusReceiver};
    use sidecar_supervisor::fake::FakeTmux;
    use std::path::Path;

    fn worker(fake: &FakeTmux) -> (SessionWorker, SessionHandle, BusReceiver<HostMsg>) {
        let (tx, rx) = bus::channel(64);
        let epochs = EpochCounter::new();
        let map = BTreeMap::from([(PluginKind::Files, epochs.clone())]);
        let worker = SessionWorker::spawn(Supervisor::new(fake.clone(), "xterm-256color"), tx, map)
            .expect("spawn worker");
        let handle = worker
            .handle(PluginKind::Files, epochs)
            .expect("session handle");
        (worker, handle, rx)
    }

    fn next_reply(rx: &BusReceiver<HostMsg>) -> SessionReply {
        let envelope = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("session reply");
        match envelope.payload {
            HostMsg::Plugin(PluginKind::Files, PluginMsg::Session(reply)) => reply,
            other => panic!("unexpected message {other:?}"),
        }
    }

    fn open(target: &Path) -> SessionCommand {
        SessionCommand::Open {
            target: target.to_path_buf(),
            editor: "nvim".to_string(),
            cwd: PathBuf::from("/tmp"),
            cols: 80,
            rows: 24,
        }
    }

    #[test]
    fn second_open_reuses_the_session() {
        let fake = FakeTmux::default();
        let (mut worker, handle, rx) = worker(&fake);

        assert!(handle.send(open(Path::new("/tmp/x.txt"))));
        let first = match next_reply(&rx) {
            SessionReply::Opened { result, .. } => result.expect("first open"),
            other => panic!("unexpected reply {other:?}"),
        };
        assert!(handle.send(open(Path::new("/tmp/x.txt"))));
        let second = match next_reply(&rx) {
            SessionReply::Opened { result, .. } => result.expect("second open"),
            other => panic!("unexpected reply {other:?}"),
        };

        assert_eq!(first.name, second.name);
        assert_eq!(fake.spawned(), 1);
        drop(handle);
        worker.shutdown();
    }

    #[test]
    fn exit_is_reported_as_inline_edit_exited() {
        let fake = FakeTmux::default();
        let (mut worker, handle, rx) = worker(&fake);

        handle.send(open(Path::new("/tmp/y.txt")));
        let name = match next_reply(&rx) {
            SessionReply::Opened { result, .. } => result.expect("open").name,
            other => panic!("unexpected reply {other:?}"),
        };
        fake.simulate_exit(&name);

        match next_reply(&rx) {
            SessionReply::InlineEditExited {
                name: exited,
                target,
                ..
            } => {
                assert_eq!(exited, name);
                assert_eq!(target, PathBuf::from("/tmp/y.txt"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        drop(handle);
        worker.shutdown();
    }

    #[test]
    fn keys_for_unknown_session_fail_with_name() {
        let fake = FakeTmux::default();
        let (mut worker, handle, rx) = worker(&fake);

        handle.send(SessionCommand::Keys {
            name: "sidecar-files-missing".to_string(),
            keys: vec![ForwardKey::Char('a')],
        });
        match next_reply(&rx) {
            SessionReply::Failed { name, .. } => {
                assert_eq!(name.as_deref(), Some("sidecar-files-missing"))
            }
            other => panic!("unexpected reply {other:?}"),
        }
        drop(handle);
        worker.shutdown();
    }
}

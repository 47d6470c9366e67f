use crate::mouse::{HitMap, MouseAction};
use crate::plugins::conversations::{ConversationsMsg, ConversationsPane};
use crate::plugins::files::{FileBrowser, FilesMsg};
use crate::plugins::notes::{NotesMsg, NotesPane};
use crate::plugins::terminal::{TerminalMsg, TerminalPane};
use crate::sessions::{SessionHandle, SessionReply};
use crossterm::event::{Event, KeyEvent};
use ratatui::{buffer::Buffer, layout::Rect};
use sidecar_core::bus::{BusSender, Envelope, Priority};
use sidecar_core::{Context, Epoch, EpochCounter, PluginKind, Signal};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Payload of every envelope on the host bus.
#[derive(Debug)]
pub enum HostMsg {
    Input(Event),
    Tick(Instant),
    Plugin(PluginKind, PluginMsg),
}

#[derive(Debug)]
pub enum PluginMsg {
    Tick(Instant),
    Watch(Signal),
    Session(SessionReply),
    Files(FilesMsg),
    Notes(NotesMsg),
    Conversations(ConversationsMsg),
    Terminal(TerminalMsg),
}

pub struct Job {
    pub name: &'static str,
    pub work: Box<dyn FnOnce() -> Option<PluginMsg> + Send>,
}

/// Work an `update` asks the host to run after it returns.
#[derive(Default)]
pub enum FollowUp {
    #[default]
    None,
    Spawn(Job),
    /// Rewrite one `[plugins.<kind>]` key in the config file.
    Persist {
        key: &'static str,
        value: toml::Value,
    },
    Quit,
    Batch(Vec<FollowUp>),
}

impl FollowUp {
    pub fn spawn<F>(name: &'static str, work: F) -> Self
    where
        F: FnOnce() -> PluginMsg + Send + 'static,
    {
        FollowUp::Spawn(Job {
            name,
            work: Box::new(move || Some(work())),
        })
    }

    pub fn and(self, other: FollowUp) -> FollowUp {
        match (self, other) {
            (FollowUp::None, other) => other,
            (this, FollowUp::None) => this,
            (FollowUp::Batch(mut items), other) => {
                items.push(other);
                FollowUp::Batch(items)
            }
            (this, other) => FollowUp::Batch(vec![this, other]),
        }
    }

    pub fn is_none(&self) -> bool {
        match self {
            FollowUp::None => true,
            FollowUp::Batch(items) => items.iter().all(FollowUp::is_none),
            _ => false,
        }
    }

    pub fn flatten(self) -> Vec<FollowUp> {
        match self {
            FollowUp::None => Vec::new(),
            FollowUp::Batch(items) => items.into_iter().flat_map(FollowUp::flatten).collect(),
            other => vec![other],
        }
    }

    /// Runs every job on the calling thread; tests drive plugins this way.
    #[cfg(test)]
    pub fn run_inline(self) -> Vec<PluginMsg> {
        self.flatten()
            .into_iter()
            .filter_map(|item| match item {
                FollowUp::Spawn(job) => (job.work)(),
                _ => None,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn job_names(&self) -> Vec<&'static str> {
        match self {
            FollowUp::Spawn(job) => vec![job.name],
            FollowUp::Batch(items) => items.iter().flat_map(FollowUp::job_names).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for FollowUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FollowUp::None => f.write_str("None"),
            FollowUp::Spawn(job) => write!(f, "Spawn({})", job.name),
            FollowUp::Persist { key, value } => write!(f, "Persist({key} = {value})"),
            FollowUp::Quit => f.write_str("Quit"),
            FollowUp::Batch(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// A plugin's way onto the bus. Messages carry the epoch current at post
/// time unless tagged explicitly.
#[derive(Clone)]
pub struct Outbox {
    kind: PluginKind,
    bus: BusSender<HostMsg>,
    epochs: EpochCounter,
}

impl Outbox {
    pub fn new(kind: PluginKind, bus: BusSender<HostMsg>, epochs: EpochCounter) -> Self {
        Self { kind, bus, epochs }
    }

    pub fn epoch(&self) -> Epoch {
        self.epochs.current()
    }

    pub fn post_at(&self, epoch: Epoch, priority: Priority, msg: PluginMsg) -> bool {
        let envelope = Envelope::new(
            self.kind.as_str(),
            epoch,
            priority,
            HostMsg::Plugin(self.kind, msg),
        );
        match self.bus.post(envelope) {
            Ok(_) => true,
            Err(err) => {
                trace!(plugin = self.kind.as_str(), error = %err, "post after bus close");
                false
            }
        }
    }

    /// Watch sink tagged with the epoch of the subscription, so signals from
    /// a handle that outlived a root switch are dropped on delivery.
    pub fn watch_sink(&self) -> impl FnMut(Signal) + Send + 'static {
        let outbox = self.clone();
        let epoch = self.epoch();
        move |signal| {
            outbox.post_at(epoch, Priority::Normal, PluginMsg::Watch(signal));
        }
    }
}

/// Everything a plugin is bound to at `init`.
#[derive(Clone)]
pub struct PluginCtx {
    pub core: Context,
    pub outbox: Outbox,
    pub sessions: SessionHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub keys: &'static str,
    pub label: &'static str,
}

impl Command {
    pub const fn new(keys: &'static str, label: &'static str) -> Self {
        Self { keys, label }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub text: String,
    pub level: Level,
    pub expires_at: Instant,
}

/// Transient per-pane message shown under the pane.
#[derive(Debug, Clone, Default)]
pub struct StatusLine {
    toast: Option<Toast>,
}

impl StatusLine {
    pub const INFO_TTL: Duration = Duration::from_secs(3);
    pub const ERROR_TTL: Duration = Duration::from_secs(8);

    pub fn info(&mut self, text: impl Into<String>) {
        self.set(text.into(), Level::Info, Self::INFO_TTL);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.set(text.into(), Level::Error, Self::ERROR_TTL);
    }

    fn set(&mut self, text: String, level: Level, ttl: Duration) {
        self.toast = Some(Toast {
            text,
            level,
            expires_at: Instant::now() + ttl,
        });
    }

    /// Returns true when a toast was removed.
    pub fn expire(&mut self, now: Instant) -> bool {
        if self.toast.as_ref().is_some_and(|toast| now >= toast.expires_at) {
            self.toast = None;
            return true;
        }
        false
    }

    pub fn current(&self) -> Option<&Toast> {
        self.toast.as_ref()
    }
}

/// The contract every pane implements. `update` and `render` never block;
/// anything slow is returned as a follow-up job.
pub trait Pane {
    fn kind(&self) -> PluginKind;

    fn title(&self) -> String;

    fn init(&mut self, ctx: PluginCtx);

    fn start(&mut self) -> FollowUp;

    fn stop(&mut self);

    fn update(&mut self, msg: PluginMsg) -> FollowUp;

    /// Key routing inside the pane: modal, then text entry, then the pane
    /// keymap. `None` hands the key back to the host keymap.
    fn handle_key(&mut self, key: KeyEvent) -> Option<FollowUp>;

    fn handle_mouse(&mut self, action: MouseAction) -> FollowUp;

    /// Draws exactly into `area` and registers hit regions for this frame.
    fn render(&mut self, area: Rect, buf: &mut Buffer, hits: &mut HitMap);

    fn focus(&self) -> &'static str;

    fn commands(&self) -> Vec<Command>;

    fn status(&self) -> Option<&Toast>;
}

/// The compiled-in plugin set.
pub enum Plugin {
    Files(FileBrowser),
    Notes(NotesPane),
    Conversations(ConversationsPane),
    Terminal(TerminalPane),
}

impl Plugin {
    pub fn for_kind(kind: PluginKind) -> Self {
        match kind {
            PluginKind::Files => Plugin::Files(FileBrowser::new()),
            PluginKind::Notes => Plugin::Notes(NotesPane::new()),
            PluginKind::Conversations => Plugin::Conversations(ConversationsPane::new()),
            PluginKind::Terminal => Plugin::Terminal(TerminalPane::new()),
        }
    }

    pub fn pane(&self) -> &dyn Pane {
        match self {
            Plugin::Files(pane) => pane,
            Plugin::Notes(pane) => pane,
            Plugin::Conversations(pane) => pane,
            Plugin::Terminal(pane) => pane,
        }
    }

    pub fn pane_mut(&mut self) -> &mut dyn Pane {
        match self {
            Plugin::Files(pane) => pane,
            Plugin::Notes(pane) => pane,
            Plugin::Conversations(pane) => pane,
            Plugin::Terminal(pane) => pane,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::sessions::SessionRequest;
    use sidecar_core::bus::{self, BusReceiver};
    use sidecar_core::SidecarConfig;
    use std::path::Path;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;

    pub struct Harness {
        pub ctx: PluginCtx,
        pub bus: BusReceiver<HostMsg>,
        pub sessions: Receiver<SessionRequest>,
    }

    pub fn harness(kind: PluginKind, root: &Path, config: SidecarConfig) -> Harness {
        let (tx, bus) = bus::channel(256);
        let core = Context::new(root.to_path_buf(), root.to_path_buf(), Arc::new(config));
        let (session_tx, sessions) = mpsc::channel();
        let ctx = PluginCtx {
            outbox: Outbox::new(kind, tx, core.epochs.clone()),
            sessions: SessionHandle::new(kind, core.epochs.clone(), session_tx),
            core,
        };
        Harness { ctx, bus, sessions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_up_and_flattens_batches() {
        let combined = FollowUp::None
            .and(FollowUp::spawn("a", || PluginMsg::Tick(Instant::now())))
            .and(FollowUp::None)
            .and(FollowUp::Quit);
        assert_eq!(combined.job_names(), vec!["a"]);
        assert_eq!(combined.flatten().len(), 2);
        assert!(FollowUp::Batch(vec![FollowUp::None]).is_none());
    }

    #[test]
    fn status_line_expires() {
        let mut status = StatusLine::default();
        status.info("saved");
        assert!(!status.expire(Instant::now()));
        assert!(status.expire(Instant::now() + StatusLine::INFO_TTL));
        assert!(status.current().is_none());
    }
}

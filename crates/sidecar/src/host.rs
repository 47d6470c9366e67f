//! The pane host: owns the plugin set, routes input, runs follow-ups and
//! composes frames. Everything here runs on the single host thread.

use crate::mouse::{Gesture, HitMap, MouseRouter};
use crate::plugin::{Command, FollowUp, HostMsg, Job, Outbox, Plugin, PluginCtx, PluginMsg};
use crate::render::{self, centered_rect, pane_block};
use crate::sessions::SessionHandle;
use crate::theme;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};
use sidecar_core::bus::{BusSender, Envelope, Priority};
use sidecar_core::{Context, Epoch, EpochCounter, PluginKind};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

const GLOBAL_COMMANDS: [Command; 6] = [
    Command::new("1-4", "Focus pane"),
    Command::new("\\", "Toggle split view"),
    Command::new("R", "Restart all panes"),
    Command::new("?", "Toggle help"),
    Command::new("q", "Quit"),
    Command::new("Ctrl-c", "Quit"),
];

struct Slot {
    plugin: Plugin,
    epochs: EpochCounter,
    sessions: SessionHandle,
    outbox: Outbox,
    area: Rect,
    hits: HitMap,
}

impl Slot {
    fn kind(&self) -> PluginKind {
        self.plugin.pane().kind()
    }
}

pub struct Host {
    base: Context,
    slots: Vec<Slot>,
    focused: usize,
    split: bool,
    help: bool,
    mouse: MouseRouter,
    quit: bool,
}

impl Host {
    /// Builds one slot per enabled plugin. Each plugin brings its own epoch
    /// counter and the session handle bound to it.
    pub fn new(
        base: Context,
        bus: BusSender<HostMsg>,
        plugins: Vec<(PluginKind, EpochCounter, SessionHandle)>,
    ) -> Self {
        let slots = plugins
            .into_iter()
            .filter(|(kind, _, _)| base.plugin_config(*kind).enabled)
            .map(|(kind, epochs, sessions)| Slot {
                plugin: Plugin::for_kind(kind),
                outbox: Outbox::new(kind, bus.clone(), epochs.clone()),
                epochs,
                sessions,
                area: Rect::default(),
                hits: HitMap::default(),
            })
            .collect();
        Self {
            base,
            slots,
            focused: 0,
            split: false,
            help: false,
            mouse: MouseRouter::default(),
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    fn plugin_ctx(&self, slot: &Slot) -> PluginCtx {
        let mut core = self.base.clone();
        core.epochs = slot.epochs.clone();
        PluginCtx {
            core,
            outbox: slot.outbox.clone(),
            sessions: slot.sessions.clone(),
        }
    }

    /// Binds and starts every plugin.
    pub fn start(&mut self) {
        for index in 0..self.slots.len() {
            let ctx = self.plugin_ctx(&self.slots[index]);
            let pane = self.slots[index].plugin.pane_mut();
            pane.init(ctx);
            let follow = pane.start();
            self.run_follow_up(index, follow);
        }
        info!(
            root = %self.base.project_root.display(),
            plugins = self.slots.len(),
            "host started"
        );
    }

    pub fn stop(&mut self) {
        for slot in &mut self.slots {
            slot.plugin.pane_mut().stop();
        }
    }

    /// Stops every plugin, advances its epoch so in-flight results are
    /// discarded on delivery, and restarts it against `root`.
    pub fn switch_root(&mut self, root: PathBuf) {
        info!(from = %self.base.project_root.display(), to = %root.display(), "switching project root");
        for slot in &mut self.slots {
            slot.plugin.pane_mut().stop();
            let epoch = slot.epochs.advance();
            debug!(plugin = slot.kind().as_str(), %epoch, "epoch advanced");
        }
        self.base = self.base.with_root(root);
        self.start();
    }

    pub fn dispatch(&mut self, mut envelope: Envelope<HostMsg>) {
        if matches!(envelope.payload, HostMsg::Input(_)) {
            self.tag_input(&mut envelope);
        }
        let epoch = envelope.epoch;
        match envelope.payload {
            HostMsg::Input(event) => {
                trace!(%epoch, "input");
                self.on_input(event)
            }
            HostMsg::Tick(now) => {
                for index in 0..self.slots.len() {
                    let follow = self.slots[index].plugin.pane_mut().update(PluginMsg::Tick(now));
                    self.run_follow_up(index, follow);
                }
            }
            HostMsg::Plugin(kind, msg) => self.deliver(kind, epoch, msg),
        }
    }

    /// The input thread cannot see focus, so input arrives untagged and is
    /// stamped with the focused plugin's current epoch. It is never stale.
    fn tag_input(&self, envelope: &mut Envelope<HostMsg>) {
        if let Some(slot) = self.slots.get(self.focused) {
            envelope.epoch = slot.epochs.current();
        }
    }

    fn deliver(&mut self, kind: PluginKind, epoch: Epoch, msg: PluginMsg) {
        let Some(index) = self.slots.iter().position(|slot| slot.kind() == kind) else {
            trace!(plugin = kind.as_str(), "message for a disabled plugin dropped");
            return;
        };
        if self.slots[index].epochs.is_stale(epoch) {
            trace!(plugin = kind.as_str(), %epoch, "stale message dropped");
            return;
        }
        let follow = self.slots[index].plugin.pane_mut().update(msg);
        self.run_follow_up(index, follow);
    }

    fn run_follow_up(&mut self, index: usize, follow: FollowUp) {
        let kind = self.slots[index].kind();
        for item in follow.flatten() {
            match item {
                FollowUp::Spawn(job) => self.spawn_job(index, job),
                FollowUp::Persist { key, value } => {
                    if let Err(err) = self.base.config.persist_plugin_value(kind, key, value) {
                        warn!(plugin = kind.as_str(), key, error = %err, "config not persisted");
                    }
                }
                FollowUp::Quit => self.quit = true,
                FollowUp::None | FollowUp::Batch(_) => {}
            }
        }
    }

    /// Runs a job on its own thread; the result carries the epoch current
    /// when the job was spawned.
    fn spawn_job(&self, index: usize, job: Job) {
        let slot = &self.slots[index];
        let outbox = slot.outbox.clone();
        let epoch = slot.epochs.current();
        let Job { name, work } = job;
        let spawned = thread::Builder::new()
            .name(format!("sidecar-{name}"))
            .spawn(move || {
                if let Some(msg) = work() {
                    outbox.post_at(epoch, Priority::Normal, msg);
                }
            });
        if let Err(err) = spawned {
            warn!(job = name, error = %err, "failed to spawn job");
        }
    }

    fn on_input(&mut self, event: Event) {
        match event {
            Event::Key(key) if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) => {
                self.on_key(key)
            }
            Event::Mouse(mouse) => self.on_mouse(mouse),
            _ => {}
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.help {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')) {
                self.help = false;
            }
            return;
        }
        if let Some(slot) = self.slots.get_mut(self.focused) {
            if let Some(follow) = slot.plugin.pane_mut().handle_key(key) {
                self.run_follow_up(self.focused, follow);
                return;
            }
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => self.quit = true,
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Char('?') => self.help = true,
            KeyCode::Char('\\') => self.split = !self.split,
            KeyCode::Char('R') => self.switch_root(self.base.project_root.clone()),
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                if index < self.slots.len() {
                    self.focused = index;
                }
            }
            _ => {}
        }
    }

    fn on_mouse(&mut self, event: MouseEvent) {
        let visible: Vec<usize> = self.visible_slots();
        let panes: Vec<(Rect, &HitMap)> = visible
            .iter()
            .map(|&index| (self.slots[index].area, &self.slots[index].hits))
            .collect();
        let Some((pane, action)) = self.mouse.route(event, &panes, Instant::now()) else {
            return;
        };
        let index = visible[pane];
        if matches!(action.gesture, Gesture::Press { .. }) {
            self.focused = index;
        }
        let follow = self.slots[index].plugin.pane_mut().handle_mouse(action);
        self.run_follow_up(index, follow);
    }

    fn visible_slots(&self) -> Vec<usize> {
        if self.slots.is_empty() {
            return Vec::new();
        }
        if self.split && self.slots.len() > 1 {
            vec![self.focused, (self.focused + 1) % self.slots.len()]
        } else {
            vec![self.focused]
        }
    }

    pub fn render(&mut self, area: Rect, buf: &mut Buffer) {
        if area.height < 2 {
            return;
        }
        self.draw_tab_bar(Rect::new(area.x, area.y, area.width, 1), buf);
        let body = Rect::new(area.x, area.y + 1, area.width, area.height - 1);
        for slot in &mut self.slots {
            slot.area = Rect::default();
            slot.hits.clear();
        }
        let visible = self.visible_slots();
        let count = visible.len().max(1) as u16;
        let width = body.width / count;
        for (position, &index) in visible.iter().enumerate() {
            let x = body.x + width * position as u16;
            let w = if position + 1 == visible.len() {
                body.width - width * position as u16
            } else {
                width
            };
            let pane_area = Rect::new(x, body.y, w, body.height);
            let slot = &mut self.slots[index];
            slot.area = pane_area;
            slot.plugin.pane_mut().render(pane_area, buf, &mut slot.hits);
        }
        if self.help {
            self.draw_help(body, buf);
        }
    }

    fn draw_tab_bar(&self, area: Rect, buf: &mut Buffer) {
        let mut spans = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let style = if index == self.focused {
                theme::ACTIVE_TAB_STYLE
            } else {
                theme::DIM_STYLE
            };
            spans.push(Span::styled(
                format!(" {} {} ", index + 1, slot.plugin.pane().title()),
                style,
            ));
        }
        spans.push(Span::styled(
            format!("  {}", self.base.project_root.display()),
            theme::DIM_STYLE,
        ));
        buf.set_line(area.x, area.y, &Line::from(spans), area.width);
    }

    fn draw_help(&self, area: Rect, buf: &mut Buffer) {
        let (title, pane_commands) = match self.slots.get(self.focused) {
            Some(slot) => {
                let pane = slot.plugin.pane();
                (format!("Help: {} ({})", pane.title(), pane.focus()), pane.commands())
            }
            None => ("Help".to_string(), Vec::new()),
        };
        let mut lines: Vec<Line> = Vec::new();
        let row = |command: &Command| {
            Line::from(vec![
                Span::styled(format!("{:>12}  ", command.keys), theme::KEY_STYLE),
                Span::raw(command.label),
            ])
        };
        lines.extend(pane_commands.iter().map(row));
        lines.push(Line::default());
        lines.extend(GLOBAL_COMMANDS.iter().map(row));

        let height = (lines.len() as u16).saturating_add(2);
        let frame = centered_rect(56, height, area);
        render::clear(frame, buf);
        let block = pane_block(title, theme::MODAL_BORDER);
        let inner = block.inner(frame);
        block.render(frame, buf);
        Paragraph::new(lines).render(inner, buf);
    }
}

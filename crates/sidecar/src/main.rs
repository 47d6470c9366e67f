mod host;
mod input;
mod mouse;
mod plugin;
mod plugins;
mod render;
mod sessions;
mod theme;

use anyhow::{Context as _, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use host::Host;
use plugin::HostMsg;
use ratatui::{backend::CrosstermBackend, Terminal};
use sessions::SessionWorker;
use sidecar_core::bus::{self, BusReceiver, BusSender, Envelope, Priority, DEFAULT_BUS_CAPACITY};
use sidecar_core::config::terminal_type;
use sidecar_core::context::{home_dir, resolve_project_root};
use sidecar_core::{Context, Epoch, EpochCounter, PluginKind, SidecarConfig};
use sidecar_supervisor::{Supervisor, TmuxCli};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TICK_INTERVAL: Duration = Duration::from_millis(200);
const INPUT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "sidecar", version, about = "Side panes for the project you are working in")]
struct Args {
    /// Project root; falls back to SIDECAR_ROOT, then the current directory.
    root: Option<PathBuf>,
    /// Config file; defaults to the platform config dir.
    #[arg(long, env = "SIDECAR_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let root = resolve_project_root(args.root).context("cannot resolve project root")?;
    let config = match args.config.or_else(SidecarConfig::default_path) {
        Some(path) => SidecarConfig::load(&path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => SidecarConfig::default(),
    };
    let base = Context::new(root, home_dir(), Arc::new(config));

    let (bus_tx, bus_rx) = bus::channel(DEFAULT_BUS_CAPACITY);
    let epochs: Vec<(PluginKind, EpochCounter)> = PluginKind::ALL
        .into_iter()
        .map(|kind| (kind, EpochCounter::new()))
        .collect();
    let supervisor = Supervisor::new(TmuxCli::default(), terminal_type());
    let mut worker = SessionWorker::spawn(
        supervisor,
        bus_tx.clone(),
        epochs.iter().cloned().collect::<BTreeMap<_, _>>(),
    )
    .context("cannot start session worker")?;
    let plugins = epochs
        .iter()
        .map(|(kind, counter)| {
            worker
                .handle(*kind, counter.clone())
                .map(|handle| (*kind, counter.clone(), handle))
        })
        .collect::<Option<Vec<_>>>()
        .context("session worker is closed")?;
    let mut host = Host::new(base, bus_tx.clone(), plugins);

    spawn_input(bus_tx.clone()).context("cannot start input thread")?;
    spawn_ticker(bus_tx.clone()).context("cannot start ticker")?;

    let mut terminal = setup_terminal()?;
    host.start();
    let result = run(&mut terminal, &mut host, &bus_rx);
    host.stop();
    restore_terminal(&mut terminal)?;

    bus_tx.close();
    drop(host);
    worker.shutdown();
    info!("sidecar exited");

    if let Err(err) = result {
        eprintln!("sidecar: {err}");
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to `SIDECAR_LOG_FILE`, or the state dir, so they never draw over
/// the UI. `SIDECAR_LOG_STDOUT=1` writes to stdout for headless debugging.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("SIDECAR_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }
    let log_path = std::env::var_os("SIDECAR_LOG_FILE")
        .map(PathBuf::from)
        .or_else(|| {
            dirs::state_dir()
                .or_else(dirs::cache_dir)
                .map(|dir| dir.join("sidecar").join("sidecar.log"))
        });
    let file = log_path.and_then(|path| {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });
    match file {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws, then blocks for the next envelope and drains whatever else is
/// queued before drawing again.
fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    host: &mut Host,
    bus_rx: &BusReceiver<HostMsg>,
) -> Result<()> {
    loop {
        terminal.draw(|frame| {
            let area = frame.size();
            host.render(area, frame.buffer_mut());
        })?;
        let Some(envelope) = bus_rx.recv() else {
            return Ok(());
        };
        host.dispatch(envelope);
        while let Some(envelope) = bus_rx.try_recv() {
            host.dispatch(envelope);
        }
        if host.should_quit() {
            return Ok(());
        }
    }
}

fn spawn_input(bus: BusSender<HostMsg>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("sidecar-input".to_string())
        .spawn(move || loop {
            if bus.is_closed() {
                break;
            }
            match event::poll(INPUT_POLL) {
                Ok(false) => {}
                Ok(true) => match event::read() {
                    Ok(event) => {
                        // The host stamps the focused plugin's epoch on dispatch.
                        let envelope =
                            Envelope::new("input", Epoch::ZERO, Priority::Critical, HostMsg::Input(event));
                        if bus.post(envelope).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "terminal input failed");
                        break;
                    }
                },
                Err(err) => {
                    warn!(error = %err, "terminal poll failed");
                    break;
                }
            }
        })
}

fn spawn_ticker(bus: BusSender<HostMsg>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("sidecar-ticker".to_string())
        .spawn(move || loop {
            thread::sleep(TICK_INTERVAL);
            let envelope = Envelope::new(
                "ticker",
                Epoch::ZERO,
                Priority::Low,
                HostMsg::Tick(Instant::now()),
            );
            if bus.post(envelope).is_err() {
                break;
            }
        })
}

mod app;
mod config;
mod theme;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppEvent};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_client::{ArtifactExporter, Dispatcher, HttpRemote, PollEvent, Poller, RemoteService};
use swarm_core::SharedSnapshot;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);
const APP_EVENT_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::Args::parse();
    init_logging(args.log_file.as_deref())?;
    let settings = args.settings();
    info!(
        "console_start: api_url={} poll_interval_ms={}",
        settings.api_url,
        settings.poll_interval.as_millis()
    );

    let remote: Arc<dyn RemoteService> = Arc::new(HttpRemote::new(settings.api_url.clone()));
    let store = SharedSnapshot::new();
    let dispatcher = Dispatcher::new(
        remote.clone(),
        store.clone(),
        ArtifactExporter::to_directory(settings.export_dir.clone()),
    );

    let (poll_tx, mut poll_rx) = mpsc::channel(16);
    let poller = Poller::new(remote, store.clone(), settings.poll_interval)
        .with_events(poll_tx)
        .spawn();

    let (app_tx, mut app_rx) = mpsc::channel(APP_EVENT_CAPACITY);
    let mut app = App::new(settings, store, dispatcher, app_tx);
    app.load_reference_data();

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, &mut app_rx, &mut poll_rx).await;
    restore_terminal(&mut terminal)?;
    poller.stop().await;
    info!("console_stop");

    if let Err(err) = &result {
        eprintln!("swarm-console: {err}");
    }
    result
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

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    app_rx: &mut mpsc::Receiver<AppEvent>,
    poll_rx: &mut mpsc::Receiver<PollEvent>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut redraw = tokio::time::interval(REDRAW_INTERVAL);

    loop {
        app.sync();
        terminal.draw(|f| ui::render(f, app))?;

        tokio::select! {
            _ = redraw.tick() => {}
            Some(event) = app_rx.recv() => app.apply_event(event),
            Some(event) = poll_rx.recv() => app.apply_poll(event),
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                            app.handle_key(key);
                        }
                    }
                    Some(Ok(Event::Mouse(mouse))) => app.handle_mouse(mouse),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return Err(anyhow::Error::from(err).context("terminal event stream failed"));
                    }
                    None => break,
                }
            }
        }

        if app.should_quit() {
            break;
        }
    }
    Ok(())
}

/// Logs are discarded unless `SWARM_LOG_STDOUT` is set or a log file is
/// given, since stdout belongs to the terminal UI.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init();
        return Ok(());
    }
    let stdout_enabled = matches!(
        std::env::var("SWARM_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
    Ok(())
}

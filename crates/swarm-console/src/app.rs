use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use std::future::Future;
use std::path::Path;
use swarm_client::{DispatchError, DispatchOutcome, Dispatcher, PollEvent, Settings};
use swarm_core::{
    AgentProfile, ApplyReport, ControlAction, CyclePhase, FeedView, LogStream, PipelineConfig,
    PolicySource, SharedSnapshot,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const MOUSE_SCROLL_LINES: isize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Dashboard,
    Senate,
    Architect,
    Agents,
    Settings,
}

impl View {
    pub const ALL: [View; 5] = [
        View::Dashboard,
        View::Senate,
        View::Architect,
        View::Agents,
        View::Settings,
    ];

    pub fn title(self) -> &'static str {
        match self {
            View::Dashboard => "Dashboard",
            View::Senate => "Senate",
            View::Architect => "Architect",
            View::Agents => "Agents",
            View::Settings => "Settings",
        }
    }

    /// Log stream shown (and scrolled) in this view.
    pub fn stream(self) -> Option<LogStream> {
        match self {
            View::Dashboard => Some(LogStream::Citizen),
            View::Senate => Some(LogStream::Senate),
            View::Architect => Some(LogStream::Architect),
            View::Agents | View::Settings => None,
        }
    }

    pub fn index(self) -> usize {
        View::ALL.iter().position(|v| *v == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    PolicyText,
    PolicyPath,
}

#[derive(Debug)]
pub enum AppEvent {
    Dispatched {
        action: ControlAction,
        result: Result<DispatchOutcome, DispatchError>,
    },
    AgentsLoaded(Result<Vec<AgentProfile>, String>),
    ConfigLoaded(Result<PipelineConfig, String>),
    ConfigUpdated(Result<PipelineConfig, String>),
}

#[derive(Debug, Default)]
pub struct Feeds {
    pub citizen: FeedView,
    pub senate: FeedView,
    pub architect: FeedView,
}

impl Feeds {
    pub fn get(&self, stream: LogStream) -> &FeedView {
        match stream {
            LogStream::Citizen => &self.citizen,
            LogStream::Senate => &self.senate,
            LogStream::Architect => &self.architect,
        }
    }

    pub fn get_mut(&mut self, stream: LogStream) -> &mut FeedView {
        match stream {
            LogStream::Citizen => &mut self.citizen,
            LogStream::Senate => &mut self.senate,
            LogStream::Architect => &mut self.architect,
        }
    }
}

pub struct App {
    pub settings: Settings,
    pub store: SharedSnapshot,
    pub view: View,
    pub feeds: Feeds,
    pub input_mode: InputMode,
    pub input: String,
    pub status_note: Option<String>,
    pub agents: Option<Result<Vec<AgentProfile>, String>>,
    pub config: Option<Result<PipelineConfig, String>>,
    pub in_flight: Option<ControlAction>,
    pub config_pending: bool,
    pub last_poll: Option<ApplyReport>,
    pub report_scroll: u16,
    pub show_help: bool,
    dispatcher: Dispatcher,
    tx: mpsc::Sender<AppEvent>,
    seen_revision: Option<u64>,
    should_quit: bool,
}

impl App {
    pub fn new(
        settings: Settings,
        store: SharedSnapshot,
        dispatcher: Dispatcher,
        tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            settings,
            store,
            view: View::Dashboard,
            feeds: Feeds::default(),
            input_mode: InputMode::Normal,
            input: String::new(),
            status_note: None,
            agents: None,
            config: None,
            in_flight: None,
            config_pending: false,
            last_poll: None,
            report_scroll: 0,
            show_help: false,
            dispatcher,
            tx,
            seen_revision: None,
            should_quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn phase(&self) -> CyclePhase {
        self.store.phase()
    }

    /// Agents and pipeline config are read once when the console opens.
    pub fn load_reference_data(&self) {
        let dispatcher = self.dispatcher.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let agents = dispatcher.agents().await.map_err(|err| err.to_string());
            let _ = tx.send(AppEvent::AgentsLoaded(agents)).await;
            let config = dispatcher.fetch_config().await.map_err(|err| err.to_string());
            let _ = tx.send(AppEvent::ConfigLoaded(config)).await;
        });
    }

    /// Pulls the latest snapshot into the feeds when the store moved on.
    pub fn sync(&mut self) {
        let store = self.store.lock();
        let revision = store.revision();
        if self.seen_revision == Some(revision) {
            return;
        }
        for stream in LogStream::ALL {
            let outcome = self.feeds.get_mut(stream).reconcile(store.logs(stream));
            if outcome.reset {
                debug!("feed_reset: stream={}", stream.as_str());
            }
        }
        if store.artifact().is_empty() {
            self.report_scroll = 0;
        }
        self.seen_revision = Some(revision);
    }

    pub fn apply_poll(&mut self, event: PollEvent) {
        match event {
            PollEvent::Synced(report) => {
                if report.run_finished {
                    self.status_note = Some("Consensus reached. Press e to export.".to_string());
                }
                self.last_poll = Some(report);
            }
        }
    }

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Dispatched { action, result } => {
                if self.in_flight == Some(action) {
                    self.in_flight = None;
                }
                self.status_note = match result {
                    Ok(DispatchOutcome::Sent(ControlAction::Submit)) => {
                        Some("Policy submitted.".to_string())
                    }
                    Ok(DispatchOutcome::Sent(_)) => None,
                    Ok(DispatchOutcome::Exported { path, bytes }) => {
                        Some(format!("Saved {} ({bytes} bytes)", path.display()))
                    }
                    Ok(DispatchOutcome::Ignored { action, phase }) => {
                        Some(format!("{action} is not available while {phase}"))
                    }
                    Err(err) if err.is_user_visible() => Some(err.to_string()),
                    Err(err) => {
                        warn!("dispatch_failed: action={action} err={err}");
                        self.status_note.take()
                    }
                };
            }
            AppEvent::AgentsLoaded(agents) => {
                if let Err(err) = &agents {
                    warn!("agents_load_failed: {err}");
                }
                self.agents = Some(agents);
            }
            AppEvent::ConfigLoaded(config) => {
                if let Err(err) = &config {
                    warn!("config_load_failed: {err}");
                }
                self.config = Some(config);
            }
            AppEvent::ConfigUpdated(result) => {
                self.config_pending = false;
                match result {
                    Ok(config) => {
                        self.status_note =
                            Some(format!("Pipeline speed: {}", config.speed_label()));
                        self.config = Some(Ok(config));
                    }
                    Err(err) => {
                        warn!("config_update_failed: {err}");
                        self.status_note = Some("config update failed".to_string());
                    }
                }
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::PolicyText | InputMode::PolicyPath => self.handle_input_key(key),
        }
    }

    pub fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::ScrollUp => self.scroll_active(-MOUSE_SCROLL_LINES),
            MouseEventKind::ScrollDown => self.scroll_active(MOUSE_SCROLL_LINES),
            _ => {}
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') => self.show_help = !self.show_help,
            KeyCode::Esc => {
                self.show_help = false;
                self.status_note = None;
            }
            KeyCode::Tab => self.cycle_view(1),
            KeyCode::BackTab => self.cycle_view(View::ALL.len() - 1),
            KeyCode::Char(c @ '1'..='5') => {
                let idx = (c as usize) - ('1' as usize);
                self.view = View::ALL[idx];
            }
            KeyCode::Char('i') => self.begin_input(InputMode::PolicyText),
            KeyCode::Char('o') => self.begin_input(InputMode::PolicyPath),
            KeyCode::Char('p') => self.trigger(ControlAction::Pause),
            KeyCode::Char('c') => self.trigger(ControlAction::Resume),
            KeyCode::Char('x') => self.trigger(ControlAction::StopAndExport),
            KeyCode::Char('e') => self.trigger(ControlAction::Export),
            KeyCode::Char('f') => self.toggle_fast_mode(),
            KeyCode::Char('j') | KeyCode::Down => self.scroll_active(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_active(-1),
            KeyCode::PageDown => self.scroll_active(self.page_size()),
            KeyCode::PageUp => self.scroll_active(-self.page_size()),
            KeyCode::Char('g') | KeyCode::Home => self.scroll_edge(false),
            KeyCode::Char('G') | KeyCode::End => self.scroll_edge(true),
            KeyCode::Char('[') => self.report_scroll = self.report_scroll.saturating_sub(1),
            KeyCode::Char(']') => self.report_scroll = self.report_scroll.saturating_add(1),
            _ => {}
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input.clear();
            }
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::ALT) => {
                if self.input_mode == InputMode::PolicyText {
                    self.input.push('\n');
                }
            }
            KeyCode::Enter => self.submit_input(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) => self.input.push(c),
            _ => {}
        }
    }

    fn begin_input(&mut self, mode: InputMode) {
        let phase = self.phase();
        if !phase.allows(ControlAction::Submit) {
            self.status_note = Some(format!("Cannot start a new run while {phase}"));
            return;
        }
        self.input_mode = mode;
        self.input.clear();
    }

    fn submit_input(&mut self) {
        let source = match self.input_mode {
            InputMode::PolicyText => PolicySource::text(self.input.clone()),
            InputMode::PolicyPath => PolicySource::read_file(Path::new(self.input.trim())),
            InputMode::Normal => return,
        };
        match source {
            Ok(source) => {
                self.input_mode = InputMode::Normal;
                self.input.clear();
                self.submit(source);
            }
            Err(err) => self.status_note = Some(err.to_string()),
        }
    }

    pub fn submit(&mut self, source: PolicySource) {
        let dispatcher = self.dispatcher.clone();
        self.spawn_action(ControlAction::Submit, async move {
            dispatcher.submit(source).await
        });
        // the dispatcher already cleared the previous run; follow the new one
        self.seen_revision = None;
    }

    pub fn trigger(&mut self, action: ControlAction) {
        let phase = self.phase();
        if !phase.allows(action) {
            self.status_note = Some(format!("{action} is not available while {phase}"));
            return;
        }
        let dispatcher = self.dispatcher.clone();
        match action {
            ControlAction::Submit => self.begin_input(InputMode::PolicyText),
            ControlAction::Pause => {
                self.spawn_action(action, async move { dispatcher.pause().await })
            }
            ControlAction::Resume => {
                self.spawn_action(action, async move { dispatcher.resume().await })
            }
            ControlAction::StopAndExport => {
                self.spawn_action(action, async move { dispatcher.stop_and_export().await })
            }
            ControlAction::Export => {
                self.spawn_action(action, async move { dispatcher.export().await })
            }
        }
    }

    fn spawn_action<F>(&mut self, action: ControlAction, task: F)
    where
        F: Future<Output = Result<DispatchOutcome, DispatchError>> + Send + 'static,
    {
        if let Some(current) = self.in_flight {
            self.status_note = Some(format!("Waiting for {current} to finish"));
            return;
        }
        self.in_flight = Some(action);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = task.await;
            let _ = tx.send(AppEvent::Dispatched { action, result }).await;
        });
    }

    fn toggle_fast_mode(&mut self) {
        if self.config_pending {
            return;
        }
        let current = match &self.config {
            Some(Ok(config)) => config.fast_demo,
            _ => false,
        };
        self.config_pending = true;
        let dispatcher = self.dispatcher.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .set_fast_mode(!current)
                .await
                .map_err(|err| err.to_string());
            let _ = tx.send(AppEvent::ConfigUpdated(result)).await;
        });
    }

    fn cycle_view(&mut self, step: usize) {
        let next = (self.view.index() + step) % View::ALL.len();
        self.view = View::ALL[next];
    }

    fn page_size(&self) -> isize {
        self.view
            .stream()
            .map(|stream| self.feeds.get(stream).viewport().viewport_height.max(1) as isize)
            .unwrap_or(1)
    }

    fn scroll_active(&mut self, delta: isize) {
        if let Some(stream) = self.view.stream() {
            self.feeds.get_mut(stream).scroll_by(delta);
        }
    }

    fn scroll_edge(&mut self, bottom: bool) {
        if let Some(stream) = self.view.stream() {
            let feed = self.feeds.get_mut(stream);
            if bottom {
                feed.scroll_to_bottom();
            } else {
                feed.scroll_to_top();
            }
        }
    }
}

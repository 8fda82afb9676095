use crate::app::{App, InputMode, View};
use crate::theme;
use chrono::{DateTime, Local, Utc};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, Gauge, GraphType, Paragraph, Row,
        Table, Tabs, Wrap,
    },
    Frame,
};
use swarm_core::cycle::progress_ratio;
use swarm_core::{CyclePhase, LogEntry, LogStream, Metric, RunStatus, MAX_ITERATIONS};

/// Read-out of the shared snapshot taken once per frame so the lock is not
/// held while drawing.
struct RunView {
    phase: CyclePhase,
    status: RunStatus,
    metrics: Vec<Metric>,
    artifact: String,
    synced_at: Option<DateTime<Utc>>,
}

impl RunView {
    fn capture(app: &App) -> Self {
        let store = app.store.lock();
        Self {
            phase: store.phase(),
            status: store.status(),
            metrics: store.metrics().to_vec(),
            artifact: store.artifact().text().into_owned(),
            synced_at: store.last_synced_at(),
        }
    }
}

pub fn render(f: &mut Frame, app: &mut App) {
    let area = f.size();
    let run = RunView::capture(app);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(footer_height(app)),
        ])
        .split(area);

    render_tabs(f, app, layout[0]);
    render_status(f, app, &run, layout[1]);
    match app.view {
        View::Dashboard => {
            let cols = split_columns(layout[2]);
            render_feed(f, app, LogStream::Citizen, cols[0]);
            let side = split_rows(cols[1]);
            render_trend(f, &run, side[0]);
            render_report(f, app, &run, side[1]);
        }
        View::Senate => {
            let cols = split_columns(layout[2]);
            render_feed(f, app, LogStream::Senate, cols[0]);
            render_trend(f, &run, cols[1]);
        }
        View::Architect => {
            let cols = split_columns(layout[2]);
            render_feed(f, app, LogStream::Architect, cols[0]);
            render_report(f, app, &run, cols[1]);
        }
        View::Agents => render_agents(f, app, layout[2]),
        View::Settings => render_settings(f, app, layout[2]),
    }
    render_footer(f, app, &run, layout[3]);

    if app.show_help {
        let popup = centered(area, 60, 70);
        f.render_widget(Clear, popup);
        render_help(f, popup);
    }
}

fn split_columns(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area)
}

fn split_rows(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area)
}

fn footer_height(app: &App) -> u16 {
    match app.input_mode {
        InputMode::PolicyText => 6,
        InputMode::PolicyPath | InputMode::Normal => 3,
    }
}

fn render_tabs(f: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<Line> = View::ALL
        .iter()
        .enumerate()
        .map(|(idx, view)| Line::from(format!("{} {}", idx + 1, view.title())))
        .collect();
    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme::BORDER))
                .title(Span::styled(" Policy Swarm ", theme::HEADER_STYLE)),
        )
        .select(app.view.index())
        .highlight_style(
            Style::default()
                .fg(theme::ACCENT)
                .add_modifier(Modifier::BOLD),
        );
    f.render_widget(tabs, area);
}

fn render_status(f: &mut Frame, app: &App, run: &RunView, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(20), Constraint::Length(32)])
        .split(area);

    let mut spans = vec![
        Span::styled(
            format!(" {} ", run.phase.label()),
            Style::default()
                .fg(Color::Black)
                .bg(theme::phase_color(run.phase))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::raw(run.phase.headline(run.status.iteration)),
    ];
    if let Some(metric) = run.metrics.last() {
        spans.push(Span::styled("  |  ", Style::default().fg(theme::MUTED)));
        spans.extend(score_spans(metric));
    }
    if let Some(report) = &app.last_poll {
        if report.is_partial() {
            let missing: Vec<&str> = report.missing.iter().map(|field| field.as_str()).collect();
            spans.push(Span::styled(
                format!("  stale: {}", missing.join(",")),
                Style::default().fg(theme::WARN),
            ));
        }
    }
    let synced = run
        .synced_at
        .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    spans.push(Span::styled(
        format!("  synced {synced}"),
        Style::default().fg(theme::MUTED),
    ));

    let status = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme::BORDER)),
    );
    f.render_widget(status, cols[0]);

    let iteration = run.status.iteration.min(MAX_ITERATIONS);
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme::BORDER)),
        )
        .gauge_style(Style::default().fg(theme::phase_color(run.phase)))
        .ratio(progress_ratio(run.status.iteration))
        .label(format!("Iteration {iteration}/{MAX_ITERATIONS}"));
    f.render_widget(gauge, cols[1]);
}

/// Latest approval scores, rendered as `Citizen x%, Senate y%`.
fn score_spans(metric: &Metric) -> [Span<'static>; 3] {
    [
        Span::styled(
            format!("Citizen {:.1}%", metric.citizen_score),
            Style::default().fg(theme::score_color(metric.citizen_score)),
        ),
        Span::raw(", "),
        Span::styled(
            format!("Senate {:.1}%", metric.senate_score),
            Style::default().fg(theme::score_color(metric.senate_score)),
        ),
    ]
}

fn render_feed(f: &mut Frame, app: &mut App, stream: LogStream, area: Rect) {
    let feed = app.feeds.get_mut(stream);
    let follow = if feed.auto_scroll() { "live" } else { "scrolled" };
    let title = format!(
        " {} ({}) [{follow}] ",
        stream.population().label(),
        feed.total()
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::population_color(Some(stream.population()))))
        .title(Span::styled(title, theme::HEADER_STYLE));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let width = usize::from(inner.width.max(1));
    let lines: Vec<Line> = if feed.entries().is_empty() {
        vec![Line::from(Span::styled(
            "No messages yet.",
            Style::default().fg(theme::MUTED),
        ))]
    } else {
        feed.entries()
            .iter()
            .flat_map(|entry| entry_lines(entry, width))
            .collect()
    };
    let offset = feed.measure(lines.len(), usize::from(inner.height));
    let offset = u16::try_from(offset).unwrap_or(u16::MAX);
    f.render_widget(Paragraph::new(lines).scroll((offset, 0)), inner);
}

/// Header line, the message wrapped to `width` with an indent, then a blank
/// separator. Wrapping happens here so the feed knows its real height.
fn entry_lines(entry: &LogEntry, width: usize) -> Vec<Line<'static>> {
    let mut header = vec![
        Span::styled(
            entry.agent.clone(),
            Style::default()
                .fg(theme::population_color(entry.population))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!(" ({})", entry.role), Style::default().fg(theme::MUTED)),
    ];
    if let Some(score) = entry.score {
        header.push(Span::styled(
            format!(" {score:.0}"),
            Style::default().fg(theme::score_color(score)),
        ));
    }
    let mut lines = vec![Line::from(header)];
    let indent = "  ";
    for chunk in wrap_text(&entry.message, width.saturating_sub(indent.len()).max(1)) {
        lines.push(Line::from(format!("{indent}{chunk}")));
    }
    lines.push(Line::from(""));
    lines
}

pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0usize;
        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            if current_len > 0 && current_len + 1 + word_len > width {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if word_len > width {
                let chars: Vec<char> = word.chars().collect();
                for piece in chars.chunks(width) {
                    if current_len > 0 {
                        out.push(std::mem::take(&mut current));
                    }
                    current = piece.iter().collect();
                    current_len = piece.len();
                }
                continue;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(word);
            current_len += word_len;
        }
        out.push(current);
    }
    out
}

fn render_trend(f: &mut Frame, run: &RunView, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(Span::styled(" Consensus Trend ", theme::HEADER_STYLE));
    if run.metrics.is_empty() {
        let empty = Paragraph::new(Span::styled(
            "Awaiting simulation data",
            Style::default().fg(theme::MUTED),
        ))
        .block(block);
        f.render_widget(empty, area);
        return;
    }

    let citizens: Vec<(f64, f64)> = run
        .metrics
        .iter()
        .map(|m| (f64::from(m.iteration), m.citizen_score))
        .collect();
    let senate: Vec<(f64, f64)> = run
        .metrics
        .iter()
        .map(|m| (f64::from(m.iteration), m.senate_score))
        .collect();
    let max_x = run
        .metrics
        .iter()
        .map(|m| m.iteration)
        .max()
        .unwrap_or(0)
        .max(MAX_ITERATIONS);

    let datasets = vec![
        Dataset::default()
            .name("Citizens")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(theme::CITIZEN_SERIES))
            .data(&citizens),
        Dataset::default()
            .name("Senate")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(theme::SENATE_SERIES))
            .data(&senate),
    ];
    let x_labels: Vec<Span> = (0..=max_x).map(|i| Span::raw(i.to_string())).collect();
    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .title("iteration")
                .style(Style::default().fg(theme::MUTED))
                .bounds([0.0, f64::from(max_x)])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(theme::MUTED))
                .bounds([0.0, 100.0])
                .labels(vec![Span::raw("0"), Span::raw("50"), Span::raw("100")]),
        );
    f.render_widget(chart, area);
}

fn render_report(f: &mut Frame, app: &App, run: &RunView, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(Span::styled(" Final Policy ", theme::HEADER_STYLE));
    let body = if run.artifact.is_empty() {
        let placeholder = if run.phase.is_active() {
            "Synthesizing consensus..."
        } else {
            "Awaiting simulation data"
        };
        Paragraph::new(Span::styled(placeholder, Style::default().fg(theme::MUTED)))
    } else {
        Paragraph::new(run.artifact.clone())
            .wrap(Wrap { trim: false })
            .scroll((app.report_scroll, 0))
    };
    f.render_widget(body.block(block), area);
}

fn render_agents(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(Span::styled(" Agents ", theme::HEADER_STYLE));
    let agents = match &app.agents {
        None => {
            f.render_widget(Paragraph::new("Loading agents...").block(block), area);
            return;
        }
        Some(Err(err)) => {
            let text = Span::styled(
                format!("Could not load agents: {err}"),
                Style::default().fg(theme::CRITICAL),
            );
            f.render_widget(Paragraph::new(text).block(block), area);
            return;
        }
        Some(Ok(agents)) => agents,
    };

    let header = Row::new(vec!["Name", "Role", "Traits", "Background"])
        .style(theme::HEADER_STYLE)
        .bottom_margin(1);
    let rows: Vec<Row> = agents
        .iter()
        .map(|agent| {
            Row::new(vec![
                Cell::from(agent.name.clone()),
                Cell::from(agent.role.clone()),
                Cell::from(agent.traits.join(", ")),
                Cell::from(agent.background.clone()),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(24),
            Constraint::Length(28),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(block);
    f.render_widget(table, area);
}

fn render_settings(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(Span::styled(" Settings ", theme::HEADER_STYLE));
    let key = |label: &str| Span::styled(format!("{label:<16}"), Style::default().fg(Color::Cyan));

    let mode = match &app.config {
        None => Span::raw("loading..."),
        Some(Err(err)) => Span::styled(format!("unavailable ({err})"), Style::default().fg(theme::CRITICAL)),
        Some(Ok(config)) => Span::raw(format!(
            "{} ({} exchanges, {} senate exchanges)",
            config.speed_label(),
            config.max_exchanges,
            config.max_senate_exchanges
        )),
    };
    let mut lines = vec![
        Line::from(vec![key("API"), Span::raw(app.settings.api_url.clone())]),
        Line::from(vec![
            key("Poll interval"),
            Span::raw(format!("{} ms", app.settings.poll_interval.as_millis())),
        ]),
        Line::from(vec![
            key("Export dir"),
            Span::raw(app.settings.export_dir.display().to_string()),
        ]),
        Line::from(vec![key("Pipeline mode"), mode]),
        Line::from(""),
    ];
    if app.config_pending {
        lines.push(Line::from(Span::styled(
            "Updating pipeline mode...",
            Style::default().fg(theme::WARN),
        )));
    } else {
        lines.push(Line::from(Span::styled(
            "Press f to toggle fast demo mode.",
            Style::default().fg(theme::MUTED),
        )));
    }
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_footer(f: &mut Frame, app: &App, run: &RunView, area: Rect) {
    match app.input_mode {
        InputMode::PolicyText | InputMode::PolicyPath => {
            let title = if app.input_mode == InputMode::PolicyText {
                " Policy (Enter submit, Alt+Enter newline, Esc cancel) "
            } else {
                " Policy file: .md, .markdown or .txt (Enter load, Esc cancel) "
            };
            let input = Paragraph::new(format!("{}_", app.input))
                .wrap(Wrap { trim: false })
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(theme::ACCENT))
                        .title(title),
                );
            f.render_widget(input, area);
        }
        InputMode::Normal => {
            let mut spans: Vec<Span> = Vec::new();
            if let Some(note) = &app.status_note {
                spans.push(Span::styled(
                    format!("{note}  "),
                    Style::default().fg(theme::WARN),
                ));
            }
            if let Some(action) = app.in_flight {
                spans.push(Span::styled(
                    format!("{action}...  "),
                    Style::default().fg(theme::ACCENT),
                ));
            }
            spans.extend(action_hints(run.phase));
            spans.push(Span::styled("  ? help  q quit", Style::default().fg(theme::MUTED)));
            let footer = Paragraph::new(Line::from(spans)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(theme::BORDER)),
            );
            f.render_widget(footer, area);
        }
    }
}

fn action_hints(phase: CyclePhase) -> Vec<Span<'static>> {
    let hints: &[(&str, &str)] = match phase {
        CyclePhase::Ready => &[("i", "policy"), ("o", "open file")],
        CyclePhase::Running => &[("p", "pause")],
        CyclePhase::Paused => &[("c", "continue"), ("x", "stop & export")],
        CyclePhase::Complete => &[("e", "export"), ("i", "new policy"), ("o", "open file")],
    };
    let mut spans = Vec::new();
    for (key, label) in hints {
        spans.push(Span::styled(
            key.to_string(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::raw(format!(" {label}  ")));
    }
    spans
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = [
        ("Tab / 1-5", "Switch view"),
        ("i", "Type a policy"),
        ("o", "Load policy from file"),
        ("p", "Pause run"),
        ("c", "Continue run"),
        ("x", "Stop and export"),
        ("e", "Export final policy"),
        ("f", "Toggle fast demo mode"),
        ("j / k", "Scroll feed"),
        ("PgUp / PgDn", "Scroll feed by page"),
        ("g / G", "Top / follow live edge"),
        ("[ / ]", "Scroll final policy"),
        ("?", "Toggle help"),
        ("q", "Quit"),
    ];
    let mut text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    text.extend(rows.iter().map(|(key, desc)| {
        Line::from(vec![
            Span::styled(format!("{key:<13}"), Color::Cyan),
            Span::raw(*desc),
        ])
    }));
    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

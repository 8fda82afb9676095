use ratatui::style::{Color, Modifier, Style};
use swarm_core::{CyclePhase, Population};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(191, 219, 254))
    .add_modifier(Modifier::BOLD);
pub const MUTED: Color = Color::Rgb(148, 163, 184);
pub const BORDER: Color = Color::Rgb(71, 85, 105);
pub const ACCENT: Color = Color::Rgb(56, 189, 248);
pub const WARN: Color = Color::Rgb(245, 158, 11);
pub const CRITICAL: Color = Color::Rgb(239, 68, 68);
pub const CITIZEN_SERIES: Color = Color::Rgb(142, 192, 124);
pub const SENATE_SERIES: Color = Color::Rgb(250, 189, 47);

pub fn phase_color(phase: CyclePhase) -> Color {
    match phase {
        CyclePhase::Ready => MUTED,
        CyclePhase::Running => ACCENT,
        CyclePhase::Paused => WARN,
        CyclePhase::Complete => Color::Rgb(34, 197, 94),
    }
}

pub fn population_color(population: Option<Population>) -> Color {
    match population {
        Some(Population::Citizen) => CITIZEN_SERIES,
        Some(Population::Senate) => SENATE_SERIES,
        Some(Population::Architect) => Color::Rgb(211, 134, 155),
        Some(Population::System) | None => MUTED,
    }
}

/// Scores run 0-100; low consensus reads red, high reads green.
pub fn score_color(score: f64) -> Color {
    if score >= 70.0 {
        Color::Rgb(184, 187, 38)
    } else if score >= 40.0 {
        WARN
    } else {
        CRITICAL
    }
}

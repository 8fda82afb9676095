use crate::snapshot::RunIntent;
use crate::{RunStatus, MAX_ITERATIONS};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CyclePhase {
    Ready,
    Running,
    Paused,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Submit,
    Pause,
    Resume,
    StopAndExport,
    Export,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Submit => "submit",
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::StopAndExport => "stop_and_export",
            ControlAction::Export => "export",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CyclePhase {
    /// Server-reported status decides, except that a freshly dispatched
    /// submit counts as running until the remote catches up.
    pub fn derive(status: &RunStatus, intent: &RunIntent) -> Self {
        if status.complete {
            CyclePhase::Complete
        } else if status.paused {
            CyclePhase::Paused
        } else if status.iteration > 0 || intent.submitted {
            CyclePhase::Running
        } else {
            CyclePhase::Ready
        }
    }

    pub fn legal_actions(self) -> &'static [ControlAction] {
        match self {
            CyclePhase::Ready => &[ControlAction::Submit],
            CyclePhase::Running => &[ControlAction::Pause],
            CyclePhase::Paused => &[ControlAction::Resume, ControlAction::StopAndExport],
            // a finished run is replaced by submitting the next one
            CyclePhase::Complete => &[ControlAction::Export, ControlAction::Submit],
        }
    }

    pub fn allows(self, action: ControlAction) -> bool {
        self.legal_actions().contains(&action)
    }

    pub fn label(self) -> &'static str {
        match self {
            CyclePhase::Ready => "Ready",
            CyclePhase::Running => "Running",
            CyclePhase::Paused => "Paused",
            CyclePhase::Complete => "Complete",
        }
    }

    pub fn headline(self, iteration: u32) -> String {
        match self {
            CyclePhase::Ready => "Ready to start".to_string(),
            CyclePhase::Running => format!("Iteration {iteration}/{MAX_ITERATIONS} running"),
            CyclePhase::Paused => format!("Paused at iteration {iteration}/{MAX_ITERATIONS}"),
            CyclePhase::Complete => "Consensus reached".to_string(),
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, CyclePhase::Running | CyclePhase::Paused)
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn progress_ratio(iteration: u32) -> f64 {
    (f64::from(iteration) / f64::from(MAX_ITERATIONS)).clamp(0.0, 1.0)
}

use std::fmt::Display;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Resolving,
    Fetching,
    Transcoding,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Resolving => "resolving",
            Phase::Fetching => "fetching",
            Phase::Transcoding => "transcoding",
        };
        f.write_str(s)
    }
}

/// States of a download run.
///
/// `Complete`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunState {
    Idle,
    Resolving,
    AwaitingSelection,
    Fetching,
    Transcoding,
    Complete,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Complete | RunState::Failed | RunState::Cancelled
        )
    }
}

impl From<Phase> for RunState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Resolving => RunState::Resolving,
            Phase::Fetching => RunState::Fetching,
            Phase::Transcoding => RunState::Transcoding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub phase: Phase,
    /// In `[0, 1]`
    pub fraction_complete: f64,
    pub eta_seconds: Option<f64>,
}

impl DownloadProgress {
    pub fn new(phase: Phase, fraction: f64, eta_seconds: Option<f64>) -> Self {
        let fraction_complete = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            phase,
            fraction_complete,
            eta_seconds: eta_seconds.filter(|eta| eta.is_finite() && *eta >= 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fraction_is_clamped() {
        assert_eq!(
            DownloadProgress::new(Phase::Fetching, 1.7, None).fraction_complete,
            1.0
        );
        assert_eq!(
            DownloadProgress::new(Phase::Fetching, -0.2, None).fraction_complete,
            0.0
        );
        assert_eq!(
            DownloadProgress::new(Phase::Fetching, f64::NAN, Some(f64::INFINITY)),
            DownloadProgress::new(Phase::Fetching, 0.0, None)
        );
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(RunState::Complete.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(!RunState::AwaitingSelection.is_terminal());
        assert!(!RunState::from(Phase::Transcoding).is_terminal());
    }
}

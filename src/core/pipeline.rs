//! Pipeline state machine.
//!
//! A run moves through a fixed table of transitions. There is no retry edge:
//! once a run reaches `Failed` it stays there.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Extract,
    QualityGate,
    Verify,
    Success,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Extract => "extract",
            PipelineState::QualityGate => "quality_gate",
            PipelineState::Verify => "verify",
            PipelineState::Success => "success",
            PipelineState::Failed => "failed",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Success | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage reported back to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Extracted,
    StageFailed,
    GatePassed,
    GateRejected,
    AllVerified,
    VerifyRejected,
    Stopped,
    BudgetExhausted,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Extracted => "extracted",
            Signal::StageFailed => "stage_failed",
            Signal::GatePassed => "gate_passed",
            Signal::GateRejected => "gate_rejected",
            Signal::AllVerified => "all_verified",
            Signal::VerifyRejected => "verify_rejected",
            Signal::Stopped => "stopped",
            Signal::BudgetExhausted => "budget_exhausted",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use PipelineState::*;

/// Stage-specific edges; `Stopped` and `BudgetExhausted` are handled for
/// every non-terminal state in [`next_state`]
pub const TRANSITIONS: &[(PipelineState, Signal, PipelineState)] = &[
    (Extract, Signal::Extracted, QualityGate),
    (Extract, Signal::StageFailed, Failed),
    (QualityGate, Signal::GatePassed, Verify),
    (QualityGate, Signal::GateRejected, Failed),
    (QualityGate, Signal::StageFailed, Failed),
    (Verify, Signal::AllVerified, Success),
    (Verify, Signal::VerifyRejected, Failed),
    (Verify, Signal::StageFailed, Failed),
];

/// Target of `signal` in `state`, or `None` if the table has no such edge
pub fn next_state(state: PipelineState, signal: Signal) -> Option<PipelineState> {
    if state.is_terminal() {
        return None;
    }
    if matches!(signal, Signal::Stopped | Signal::BudgetExhausted) {
        return Some(Failed);
    }
    TRANSITIONS
        .iter()
        .find(|(from, on, _)| *from == state && *on == signal)
        .map(|(_, _, to)| *to)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [PipelineState; 5] = [Extract, QualityGate, Verify, Success, Failed];
    const ALL_SIGNALS: [Signal; 8] = [
        Signal::Extracted,
        Signal::StageFailed,
        Signal::GatePassed,
        Signal::GateRejected,
        Signal::AllVerified,
        Signal::VerifyRejected,
        Signal::Stopped,
        Signal::BudgetExhausted,
    ];

    #[test]
    fn test_happy_path() {
        let mut state = Extract;
        for signal in [Signal::Extracted, Signal::GatePassed, Signal::AllVerified] {
            state = next_state(state, signal).unwrap();
        }
        assert_eq!(state, Success);
    }

    #[test]
    fn test_rejections_fail() {
        assert_eq!(next_state(Extract, Signal::StageFailed), Some(Failed));
        assert_eq!(next_state(QualityGate, Signal::GateRejected), Some(Failed));
        assert_eq!(next_state(Verify, Signal::VerifyRejected), Some(Failed));
    }

    #[test]
    fn test_stop_and_budget_from_every_live_state() {
        for state in [Extract, QualityGate, Verify] {
            assert_eq!(next_state(state, Signal::Stopped), Some(Failed));
            assert_eq!(next_state(state, Signal::BudgetExhausted), Some(Failed));
        }
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for state in [Success, Failed] {
            for signal in ALL_SIGNALS {
                assert_eq!(next_state(state, signal), None, "{} on {}", state, signal);
            }
        }
    }

    #[test]
    fn test_no_edge_skips_a_stage() {
        let reachable_from_extract: Vec<_> = ALL_SIGNALS
            .iter()
            .filter_map(|s| next_state(Extract, *s))
            .collect();
        assert!(!reachable_from_extract.contains(&Verify));
        assert!(!reachable_from_extract.contains(&Success));

        // only Verify reaches Success
        for state in ALL_STATES {
            for signal in ALL_SIGNALS {
                if next_state(state, signal) == Some(Success) {
                    assert_eq!((state, signal), (Verify, Signal::AllVerified));
                }
            }
        }
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&QualityGate).unwrap(), "\"quality_gate\"");
    }
}

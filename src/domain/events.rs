//! Audit events and gate decisions recorded during a run.
//!
//! Both logs are append-only. Entries share one sequence counter per run,
//! so the interleaving of audit events and gate decisions is recoverable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in a run's audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the run's combined log, starting at 0
    pub seq: u64,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Type of event
    pub event: AuditKind,

    /// Agent or component that produced the event
    pub agent: String,

    /// Stage name (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Structural summary: counts and states, never full payloads
    #[serde(default)]
    pub summary: serde_json::Value,

    /// Time taken in milliseconds (for completed stages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new event with the current timestamp
    pub fn new(seq: u64, event: AuditKind, agent: impl Into<String>, summary: serde_json::Value) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            event,
            agent: agent.into(),
            stage: None,
            summary,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A new run has started
    RunStarted,

    /// A run reached `Success`
    RunCompleted,

    /// A run reached `Failed`
    RunFailed,

    /// A stage has started execution
    StageStarted,

    /// A stage produced its output
    StageCompleted,

    /// A stage failed (never retried)
    StageFailed,

    /// The pipeline state machine moved between states
    Transition,

    /// A source text was registered with its hash
    SourceRegistered,

    /// A model-proposed quote could not be located verbatim
    QuoteUnresolved,

    /// A metered call was refused because the budget ran out
    BudgetExhausted,

    /// A cooperative stop was requested
    StopRequested,
}

/// A recorded gate outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    /// Position in the run's combined log
    pub seq: u64,

    /// Which gate decided
    pub gate_id: String,

    pub passed: bool,

    pub timestamp: DateTime<Utc>,

    /// Gate-specific details (score, issue count, threshold)
    #[serde(default)]
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(3, AuditKind::StageCompleted, "orchestrator", json!({"claims": 2}))
            .with_stage("extract");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"stage_completed\""));
        assert!(!json.contains("duration_ms"));

        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event, AuditKind::StageCompleted);
        assert_eq!(parsed.seq, 3);
        assert_eq!(parsed.summary["claims"], 2);
    }

    #[test]
    fn test_event_with_duration_and_error() {
        let event = AuditEvent::new(0, AuditKind::StageFailed, "orchestrator", json!({}))
            .with_duration(1500)
            .with_error("Empty input: raw text is empty");

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error.as_deref(), Some("Empty input: raw text is empty"));
    }
}

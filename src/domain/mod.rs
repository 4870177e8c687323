//! Domain types for a claimgate run.
//!
//! This module contains the shared run state:
//! - Budget: ceilings and running totals for metered work
//! - Events: the audit trail and gate decisions
//! - RunContext: identity, budget, logs and the stop flag

pub mod budget;
pub mod events;
pub mod run_context;

// Re-export commonly used types
pub use budget::{BudgetCeilings, BudgetEnvelope, BudgetMeter};
pub use events::{AuditEvent, AuditKind, GateDecision};
pub use run_context::{new_run_id, Actor, RunContext, StopHandle};

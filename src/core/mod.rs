//! Core orchestration logic.
//!
//! This module contains:
//! - Pipeline: the run state machine and its transition table
//! - Orchestrator: the execution engine that drives stages through it

pub mod orchestrator;
pub mod pipeline;

pub use orchestrator::{FailureDetail, Orchestrator, PipelineRequest, PipelineResult};
pub use pipeline::{next_state, PipelineState, Signal, TRANSITIONS};

//! claimgate - Evidence-grounded claims over canonical text offsets
//!
//! Extracts claims from raw (Arabic) text, pins every claim to exact
//! character offsets in a versioned canonical form of that text, and pushes
//! the result through a gated pipeline that refuses anything it cannot
//! verify.
//!
//! # Architecture
//!
//! - No claim without evidence
//! - No evidence without exact offsets into a known canonical text
//! - No stage transition without a recorded decision
//!
//! # Modules
//!
//! - `canonical`: Canonicalization, offset maps and span resolution
//! - `evidence`: Spans, evidence and claims (wire records and validated types)
//! - `domain`: Budget envelope, run context and audit events
//! - `stages`: Extraction, quality gate, verification, linking, cross-reference
//! - `core`: The pipeline state machine and orchestrator
//! - `adapters`: Metered provider access
//! - `config`: YAML configuration with env overrides
//!
//! # Usage
//!
//! ```no_run
//! use claimgate::{EngineConfig, Orchestrator, PipelineRequest, RunContext};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = EngineConfig::load()?;
//! let orchestrator = Orchestrator::new(&config)?;
//! let mut ctx = RunContext::from_config(&config);
//!
//! let result = orchestrator
//!     .run(&mut ctx, PipelineRequest::new("قال ابن خلدون.", "muqaddima"))
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod canonical;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod evidence;
pub mod stages;
pub mod telemetry;

// Re-export main types at crate root for convenience
pub use adapters::{MeteredClient, Provider, ScriptedProvider};
pub use canonical::{canonicalize, resolve_span, transform, CanonicalPolicy, CanonicalText, OffsetMap, SpanResolver};
pub use config::EngineConfig;
pub use self::core::{FailureDetail, Orchestrator, PipelineRequest, PipelineResult, PipelineState};
pub use domain::{AuditEvent, AuditKind, BudgetCeilings, BudgetEnvelope, BudgetMeter, RunContext, StopHandle};
pub use error::{CoreError, CoreResult};
pub use evidence::{Claim, Evidence, TextSpan};

//! Pipeline stages and the common stage runner.
//!
//! A stage is a function of its input and the run context. [`run_stage`]
//! wraps every invocation: it polls the stop flag, refuses metered stages
//! once the budget is exhausted, records start/finish audit events, and
//! turns stage errors into a [`StageOutcome`] instead of propagating them.

pub mod cross_reference;
pub mod extraction;
pub mod linking;
pub mod quality_gate;
pub mod verification;

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::domain::{AuditEvent, AuditKind, RunContext};
use crate::error::{CoreError, CoreResult};

pub use cross_reference::{cross_reference, extract_terms, CrossRefInput, CrossRefResult, CrossReferenceStage, Relation};
pub use extraction::{
    split_sentences, Extraction, ExtractionInput, ExtractionStage, QuoteProposal, SentenceSegment,
};
pub use linking::{link_entities, EntityMention, EntityType, LinkingInput, LinkingStage};
pub use quality_gate::{evaluate, GateInput, GateOutcome, GateReport, QualityGateStage, GATE_ID};
pub use verification::{verify, ClaimCheck, VerificationInput, VerificationMode, VerificationReport, VerificationStage};

/// Static description of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageCard {
    /// Short id used in audit events
    pub id: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    /// Whether the stage issues budget-consuming calls
    pub metered: bool,
}

/// What a stage produced
#[derive(Debug, Clone)]
pub struct StageProduct<T> {
    pub output: T,
    /// Count-only summary for the audit trail
    pub summary: serde_json::Value,
    pub cost_usd: f64,
}

impl<T> StageProduct<T> {
    pub fn new(output: T, summary: serde_json::Value) -> Self {
        Self {
            output,
            summary,
            cost_usd: 0.0,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }
}

/// How a stage invocation ended
#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    Completed(StageProduct<T>),
    Failed(CoreError),
    /// Cooperative stop, with the recorded reason
    Stopped(String),
    /// The reserved `budget_exhausted` outcome
    BudgetExhausted,
}

impl<T> StageOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }

    /// The product, or the outcome as an error
    pub fn into_result(self) -> CoreResult<StageProduct<T>> {
        match self {
            StageOutcome::Completed(product) => Ok(product),
            StageOutcome::Failed(err) => Err(err),
            StageOutcome::Stopped(reason) => Err(CoreError::Stopped(reason)),
            StageOutcome::BudgetExhausted => Err(CoreError::BudgetExhausted),
        }
    }
}

/// A pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn card(&self) -> StageCard;

    /// Run the stage; errors are converted to outcomes by [`run_stage`]
    async fn run(
        &self,
        ctx: &mut RunContext,
        input: Self::Input,
    ) -> CoreResult<StageProduct<Self::Output>>;
}

fn stop_reason(ctx: &RunContext) -> String {
    ctx.stop_reason().unwrap_or_else(|| "stop requested".to_string())
}

/// Fail with [`CoreError::Stopped`] if a stop was requested
///
/// Stages call this between sub-steps.
pub fn check_stop(ctx: &RunContext) -> CoreResult<()> {
    if ctx.is_stopped() {
        return Err(CoreError::Stopped(stop_reason(ctx)));
    }
    Ok(())
}

/// Run one stage against the context
pub async fn run_stage<S>(stage: &S, ctx: &mut RunContext, input: S::Input) -> StageOutcome<S::Output>
where
    S: Stage + ?Sized,
{
    let card = stage.card();

    if ctx.is_stopped() {
        let reason = stop_reason(ctx);
        info!(stage = card.id, %reason, "Skipping stage: stop requested");
        ctx.push_audit(|seq| {
            AuditEvent::new(seq, AuditKind::StopRequested, card.id, json!({ "reason": reason.clone() }))
                .with_stage(card.id)
        });
        return StageOutcome::Stopped(reason);
    }

    if card.metered && ctx.budget().is_exhausted() {
        warn!(stage = card.id, "Skipping metered stage: budget exhausted");
        ctx.push_audit(|seq| {
            AuditEvent::new(seq, AuditKind::BudgetExhausted, card.id, json!({}))
                .with_stage(card.id)
                .with_error(CoreError::BudgetExhausted.to_string())
        });
        return StageOutcome::BudgetExhausted;
    }

    ctx.push_audit(|seq| {
        AuditEvent::new(seq, AuditKind::StageStarted, card.id, json!({ "version": card.version }))
            .with_stage(card.id)
    });
    debug!(stage = card.id, "Stage started");

    let started = Instant::now();
    let result = stage.run(ctx, input).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(product) => {
            let summary = product.summary.clone();
            ctx.push_audit(|seq| {
                AuditEvent::new(seq, AuditKind::StageCompleted, card.id, summary)
                    .with_stage(card.id)
                    .with_duration(duration_ms)
            });
            info!(stage = card.id, duration_ms, "Stage completed");
            StageOutcome::Completed(product)
        }
        Err(err) => {
            let kind = match err {
                CoreError::BudgetExhausted => AuditKind::BudgetExhausted,
                CoreError::Stopped(_) => AuditKind::StopRequested,
                _ => AuditKind::StageFailed,
            };
            ctx.push_audit(|seq| {
                AuditEvent::new(seq, kind, card.id, json!({ "error_kind": err.kind() }))
                    .with_stage(card.id)
                    .with_duration(duration_ms)
                    .with_error(err.to_string())
            });

            match err {
                CoreError::BudgetExhausted => {
                    warn!(stage = card.id, "Stage hit exhausted budget");
                    StageOutcome::BudgetExhausted
                }
                CoreError::Stopped(reason) => {
                    info!(stage = card.id, %reason, "Stage stopped");
                    StageOutcome::Stopped(reason)
                }
                err => {
                    error!(stage = card.id, error = %err, "Stage failed");
                    StageOutcome::Failed(err)
                }
            }
        }
    }
}

//! Main orchestrator for pipeline execution.
//!
//! Drives one run through EXTRACT → QUALITY_GATE → VERIFY, recording a
//! transition event for every edge taken. Stage failures never escape as
//! errors: the run ends in `Failed` and the first fatal failure is reported
//! in [`PipelineResult::failure`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::adapters::MeteredClient;
use crate::canonical::CanonicalText;
use crate::config::{EngineConfig, VerificationSetting};
use crate::domain::{AuditEvent, AuditKind, BudgetEnvelope, GateDecision, RunContext};
use crate::error::CoreError;
use crate::evidence::{Claim, Evidence};
use crate::stages::{
    run_stage, ExtractionInput, ExtractionStage, GateInput, GateReport, QualityGateStage, StageOutcome,
    VerificationInput, VerificationReport, VerificationStage,
};

use super::pipeline::{next_state, PipelineState, Signal};

const AGENT: &str = "orchestrator";

/// Input of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub raw_text: String,
    pub source_id: String,
}

impl PipelineRequest {
    pub fn new(raw_text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            source_id: source_id.into(),
        }
    }
}

/// The first fatal failure of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// State the run was in when it failed
    pub state: PipelineState,
    /// Error kind, e.g. `structural_invalidity` or `budget_exhausted`
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl FailureDetail {
    fn from_error(state: PipelineState, err: &CoreError) -> Self {
        Self {
            state,
            kind: err.kind().to_string(),
            message: err.to_string(),
            issues: Vec::new(),
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub success: bool,
    pub final_state: PipelineState,
    pub claims: Vec<Claim>,
    pub evidence: Vec<Evidence>,
    pub canonical_text: Option<String>,
    pub canonical_policy_version: String,
    pub gate: Option<GateReport>,
    pub verification: Option<VerificationReport>,
    pub failure: Option<FailureDetail>,
    pub audit_events: Vec<AuditEvent>,
    pub gate_decisions: Vec<GateDecision>,
    pub budget: BudgetEnvelope,
}

/// Accumulates what the stages produced during one run
#[derive(Default)]
struct RunState {
    claims: Vec<Claim>,
    evidence: Vec<Evidence>,
    canonical: Option<Arc<CanonicalText>>,
    /// Extracted records waiting for the gate
    pending: Option<GateInput>,
    gate: Option<GateReport>,
    verification: Option<VerificationReport>,
    failure: Option<FailureDetail>,
}

impl RunState {
    /// Keep only the first failure
    fn fail(&mut self, detail: FailureDetail) {
        if self.failure.is_none() {
            self.failure = Some(detail);
        }
    }

    /// Signal for a stage that did not complete
    fn interrupted<T>(&mut self, state: PipelineState, outcome: StageOutcome<T>) -> Signal {
        match outcome {
            StageOutcome::Completed(_) => Signal::StageFailed,
            StageOutcome::Failed(err) => {
                self.fail(FailureDetail::from_error(state, &err));
                Signal::StageFailed
            }
            StageOutcome::Stopped(reason) => {
                self.fail(FailureDetail::from_error(state, &CoreError::Stopped(reason)));
                Signal::Stopped
            }
            StageOutcome::BudgetExhausted => {
                self.fail(FailureDetail::from_error(state, &CoreError::BudgetExhausted));
                Signal::BudgetExhausted
            }
        }
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    extraction: ExtractionStage,
    gate: QualityGateStage,
    verification: VerificationStage,
    verification_setting: VerificationSetting,
    policy_version: String,
}

impl Orchestrator {
    /// Orchestrator for `config` without a provider
    ///
    /// Fails if the config selects an extraction strategy that needs one.
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        Self::from_config(config, None)
    }

    /// Orchestrator for `config` whose extraction may call `client`
    pub fn with_provider(config: &EngineConfig, client: MeteredClient) -> anyhow::Result<Self> {
        Self::from_config(config, Some(client))
    }

    pub fn from_config(config: &EngineConfig, client: Option<MeteredClient>) -> anyhow::Result<Self> {
        Ok(Self {
            extraction: ExtractionStage::from_config(config, client)?,
            gate: QualityGateStage::new(config.gate.pass_threshold),
            verification: VerificationStage::new(),
            verification_setting: config.verification.mode,
            policy_version: config.policy.version().to_string(),
        })
    }

    /// Execute one run against `ctx`
    #[instrument(skip(self, ctx, request), fields(run_id = %ctx.run_id, source = %request.source_id))]
    pub async fn run(&self, ctx: &mut RunContext, request: PipelineRequest) -> PipelineResult {
        info!("Starting pipeline execution");

        let previous = ctx.adopt_policy_version(self.policy_version.clone());
        if previous != self.policy_version {
            info!(from = %previous, to = %self.policy_version, "Adopted canonical policy version");
        }
        ctx.record_audit(
            AuditKind::RunStarted,
            AGENT,
            json!({
                "source_id": request.source_id,
                "raw_chars": request.raw_text.chars().count(),
                "canonical_policy_version": self.policy_version,
            }),
        );

        let mut run = RunState::default();
        let mut state = PipelineState::Extract;

        while !state.is_terminal() {
            let (signal, summary) = match state {
                PipelineState::Extract => self.extract(ctx, &request, &mut run).await,
                PipelineState::QualityGate => self.quality_gate(ctx, &mut run).await,
                PipelineState::Verify => self.verify(ctx, &mut run).await,
                PipelineState::Success | PipelineState::Failed => break,
            };
            state = self.transition(ctx, state, signal, summary, &mut run);
        }

        self.complete_run(ctx, state, run)
    }

    async fn extract(&self, ctx: &mut RunContext, request: &PipelineRequest, run: &mut RunState) -> (Signal, Value) {
        let input = ExtractionInput::new(request.raw_text.clone(), request.source_id.clone());
        match run_stage(&self.extraction, ctx, input).await {
            StageOutcome::Completed(product) => {
                let extraction = product.output;
                let summary = json!({
                    "claims": extraction.claims.len(),
                    "evidence": extraction.evidence.len(),
                    "unresolved_quotes": extraction.unresolved_quotes.len(),
                });
                run.canonical = Some(extraction.canonical);
                run.pending = Some(GateInput {
                    claims: extraction.claims,
                    evidence: extraction.evidence,
                });
                (Signal::Extracted, summary)
            }
            outcome => (run.interrupted(PipelineState::Extract, outcome), json!({})),
        }
    }

    async fn quality_gate(&self, ctx: &mut RunContext, run: &mut RunState) -> (Signal, Value) {
        let input = run.pending.take().unwrap_or_default();
        match run_stage(&self.gate, ctx, input).await {
            StageOutcome::Completed(product) => {
                let outcome = product.output;
                let summary = json!({
                    "score": outcome.report.score,
                    "issues": outcome.report.issues.len(),
                    "claims": outcome.claims.len(),
                    "evidence": outcome.evidence.len(),
                });
                let signal = if outcome.report.passed {
                    run.claims = outcome.claims;
                    run.evidence = outcome.evidence;
                    Signal::GatePassed
                } else {
                    run.fail(FailureDetail {
                        state: PipelineState::QualityGate,
                        kind: "structural_invalidity".to_string(),
                        message: outcome.report.message(),
                        issues: outcome.report.issues.clone(),
                    });
                    Signal::GateRejected
                };
                run.gate = Some(outcome.report);
                (signal, summary)
            }
            outcome => (run.interrupted(PipelineState::QualityGate, outcome), json!({})),
        }
    }

    async fn verify(&self, ctx: &mut RunContext, run: &mut RunState) -> (Signal, Value) {
        let canonical = match self.verification_setting {
            VerificationSetting::AgainstCanonical => run.canonical.clone(),
            VerificationSetting::OffsetsOnly => None,
        };
        let input = VerificationInput {
            claims: run.claims.clone(),
            evidence: run.evidence.clone(),
            canonical,
        };

        match run_stage(&self.verification, ctx, input).await {
            StageOutcome::Completed(product) => {
                let report = product.output;
                let summary = json!({
                    "total": report.total_claims,
                    "verified": report.verified_count,
                });
                let signal = if report.all_passed {
                    Signal::AllVerified
                } else {
                    let (kind, message) = match report.first_error() {
                        Some(err) => (err.kind().to_string(), err.to_string()),
                        None => (
                            "structural_invalidity".to_string(),
                            format!(
                                "{} of {} claims failed verification",
                                report.total_claims - report.verified_count,
                                report.total_claims
                            ),
                        ),
                    };
                    run.fail(FailureDetail {
                        state: PipelineState::Verify,
                        kind,
                        message,
                        issues: report.issues(),
                    });
                    Signal::VerifyRejected
                };
                run.verification = Some(report);
                (signal, summary)
            }
            outcome => (run.interrupted(PipelineState::Verify, outcome), json!({})),
        }
    }

    /// Apply `signal` and record the edge
    fn transition(
        &self,
        ctx: &mut RunContext,
        from: PipelineState,
        signal: Signal,
        summary: Value,
        run: &mut RunState,
    ) -> PipelineState {
        let to = match next_state(from, signal) {
            Some(to) => to,
            None => {
                error!(%from, %signal, "No transition for signal");
                run.fail(FailureDetail {
                    state: from,
                    kind: "invalid_transition".to_string(),
                    message: format!("no transition from {} on {}", from, signal),
                    issues: Vec::new(),
                });
                PipelineState::Failed
            }
        };

        info!(%from, %to, %signal, "Transition");
        ctx.push_audit(|seq| {
            AuditEvent::new(
                seq,
                AuditKind::Transition,
                AGENT,
                json!({
                    "from": from,
                    "to": to,
                    "signal": signal,
                    "counts": summary,
                }),
            )
            .with_stage(from.as_str())
        });
        to
    }

    fn complete_run(&self, ctx: &mut RunContext, state: PipelineState, run: RunState) -> PipelineResult {
        let success = state == PipelineState::Success;

        if success {
            info!(claims = run.claims.len(), "Pipeline completed successfully");
            ctx.record_audit(
                AuditKind::RunCompleted,
                AGENT,
                json!({ "claims": run.claims.len(), "evidence": run.evidence.len() }),
            );
        } else {
            let (kind, message) = run
                .failure
                .as_ref()
                .map(|f| (f.kind.clone(), f.message.clone()))
                .unwrap_or_else(|| ("unknown".to_string(), "run failed".to_string()));
            warn!(%kind, %message, "Pipeline failed");
            // no further work on a failed run; an earlier stop reason is kept
            ctx.request_stop(format!("run failed: {}", kind));
            ctx.push_audit(|seq| {
                AuditEvent::new(seq, AuditKind::RunFailed, AGENT, json!({ "kind": kind })).with_error(message)
            });
        }

        // a failed run hands back no records
        let (claims, evidence) = if success {
            (run.claims, run.evidence)
        } else {
            (Vec::new(), Vec::new())
        };

        PipelineResult {
            run_id: ctx.run_id.clone(),
            success,
            final_state: state,
            claims,
            evidence,
            canonical_text: run.canonical.map(|c| c.as_str().to_string()),
            canonical_policy_version: ctx.canonical_policy_version().to_string(),
            gate: run.gate,
            verification: run.verification,
            failure: run.failure,
            audit_events: ctx.audit_events().to_vec(),
            gate_decisions: ctx.gate_decisions().to_vec(),
            budget: ctx.budget_snapshot(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("gate", &self.gate)
            .field("verification_setting", &self.verification_setting)
            .field("policy_version", &self.policy_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionStrategy;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(&EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_two_sentences_succeed() {
        let mut ctx = RunContext::default();
        let result = orchestrator()
            .run(&mut ctx, PipelineRequest::new("قال ابن خلدون. العمران ضروري.", "doc1"))
            .await;

        assert!(result.success, "{:?}", result.failure);
        assert_eq!(result.final_state, PipelineState::Success);
        assert_eq!(result.claims.len(), 2);
        assert_eq!(result.evidence.len(), 2);
        assert!(result.failure.is_none());
        assert_eq!(result.gate_decisions.len(), 1);
        assert!(result.verification.unwrap().all_passed);
    }

    #[tokio::test]
    async fn test_empty_input_fails_in_extract() {
        let mut ctx = RunContext::default();
        let result = orchestrator().run(&mut ctx, PipelineRequest::new("", "doc1")).await;

        assert!(!result.success);
        assert_eq!(result.final_state, PipelineState::Failed);
        let failure = result.failure.unwrap();
        assert_eq!(failure.state, PipelineState::Extract);
        assert_eq!(failure.kind, "empty_input");
        assert!(result.gate.is_none());
    }

    #[tokio::test]
    async fn test_every_edge_is_audited() {
        let mut ctx = RunContext::default();
        let result = orchestrator().run(&mut ctx, PipelineRequest::new("جملة واحدة.", "doc1")).await;

        let transitions: Vec<_> = result
            .audit_events
            .iter()
            .filter(|e| e.event == AuditKind::Transition)
            .map(|e| (e.summary["from"].clone(), e.summary["to"].clone()))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (json!("extract"), json!("quality_gate")),
                (json!("quality_gate"), json!("verify")),
                (json!("verify"), json!("success")),
            ]
        );
        assert_eq!(result.audit_events.first().unwrap().event, AuditKind::RunStarted);
        assert_eq!(result.audit_events.last().unwrap().event, AuditKind::RunCompleted);
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let mut ctx = RunContext::default();
        ctx.request_stop("operator");
        let result = orchestrator().run(&mut ctx, PipelineRequest::new("نص.", "doc1")).await;

        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, "stopped");
        assert!(failure.message.contains("operator"));
        assert_eq!(result.final_state, PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_failed_run_sets_stop_flag() {
        let orchestrator = orchestrator();

        let mut ok = RunContext::default();
        orchestrator.run(&mut ok, PipelineRequest::new("جملة.", "doc1")).await;
        assert!(!ok.is_stopped());

        let mut failed = RunContext::default();
        orchestrator.run(&mut failed, PipelineRequest::new("", "doc1")).await;
        assert!(failed.is_stopped());
        assert_eq!(failed.stop_reason().as_deref(), Some("run failed: empty_input"));

        // a second run on the same context does no work
        let again = orchestrator.run(&mut failed, PipelineRequest::new("جملة.", "doc1")).await;
        assert_eq!(again.failure.unwrap().kind, "stopped");
    }

    #[tokio::test]
    async fn test_operator_stop_reason_is_kept() {
        let mut ctx = RunContext::default();
        ctx.stop_handle().request_stop("operator");
        orchestrator().run(&mut ctx, PipelineRequest::new("نص.", "doc1")).await;
        assert_eq!(ctx.stop_reason().as_deref(), Some("operator"));
    }

    #[test]
    fn test_model_quotes_without_provider_is_config_error() {
        let mut config = EngineConfig::default();
        config.extraction.strategy = ExtractionStrategy::ModelQuotes;
        assert!(Orchestrator::new(&config).is_err());
    }
}

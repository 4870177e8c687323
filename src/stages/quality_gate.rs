//! Quality gate: structural checks on extracted records.
//!
//! Gate rule:
//! - Every claim has at least one evidence id and non-empty text
//! - Every evidence item has at least one span and confidence > 0
//! - Every span has `char_end > char_start >= 0` and non-empty text
//!
//! `passed` requires both `score >= threshold` and zero issues, so a single
//! hard issue fails the gate at any score. Records that pass are converted
//! to validated types here, once.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{Stage, StageCard, StageProduct};
use crate::domain::RunContext;
use crate::error::CoreResult;
use crate::evidence::{Claim, ClaimRecord, Evidence, EvidenceRecord};

/// Gate id used in gate decisions
pub const GATE_ID: &str = "quality_gate";

/// Gate evaluation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub passed: bool,

    /// passed_checks / total_checks (0 when nothing was checked)
    pub score: f64,

    /// One entry per failed check
    pub issues: Vec<String>,

    pub total_checks: usize,
    pub passed_checks: usize,
    pub threshold: f64,
}

impl GateReport {
    /// Summary message
    pub fn message(&self) -> String {
        if self.passed {
            format!("Gate passed with score {:.3}", self.score)
        } else {
            format!(
                "Gate failed with {} issue(s), score {:.3} (threshold {})",
                self.issues.len(),
                self.score,
                self.threshold
            )
        }
    }
}

struct Tally {
    total: usize,
    passed: usize,
    issues: Vec<String>,
}

impl Tally {
    fn check(&mut self, ok: bool, issue: impl FnOnce() -> String) -> bool {
        self.total += 1;
        if ok {
            self.passed += 1;
        } else {
            self.issues.push(issue());
        }
        ok
    }
}

/// Evaluate claims and evidence records against the gate rule
pub fn evaluate(claims: &[ClaimRecord], evidence: &[EvidenceRecord], pass_threshold: f64) -> GateReport {
    let mut tally = Tally {
        total: 0,
        passed: 0,
        issues: Vec::new(),
    };

    for (i, claim) in claims.iter().enumerate() {
        tally.check(!claim.evidence_ids.is_empty(), || format!("claim_{}: no evidence_ids", i));
        tally.check(!claim.text.trim().is_empty(), || format!("claim_{}: empty text", i));
    }

    for (j, ev) in evidence.iter().enumerate() {
        if tally.check(!ev.spans.is_empty(), || format!("evidence_{}: no spans", j)) {
            for (k, span) in ev.spans.iter().enumerate() {
                tally.check(span.has_valid_offsets(), || {
                    format!(
                        "evidence_{}_span_{}: invalid offsets ({},{})",
                        j, k, span.char_start, span.char_end
                    )
                });
                tally.check(!span.text.trim().is_empty(), || {
                    format!("evidence_{}_span_{}: empty canonical text", j, k)
                });
            }
        }
        tally.check(ev.confidence > 0.0, || format!("evidence_{}: zero confidence", j));
    }

    let score = if tally.total > 0 {
        tally.passed as f64 / tally.total as f64
    } else {
        0.0
    };

    GateReport {
        passed: score >= pass_threshold && tally.issues.is_empty(),
        score,
        issues: tally.issues,
        total_checks: tally.total,
        passed_checks: tally.passed,
        threshold: pass_threshold,
    }
}

/// Input of the gate stage
#[derive(Debug, Clone, Default)]
pub struct GateInput {
    pub claims: Vec<ClaimRecord>,
    pub evidence: Vec<EvidenceRecord>,
}

/// Gate verdict plus, when it passed, the validated records
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub report: GateReport,
    pub claims: Vec<Claim>,
    pub evidence: Vec<Evidence>,
}

/// Convert records to validated types, collecting every failure
fn admit(input: GateInput, report: &mut GateReport) -> (Vec<Claim>, Vec<Evidence>) {
    let mut claims = Vec::with_capacity(input.claims.len());
    let mut evidence = Vec::with_capacity(input.evidence.len());

    for (i, record) in input.claims.into_iter().enumerate() {
        match Claim::try_from(record) {
            Ok(claim) => claims.push(claim),
            Err(err) => report.issues.push(format!("claim_{}: {}", i, err)),
        }
    }
    for (j, record) in input.evidence.into_iter().enumerate() {
        match Evidence::try_from(record) {
            Ok(ev) => evidence.push(ev),
            Err(err) => report.issues.push(format!("evidence_{}: {}", j, err)),
        }
    }

    if !report.issues.is_empty() {
        report.passed = false;
        return (Vec::new(), Vec::new());
    }
    (claims, evidence)
}

/// The quality gate stage
#[derive(Debug, Clone)]
pub struct QualityGateStage {
    pass_threshold: f64,
}

impl Default for QualityGateStage {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl QualityGateStage {
    pub fn new(pass_threshold: f64) -> Self {
        Self { pass_threshold }
    }

    pub fn pass_threshold(&self) -> f64 {
        self.pass_threshold
    }
}

#[async_trait::async_trait]
impl Stage for QualityGateStage {
    type Input = GateInput;
    type Output = GateOutcome;

    fn card(&self) -> StageCard {
        StageCard {
            id: "quality_gate",
            name: "Quality Gate",
            version: "2.0.0",
            metered: false,
        }
    }

    async fn run(&self, ctx: &mut RunContext, input: GateInput) -> CoreResult<StageProduct<GateOutcome>> {
        let mut report = evaluate(&input.claims, &input.evidence, self.pass_threshold);

        let (claims, evidence) = if report.passed {
            admit(input, &mut report)
        } else {
            (Vec::new(), Vec::new())
        };

        ctx.record_gate(
            GATE_ID,
            report.passed,
            json!({
                "score": report.score,
                "threshold": report.threshold,
                "issues": report.issues.len(),
                "total_checks": report.total_checks,
            }),
        );

        if report.passed {
            info!(score = report.score, "Quality gate passed");
        } else {
            warn!(score = report.score, issues = report.issues.len(), "Quality gate rejected");
        }

        let summary = json!({
            "passed": report.passed,
            "issues": report.issues.len(),
            "claims": claims.len(),
            "evidence": evidence.len(),
        });
        Ok(StageProduct::new(
            GateOutcome {
                report,
                claims,
                evidence,
            },
            summary,
        ))
    }
}

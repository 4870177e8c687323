//! Verification: read-only audit of claim → evidence → span integrity.
//!
//! Three checks per claim, none of which normalizes anything:
//! 1. Linkage: every evidence id resolves
//! 2. Offsets: every span has `char_end > char_start >= 0`
//! 3. Text match: the span text equals the canonical slice exactly
//!    (only in [`VerificationMode::AgainstCanonical`])
//!
//! Verification never short-circuits: every claim gets a result.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{check_stop, Stage, StageCard, StageProduct};
use crate::canonical::CanonicalText;
use crate::domain::RunContext;
use crate::error::{CoreError, CoreResult};
use crate::evidence::{Claim, Evidence};

const CLAIM_PREVIEW_CHARS: usize = 50;

/// What spans are verified against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode<'a> {
    /// Linkage and offsets only; span text is not compared
    OffsetsOnly,
    /// Linkage, offsets, and exact text against this canonical text
    AgainstCanonical(&'a str),
}

/// Result for one claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim_index: usize,
    pub claim_id: String,
    /// First 50 characters of the claim text
    pub claim_text: String,
    pub issues: Vec<String>,
    pub passed: bool,

    #[serde(skip)]
    errors: Vec<CoreError>,
}

impl ClaimCheck {
    /// Typed form of each issue, in the same order
    pub fn errors(&self) -> &[CoreError] {
        &self.errors
    }

    fn fail(&mut self, issue: String, error: CoreError) {
        self.issues.push(issue);
        self.errors.push(error);
        self.passed = false;
    }
}

/// Full verification report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub all_passed: bool,
    pub total_claims: usize,
    pub verified_count: usize,
    /// One entry per input claim, in input order
    pub results: Vec<ClaimCheck>,
}

impl VerificationReport {
    /// First typed failure across all claims
    pub fn first_error(&self) -> Option<&CoreError> {
        self.results.iter().flat_map(|r| r.errors.iter()).next()
    }

    /// Every issue, prefixed with its claim index
    pub fn issues(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.issues.iter().map(move |issue| format!("claim_{}: {}", r.claim_index, issue)))
            .collect()
    }
}

fn check_claim(
    index: usize,
    claim: &Claim,
    evidence_by_id: &HashMap<String, Evidence>,
    canonical: Option<&[char]>,
) -> ClaimCheck {
    let mut check = ClaimCheck {
        claim_index: index,
        claim_id: claim.claim_id().to_string(),
        claim_text: claim.text().chars().take(CLAIM_PREVIEW_CHARS).collect(),
        issues: Vec::new(),
        passed: true,
        errors: Vec::new(),
    };

    for evidence_id in claim.evidence_ids() {
        if !evidence_by_id.contains_key(evidence_id) {
            check.fail(
                format!("evidence {} not found", evidence_id),
                CoreError::StructuralInvalidity(format!("evidence {} not found", evidence_id)),
            );
        }
    }

    for evidence_id in claim.evidence_ids() {
        let Some(evidence) = evidence_by_id.get(evidence_id) else {
            continue;
        };

        for span in evidence.spans() {
            let (start, end) = (span.char_start(), span.char_end());
            if end <= start {
                check.fail(
                    format!("invalid offsets [{}:{}]", start, end),
                    CoreError::StructuralInvalidity(format!("invalid offsets [{}:{}]", start, end)),
                );
                continue;
            }

            let Some(canonical) = canonical else {
                continue;
            };
            let found: String = if end <= canonical.len() {
                canonical[start..end].iter().collect()
            } else {
                canonical[start.min(canonical.len())..].iter().collect()
            };
            if found != span.text() {
                check.fail(
                    format!("text mismatch at [{}:{}]", start, end),
                    CoreError::ContentMismatch {
                        start,
                        end,
                        expected: span.text().to_string(),
                        found,
                    },
                );
            }
        }
    }

    check
}

/// Verify every claim against the evidence map
pub fn verify(
    claims: &[Claim],
    evidence_by_id: &HashMap<String, Evidence>,
    mode: VerificationMode<'_>,
) -> VerificationReport {
    let canonical: Option<Vec<char>> = match mode {
        VerificationMode::OffsetsOnly => None,
        VerificationMode::AgainstCanonical(text) => Some(text.chars().collect()),
    };

    let results: Vec<ClaimCheck> = claims
        .iter()
        .enumerate()
        .map(|(i, claim)| check_claim(i, claim, evidence_by_id, canonical.as_deref()))
        .collect();

    let verified_count = results.iter().filter(|r| r.passed).count();
    VerificationReport {
        all_passed: verified_count == results.len(),
        total_claims: results.len(),
        verified_count,
        results,
    }
}

/// Input of the verification stage
#[derive(Debug, Clone)]
pub struct VerificationInput {
    pub claims: Vec<Claim>,
    pub evidence: Vec<Evidence>,
    /// Canonical text to compare against; `None` checks offsets only
    pub canonical: Option<Arc<CanonicalText>>,
}

/// The verification stage
#[derive(Debug, Clone, Default)]
pub struct VerificationStage;

impl VerificationStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Stage for VerificationStage {
    type Input = VerificationInput;
    type Output = VerificationReport;

    fn card(&self) -> StageCard {
        StageCard {
            id: "verify",
            name: "Verification",
            version: "2.0.0",
            metered: false,
        }
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        input: VerificationInput,
    ) -> CoreResult<StageProduct<VerificationReport>> {
        if input.claims.is_empty() {
            return Err(CoreError::EmptyInput("no claims to verify".to_string()));
        }
        check_stop(ctx)?;

        let evidence_by_id: HashMap<String, Evidence> = input
            .evidence
            .into_iter()
            .map(|ev| (ev.evidence_id().to_string(), ev))
            .collect();

        let mode = match input.canonical.as_deref() {
            Some(canonical) => VerificationMode::AgainstCanonical(canonical.as_str()),
            None => VerificationMode::OffsetsOnly,
        };

        let report = verify(&input.claims, &evidence_by_id, mode);

        if report.all_passed {
            info!(verified = report.verified_count, "All claims verified");
        } else {
            warn!(
                verified = report.verified_count,
                total = report.total_claims,
                "Verification found failing claims"
            );
        }

        let summary = json!({
            "total": report.total_claims,
            "verified": report.verified_count,
            "all_passed": report.all_passed,
            "mode": if input.canonical.is_some() { "against_canonical" } else { "offsets_only" },
        });
        Ok(StageProduct::new(report, summary))
    }
}

//! Validated span, evidence and claim types.
//!
//! Each type checks its invariants at construction and exposes read-only
//! accessors afterwards. Deserialization goes through the wire records in
//! [`super::records`], so a replayed record is validated exactly once at
//! ingress.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::records::{new_claim_id, new_evidence_id, ClaimRecord, EvidenceRecord, TextSpanRecord};
use crate::canonical::ResolvedSpan;
use crate::error::{CoreError, CoreResult};

/// A non-empty canonical span of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TextSpanRecord", into = "TextSpanRecord")]
pub struct TextSpan {
    doc_id: String,
    char_start: usize,
    char_end: usize,
    text: String,
    context: String,
}

impl TextSpan {
    /// Create a span; `text` must have exactly `char_end - char_start` characters
    pub fn new(
        doc_id: impl Into<String>,
        char_start: usize,
        char_end: usize,
        text: impl Into<String>,
        context: impl Into<String>,
    ) -> CoreResult<Self> {
        let text = text.into();

        if char_end <= char_start {
            return Err(CoreError::StructuralInvalidity(format!(
                "invalid offsets ({},{})",
                char_start, char_end
            )));
        }
        if text.trim().is_empty() {
            return Err(CoreError::StructuralInvalidity(format!(
                "empty canonical text at [{}:{}]",
                char_start, char_end
            )));
        }
        let len = text.chars().count();
        if len != char_end - char_start {
            return Err(CoreError::StructuralInvalidity(format!(
                "span text has {} chars but offsets [{}:{}] cover {}",
                len,
                char_start,
                char_end,
                char_end - char_start
            )));
        }

        Ok(Self {
            doc_id: doc_id.into(),
            char_start,
            char_end,
            text,
            context: context.into(),
        })
    }

    /// Span over a resolver result, with the raw text as context
    pub fn from_resolved(resolved: &ResolvedSpan) -> CoreResult<Self> {
        Self::new(
            resolved.source_id.clone(),
            resolved.canonical_start,
            resolved.canonical_end,
            resolved.text_canonical.clone(),
            resolved.text_raw.clone(),
        )
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn char_start(&self) -> usize {
        self.char_start
    }

    pub fn char_end(&self) -> usize {
        self.char_end
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl TryFrom<TextSpanRecord> for TextSpan {
    type Error = CoreError;

    fn try_from(record: TextSpanRecord) -> CoreResult<Self> {
        if !record.has_valid_offsets() {
            return Err(CoreError::StructuralInvalidity(format!(
                "invalid offsets ({},{})",
                record.char_start, record.char_end
            )));
        }
        Self::new(
            record.doc_id,
            record.char_start as usize,
            record.char_end as usize,
            record.text,
            record.context,
        )
    }
}

impl From<TextSpan> for TextSpanRecord {
    fn from(span: TextSpan) -> Self {
        Self {
            doc_id: span.doc_id,
            char_start: span.char_start as i64,
            char_end: span.char_end as i64,
            text: span.text,
            context: span.context,
        }
    }
}

fn check_confidence(confidence: f64, subject: &str) -> CoreResult<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(CoreError::StructuralInvalidity(format!(
            "{}: confidence {} outside [0, 1]",
            subject, confidence
        )));
    }
    Ok(())
}

/// One or more spans supporting a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EvidenceRecord", into = "EvidenceRecord")]
pub struct Evidence {
    evidence_id: String,
    spans: Vec<TextSpan>,
    confidence: f64,
    source_ref: String,
    created_at: DateTime<Utc>,
}

impl Evidence {
    /// Create evidence with a fresh id
    pub fn new(
        spans: Vec<TextSpan>,
        confidence: f64,
        source_ref: impl Into<String>,
    ) -> CoreResult<Self> {
        Self::build(new_evidence_id(), spans, confidence, source_ref.into(), Utc::now())
    }

    fn build(
        evidence_id: String,
        spans: Vec<TextSpan>,
        confidence: f64,
        source_ref: String,
        created_at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        if spans.is_empty() {
            return Err(CoreError::StructuralInvalidity(format!(
                "evidence {} has no spans",
                evidence_id
            )));
        }
        check_confidence(confidence, &evidence_id)?;

        Ok(Self {
            evidence_id,
            spans,
            confidence,
            source_ref,
            created_at,
        })
    }

    pub fn evidence_id(&self) -> &str {
        &self.evidence_id
    }

    pub fn spans(&self) -> &[TextSpan] {
        &self.spans
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl TryFrom<EvidenceRecord> for Evidence {
    type Error = CoreError;

    fn try_from(record: EvidenceRecord) -> CoreResult<Self> {
        let spans = record
            .spans
            .into_iter()
            .map(TextSpan::try_from)
            .collect::<CoreResult<Vec<_>>>()?;
        Self::build(
            record.evidence_id,
            spans,
            record.confidence,
            record.source_ref,
            record.created_at,
        )
    }
}

impl From<Evidence> for EvidenceRecord {
    fn from(evidence: Evidence) -> Self {
        Self {
            evidence_id: evidence.evidence_id,
            spans: evidence.spans.into_iter().map(TextSpanRecord::from).collect(),
            confidence: evidence.confidence,
            source_ref: evidence.source_ref,
            created_at: evidence.created_at,
        }
    }
}

/// An assertion backed by at least one evidence id
///
/// Claims are never edited in place: [`Claim::revise`] and
/// [`Claim::approve`] produce new claims that point back at the original
/// through `supersedes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClaimRecord", into = "ClaimRecord")]
pub struct Claim {
    claim_id: String,
    text: String,
    evidence_ids: Vec<String>,
    confidence: f64,
    scope: BTreeMap<String, serde_json::Value>,
    counter_evidence_ids: Vec<String>,
    approved: bool,
    supersedes: Option<String>,
}

impl Claim {
    /// Create an unapproved claim with a fresh id
    pub fn new(
        text: impl Into<String>,
        evidence_ids: Vec<String>,
        confidence: f64,
    ) -> CoreResult<Self> {
        Self::try_from(ClaimRecord::new(text, evidence_ids, confidence))
    }

    /// Attach scope metadata (before the claim is handed on)
    pub fn with_scope(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.scope.insert(key.into(), value);
        self
    }

    /// Attach counter-evidence ids (before the claim is handed on)
    pub fn with_counter_evidence(mut self, ids: Vec<String>) -> Self {
        self.counter_evidence_ids = ids;
        self
    }

    /// Replacement claim with new text and evidence, superseding this one
    pub fn revise(&self, text: impl Into<String>, evidence_ids: Vec<String>) -> CoreResult<Self> {
        let mut record = ClaimRecord::new(text, evidence_ids, self.confidence);
        record.scope = self.scope.clone();
        record.counter_evidence_ids = self.counter_evidence_ids.clone();
        record.supersedes = Some(self.claim_id.clone());
        Self::try_from(record)
    }

    /// Approved copy of this claim, superseding it
    pub fn approve(&self) -> Self {
        Self {
            claim_id: new_claim_id(),
            approved: true,
            supersedes: Some(self.claim_id.clone()),
            ..self.clone()
        }
    }

    pub fn claim_id(&self) -> &str {
        &self.claim_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn evidence_ids(&self) -> &[String] {
        &self.evidence_ids
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn scope(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.scope
    }

    pub fn counter_evidence_ids(&self) -> &[String] {
        &self.counter_evidence_ids
    }

    pub fn approved(&self) -> bool {
        self.approved
    }

    pub fn supersedes(&self) -> Option<&str> {
        self.supersedes.as_deref()
    }
}

impl TryFrom<ClaimRecord> for Claim {
    type Error = CoreError;

    fn try_from(record: ClaimRecord) -> CoreResult<Self> {
        if record.evidence_ids.is_empty() {
            return Err(CoreError::StructuralInvalidity(format!(
                "claim {} has no evidence_ids",
                record.claim_id
            )));
        }
        if record.text.trim().is_empty() {
            return Err(CoreError::StructuralInvalidity(format!(
                "claim {} has empty text",
                record.claim_id
            )));
        }
        check_confidence(record.confidence, &record.claim_id)?;

        Ok(Self {
            claim_id: record.claim_id,
            text: record.text,
            evidence_ids: record.evidence_ids,
            confidence: record.confidence,
            scope: record.scope,
            counter_evidence_ids: record.counter_evidence_ids,
            approved: record.approved,
            supersedes: record.supersedes,
        })
    }
}

impl From<Claim> for ClaimRecord {
    fn from(claim: Claim) -> Self {
        Self {
            claim_id: claim.claim_id,
            text: claim.text,
            evidence_ids: claim.evidence_ids,
            confidence: claim.confidence,
            scope: claim.scope,
            counter_evidence_ids: claim.counter_evidence_ids,
            approved: claim.approved,
            supersedes: claim.supersedes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> TextSpan {
        TextSpan::new("d1", 0, 3, "قال", "قَالَ").unwrap()
    }

    #[test]
    fn test_span_offsets_enforced() {
        assert!(TextSpan::new("d1", 3, 3, "", "").is_err());
        assert!(TextSpan::new("d1", 0, 5, "قال", "").is_err());
        assert!(TextSpan::new("d1", 0, 3, "   ", "").is_err());
        assert_eq!(span().char_end(), 3);
    }

    #[test]
    fn test_negative_record_offsets_rejected() {
        let record = TextSpanRecord {
            doc_id: "d1".to_string(),
            char_start: -1,
            char_end: 0,
            text: "x".to_string(),
            context: String::new(),
        };
        let err = TextSpan::try_from(record).unwrap_err();
        assert!(err.to_string().contains("invalid offsets (-1,0)"));
    }

    #[test]
    fn test_evidence_requires_spans() {
        let result = Evidence::new(vec![], 0.8, "s1");
        assert!(matches!(result, Err(CoreError::StructuralInvalidity(_))));
    }

    #[test]
    fn test_evidence_confidence_range() {
        assert!(Evidence::new(vec![span()], 1.5, "s1").is_err());
        assert!(Evidence::new(vec![span()], f64::NAN, "s1").is_err());
        let ev = Evidence::new(vec![span()], 0.8, "s1").unwrap();
        assert!(ev.evidence_id().starts_with("ev_"));
    }

    #[test]
    fn test_claim_requires_evidence() {
        assert!(Claim::new("test", vec![], 0.9).is_err());
        let claim = Claim::new("test", vec!["ev1".to_string()], 0.9).unwrap();
        assert_eq!(claim.evidence_ids().len(), 1);
        assert!(!claim.approved());
    }

    #[test]
    fn test_claim_deserialization_validates() {
        let result: Result<Claim, _> =
            serde_json::from_str(r#"{"text": "x", "evidence_ids": [], "confidence": 0.5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_approve_creates_new_claim() {
        let claim = Claim::new("test", vec!["ev1".to_string()], 0.9).unwrap();
        let approved = claim.approve();
        assert!(approved.approved());
        assert_ne!(approved.claim_id(), claim.claim_id());
        assert_eq!(approved.supersedes(), Some(claim.claim_id()));
        assert!(!claim.approved());
    }

    #[test]
    fn test_revise_keeps_scope() {
        let claim = Claim::new("old", vec!["ev1".to_string()], 0.9)
            .unwrap()
            .with_scope("section", serde_json::json!("intro"));
        let revised = claim.revise("new", vec!["ev2".to_string()]).unwrap();
        assert_eq!(revised.text(), "new");
        assert_eq!(revised.scope().get("section"), Some(&serde_json::json!("intro")));
        assert_eq!(revised.supersedes(), Some(claim.claim_id()));
        assert!(claim.revise("new", vec![]).is_err());
    }

    #[test]
    fn test_evidence_serialization_field_names() {
        let ev = Evidence::new(vec![span()], 0.7, "s1#sent_0").unwrap();
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("evidence_id").is_some());
        assert_eq!(json["spans"][0]["char_start"], 0);
        assert_eq!(json["spans"][0]["doc_id"], "d1");

        let parsed: Evidence = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ev);
    }
}

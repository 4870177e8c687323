//! Wire records for spans, evidence and claims.
//!
//! These are the shapes that cross the crate boundary: what extraction
//! emits, what the quality gate inspects, and what gets serialized for audit
//! and replay. Types are deliberately permissive (signed offsets, possibly
//! empty lists) so that malformed input can be represented and rejected with
//! a precise issue instead of failing to parse. Validated counterparts live
//! in [`super::types`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fresh evidence id, `ev_` + 12 hex chars
pub fn new_evidence_id() -> String {
    format!("ev_{}", &Uuid::new_v4().simple().to_string()[..12])
}

/// Fresh claim id, `clm_` + 12 hex chars
pub fn new_claim_id() -> String {
    format!("clm_{}", &Uuid::new_v4().simple().to_string()[..12])
}

/// A span as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpanRecord {
    /// Owning document (source id)
    pub doc_id: String,
    /// Canonical start offset, in characters
    pub char_start: i64,
    /// Canonical end offset (exclusive), in characters
    pub char_end: i64,
    /// Canonical text of the span
    pub text: String,
    /// Raw text the span was resolved from
    #[serde(default)]
    pub context: String,
}

impl TextSpanRecord {
    /// `char_end > char_start >= 0`
    pub fn has_valid_offsets(&self) -> bool {
        self.char_start >= 0 && self.char_end > self.char_start
    }
}

/// Evidence as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    #[serde(default = "new_evidence_id")]
    pub evidence_id: String,
    #[serde(default)]
    pub spans: Vec<TextSpanRecord>,
    pub confidence: f64,
    #[serde(default)]
    pub source_ref: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl EvidenceRecord {
    /// New record with a fresh id and the current timestamp
    pub fn new(spans: Vec<TextSpanRecord>, confidence: f64, source_ref: impl Into<String>) -> Self {
        Self {
            evidence_id: new_evidence_id(),
            spans,
            confidence,
            source_ref: source_ref.into(),
            created_at: Utc::now(),
        }
    }
}

/// A claim as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    #[serde(default = "new_claim_id")]
    pub claim_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub scope: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub counter_evidence_ids: Vec<String>,
    #[serde(default)]
    pub approved: bool,
    /// Claim this one replaces, if it is a correction or an approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl ClaimRecord {
    /// New unapproved record with a fresh id
    pub fn new(text: impl Into<String>, evidence_ids: Vec<String>, confidence: f64) -> Self {
        Self {
            claim_id: new_claim_id(),
            text: text.into(),
            evidence_ids,
            confidence,
            scope: BTreeMap::new(),
            counter_evidence_ids: Vec::new(),
            approved: false,
            supersedes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_prefixes() {
        let ev = new_evidence_id();
        let clm = new_claim_id();
        assert!(ev.starts_with("ev_"));
        assert_eq!(ev.len(), 15);
        assert!(clm.starts_with("clm_"));
        assert_ne!(new_claim_id(), clm);
    }

    #[test]
    fn test_claim_record_defaults_from_json() {
        let record: ClaimRecord = serde_json::from_str(r#"{"text": "claim"}"#).unwrap();
        assert!(record.claim_id.starts_with("clm_"));
        assert!(record.evidence_ids.is_empty());
        assert!(!record.approved);
        assert!(record.supersedes.is_none());
    }

    #[test]
    fn test_negative_offsets_are_representable() {
        let span: TextSpanRecord = serde_json::from_str(
            r#"{"doc_id": "d1", "char_start": -1, "char_end": 0, "text": "test"}"#,
        )
        .unwrap();
        assert_eq!(span.char_start, -1);
        assert!(!span.has_valid_offsets());
        assert_eq!(span.context, "");
    }
}

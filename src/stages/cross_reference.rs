//! Term-overlap cross-referencing between two claim sets.
//!
//! Claims are canonicalized, split on whitespace, and stripped of stop words
//! and terms of two characters or fewer. Pairs whose overlap reaches 0.3 are
//! reported; above 0.5 the pair counts as corroboration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_stop, Stage, StageCard, StageProduct};
use crate::canonical::{canonicalize, CanonicalPolicy};
use crate::domain::RunContext;
use crate::error::{CoreError, CoreResult};
use crate::evidence::Claim;

const OVERLAP_THRESHOLD: f64 = 0.3;
const CORROBORATION_THRESHOLD: f64 = 0.5;

const STOP_WORDS: &[&str] = &[
    "في", "من", "الى", "على", "عن", "ان", "لا", "ما", "هو", "هي", "كل", "بل", "او", "اذا", "لم", "قد", "بد",
    "له", "بها",
];

/// How two claims relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Corroboration,
    PartialOverlap,
}

/// One related pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossRefResult {
    /// Index into the first claim set
    pub claim_a: usize,
    /// Index into the second claim set
    pub claim_b: usize,
    pub relation: Relation,
    /// Rounded to 3 decimals
    pub overlap_score: f64,
    pub shared_terms: Vec<String>,
}

/// Distinct content terms of `text` after canonicalization
pub fn extract_terms(text: &str, policy: &CanonicalPolicy) -> BTreeSet<String> {
    canonicalize(text, policy)
        .split_whitespace()
        .filter(|word| word.chars().count() > 2 && !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Compare every claim text in `a` with every claim text in `b`
pub fn cross_reference<A, B>(a: &[A], b: &[B], policy: &CanonicalPolicy) -> CoreResult<Vec<CrossRefResult>>
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    if a.is_empty() || b.is_empty() {
        return Err(CoreError::EmptyInput(
            "cross-referencing needs claims from two sources".to_string(),
        ));
    }

    let terms_b: Vec<BTreeSet<String>> = b.iter().map(|t| extract_terms(t.as_ref(), policy)).collect();
    let mut results = Vec::new();

    for (i, text_a) in a.iter().enumerate() {
        let terms_a = extract_terms(text_a.as_ref(), policy);
        if terms_a.is_empty() {
            continue;
        }

        for (j, terms_b) in terms_b.iter().enumerate() {
            if terms_b.is_empty() {
                continue;
            }
            let shared: Vec<String> = terms_a.intersection(terms_b).cloned().collect();
            let overlap = shared.len() as f64 / terms_a.len().max(terms_b.len()) as f64;
            if overlap < OVERLAP_THRESHOLD {
                continue;
            }

            results.push(CrossRefResult {
                claim_a: i,
                claim_b: j,
                relation: if overlap > CORROBORATION_THRESHOLD {
                    Relation::Corroboration
                } else {
                    Relation::PartialOverlap
                },
                overlap_score: (overlap * 1000.0).round() / 1000.0,
                shared_terms: shared,
            });
        }
    }

    Ok(results)
}

/// Input of the cross-reference stage
#[derive(Debug, Clone)]
pub struct CrossRefInput {
    pub claims_a: Vec<Claim>,
    pub claims_b: Vec<Claim>,
}

/// The cross-reference stage
#[derive(Debug, Clone, Default)]
pub struct CrossReferenceStage {
    policy: CanonicalPolicy,
}

impl CrossReferenceStage {
    pub fn new(policy: CanonicalPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Stage for CrossReferenceStage {
    type Input = CrossRefInput;
    type Output = Vec<CrossRefResult>;

    fn card(&self) -> StageCard {
        StageCard {
            id: "cross_reference",
            name: "Cross Reference",
            version: "2.0.0",
            metered: false,
        }
    }

    async fn run(&self, ctx: &mut RunContext, input: CrossRefInput) -> CoreResult<StageProduct<Vec<CrossRefResult>>> {
        check_stop(ctx)?;

        let texts_a: Vec<&str> = input.claims_a.iter().map(Claim::text).collect();
        let texts_b: Vec<&str> = input.claims_b.iter().map(Claim::text).collect();
        let results = cross_reference(&texts_a, &texts_b, &self.policy)?;

        let summary = json!({
            "pairs_checked": texts_a.len() * texts_b.len(),
            "refs_found": results.len(),
        });
        Ok(StageProduct::new(results, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_terms_drops_stop_words_and_short_terms() {
        let terms = extract_terms("قال ابن خلدون في المقدمة إن العمران", &CanonicalPolicy::default());
        let terms: Vec<_> = terms.into_iter().collect();
        assert!(terms.contains(&"خلدون".to_string()));
        assert!(terms.contains(&"المقدمة".to_string()));
        assert!(terms.contains(&"العمران".to_string()));
        assert!(!terms.contains(&"في".to_string()));
        // "إن" canonicalizes to the stop word "ان"
        assert!(!terms.iter().any(|t| t == "ان"));
    }

    #[test]
    fn test_corroboration() {
        let policy = CanonicalPolicy::default();
        let a = ["العمران البشري ضروري للاجتماع"];
        let b = [
            "العمران البشري ضروري للاجتماع الانساني",
            "العمران يحتاج الملك والسلطان والجند",
            "نص مختلف تماما",
        ];

        let results = cross_reference(&a, &b, &policy).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].claim_b, 0);
        assert_eq!(results[0].relation, Relation::Corroboration);
        assert_eq!(results[0].overlap_score, 0.8);
    }

    #[test]
    fn test_partial_overlap_rounding() {
        let policy = CanonicalPolicy::default();
        let a = ["الدولة والعصبية والملك"];
        let b = ["الدولة العصبية الملك"];

        let results = cross_reference(&a, &b, &policy).unwrap();
        assert_eq!(results[0].relation, Relation::PartialOverlap);
        assert_eq!(results[0].overlap_score, 0.333);
        assert_eq!(results[0].shared_terms, vec!["الدولة".to_string()]);
    }

    #[test]
    fn test_empty_side_rejected() {
        let none: [&str; 0] = [];
        let result = cross_reference(&none, &["نص"], &CanonicalPolicy::default());
        assert!(matches!(result, Err(CoreError::EmptyInput(_))));
    }
}

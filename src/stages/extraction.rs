//! Extraction: raw text → claim and evidence records.
//!
//! Two strategies share the same output shape:
//! - **Sentences**: every sentence of the raw text becomes one claim backed
//!   by one evidence span.
//! - **Model quotes**: a metered provider proposes `{claim, quote}` pairs;
//!   each quote is located verbatim in the raw text. Quotes that cannot be
//!   located are dropped and audited, never given a guessed span.
//!
//! In both cases spans come from the span resolver, so the recorded text is
//! always the exact canonical slice.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{check_stop, Stage, StageCard, StageProduct};
use crate::adapters::{CompletionRequest, MeteredClient};
use crate::canonical::{find_quote, resolve_in, CanonicalPolicy, CanonicalText, MatchStatus, ResolvedSpan, SpanResolver};
use crate::config::{EngineConfig, ExtractionStrategy};
use crate::domain::{AuditKind, RunContext};
use crate::error::{CoreError, CoreResult};
use crate::evidence::{ClaimRecord, EvidenceRecord, TextSpanRecord};

const SENTENCE_SEPARATORS: &[char] = &['.', '۔', '؟', '!', '\n'];

const QUOTE_SYSTEM_PROMPT: &str = "You extract factual claims from a text. \
Answer with a JSON array only. Each element is an object with a \"claim\" \
field (the claim in your words) and a \"quote\" field copied character for \
character from the text. Never paraphrase a quote.";

/// Input of the extraction stage
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub raw_text: String,
    pub source_id: String,
}

impl ExtractionInput {
    pub fn new(raw_text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            source_id: source_id.into(),
        }
    }
}

/// Records emitted by extraction, with the canonical text they point into
#[derive(Debug, Clone)]
pub struct Extraction {
    pub source_id: String,
    pub canonical: Arc<CanonicalText>,
    pub claims: Vec<ClaimRecord>,
    pub evidence: Vec<EvidenceRecord>,
    /// Proposed quotes that did not occur verbatim
    pub unresolved_quotes: Vec<String>,
}

/// One sentence of a raw text, in character offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSegment {
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// A claim proposed by a provider, with its supporting quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteProposal {
    pub claim: String,
    pub quote: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Split `raw_text` into trimmed sentences
///
/// A sentence ends at `.`, `۔`, `؟`, `!`, a newline, or the end of the text.
/// Empty segments are skipped.
pub fn split_sentences(raw_text: &str) -> Vec<SentenceSegment> {
    let chars: Vec<char> = raw_text.chars().collect();
    let mut sentences = Vec::new();
    let mut current_start = 0;

    for i in 0..chars.len() {
        if !SENTENCE_SEPARATORS.contains(&chars[i]) && i + 1 != chars.len() {
            continue;
        }

        let segment = &chars[current_start..=i];
        let first = segment.iter().position(|c| !c.is_whitespace());
        let last = segment.iter().rposition(|c| !c.is_whitespace());

        if let (Some(first), Some(last)) = (first, last) {
            let start = current_start + first;
            let end = current_start + last + 1;
            sentences.push(SentenceSegment {
                index: sentences.len(),
                text: chars[start..end].iter().collect(),
                start,
                end,
            });
        }
        current_start = i + 1;
    }

    sentences
}

enum Strategy {
    Sentences,
    ModelQuotes {
        client: MeteredClient,
        model: String,
        max_tokens: u32,
        temperature: f32,
    },
}

/// The extraction stage
pub struct ExtractionStage {
    policy: CanonicalPolicy,
    confidence: f64,
    strategy: Strategy,
}

impl ExtractionStage {
    /// Sentence-level extraction
    pub fn sentences(policy: CanonicalPolicy) -> Self {
        Self {
            policy,
            confidence: 0.7,
            strategy: Strategy::Sentences,
        }
    }

    /// Provider-proposed quotes, using the client's default model
    pub fn model_quotes(policy: CanonicalPolicy, client: MeteredClient) -> Self {
        Self {
            policy,
            confidence: 0.7,
            strategy: Strategy::ModelQuotes {
                client,
                model: String::new(),
                max_tokens: 2000,
                temperature: 0.2,
            },
        }
    }

    /// Stage configured by `config`; the quote strategy needs a client
    pub fn from_config(config: &EngineConfig, client: Option<MeteredClient>) -> anyhow::Result<Self> {
        let extraction = &config.extraction;
        let strategy = match (extraction.strategy, client) {
            (ExtractionStrategy::Sentences, _) => Strategy::Sentences,
            (ExtractionStrategy::ModelQuotes, Some(client)) => Strategy::ModelQuotes {
                client: client.with_timeout(Duration::from_secs(extraction.timeout_seconds)),
                model: extraction.model.clone(),
                max_tokens: extraction.max_tokens,
                temperature: extraction.temperature,
            },
            (ExtractionStrategy::ModelQuotes, None) => {
                anyhow::bail!("model_quotes extraction requires a provider")
            }
        };

        Ok(Self {
            policy: config.policy.clone(),
            confidence: extraction.default_confidence,
            strategy,
        })
    }

    /// Confidence given to emitted claims and evidence
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Canonical form of `raw_text`; the resolver lives only for this run
    fn canonical(&self, raw_text: &str) -> Arc<CanonicalText> {
        SpanResolver::new(self.policy.clone()).canonical(raw_text)
    }

    fn records_for(
        &self,
        resolved: ResolvedSpan,
        source_ref: String,
        claim_text: String,
        confidence: f64,
    ) -> (ClaimRecord, EvidenceRecord) {
        let span = TextSpanRecord {
            doc_id: resolved.source_id,
            char_start: resolved.canonical_start as i64,
            char_end: resolved.canonical_end as i64,
            text: resolved.text_canonical,
            context: resolved.text_raw,
        };
        let evidence = EvidenceRecord::new(vec![span], confidence, source_ref);
        let claim = ClaimRecord::new(claim_text, vec![evidence.evidence_id.clone()], confidence);
        (claim, evidence)
    }

    fn extract_sentences(
        &self,
        ctx: &RunContext,
        input: &ExtractionInput,
        canonical: &CanonicalText,
    ) -> CoreResult<(Vec<ClaimRecord>, Vec<EvidenceRecord>)> {
        let mut claims = Vec::new();
        let mut evidence = Vec::new();

        for sentence in split_sentences(&input.raw_text) {
            check_stop(ctx)?;

            let resolved = resolve_in(
                &input.raw_text,
                canonical,
                &input.source_id,
                sentence.start,
                sentence.end,
            )?;
            let claim_text = resolved.text_canonical.clone();
            let source_ref = format!("{}#sent_{}", input.source_id, sentence.index);

            let (claim, ev) = self.records_for(resolved, source_ref, claim_text, self.confidence);
            claims.push(claim);
            evidence.push(ev);
        }

        Ok((claims, evidence))
    }
}

/// Parse the JSON array of proposals out of a provider answer
fn parse_proposals(text: &str, model: &str) -> CoreResult<Vec<QuoteProposal>> {
    let unparseable = |message: String| CoreError::Provider {
        model: model.to_string(),
        message,
    };

    let start = text.find('[').ok_or_else(|| unparseable("no JSON array in response".to_string()))?;
    let end = text.rfind(']').filter(|end| *end > start).ok_or_else(|| unparseable("unterminated JSON array in response".to_string()))?;

    serde_json::from_str(&text[start..=end])
        .map_err(|e| unparseable(format!("unparseable proposals: {}", e)))
}

#[async_trait::async_trait]
impl Stage for ExtractionStage {
    type Input = ExtractionInput;
    type Output = Extraction;

    fn card(&self) -> StageCard {
        StageCard {
            id: "extract",
            name: "Extraction",
            version: "2.0.0",
            metered: matches!(self.strategy, Strategy::ModelQuotes { .. }),
        }
    }

    async fn run(&self, ctx: &mut RunContext, input: ExtractionInput) -> CoreResult<StageProduct<Extraction>> {
        if input.raw_text.trim().is_empty() {
            return Err(CoreError::EmptyInput("raw text is empty".to_string()));
        }

        let canonical = self.canonical(&input.raw_text);
        ctx.register_source(input.source_id.clone(), canonical.hash());
        ctx.record_audit(
            AuditKind::SourceRegistered,
            "extract",
            json!({
                "source_id": input.source_id,
                "raw_chars": canonical.map().raw_len(),
                "canonical_chars": canonical.char_len(),
            }),
        );

        let mut cost_usd = 0.0;
        let mut unresolved_quotes = Vec::new();
        let mut ambiguous = 0usize;

        let (claims, evidence) = match &self.strategy {
            Strategy::Sentences => self.extract_sentences(ctx, &input, &canonical)?,
            Strategy::ModelQuotes {
                client,
                model,
                max_tokens,
                temperature,
            } => {
                let request = CompletionRequest::new(format!("Text:\n{}", input.raw_text))
                    .with_system(QUOTE_SYSTEM_PROMPT)
                    .with_model(model.clone())
                    .with_max_tokens(*max_tokens)
                    .with_temperature(*temperature);

                let completion = client.complete(ctx.budget(), &request).await?;
                cost_usd = completion.cost_usd;
                let proposals = parse_proposals(&completion.text, &completion.model)?;
                debug!(proposals = proposals.len(), "Provider proposed quotes");

                let mut claims = Vec::new();
                let mut evidence = Vec::new();

                for (i, proposal) in proposals.into_iter().enumerate() {
                    check_stop(ctx)?;

                    let found = find_quote(&input.raw_text, &proposal.quote);
                    let Some((start, end)) = found.selected_match() else {
                        warn!(proposal = i, "Quote not found verbatim, dropping claim");
                        ctx.record_audit(
                            AuditKind::QuoteUnresolved,
                            "extract",
                            json!({ "proposal": i, "quote_chars": proposal.quote.chars().count() }),
                        );
                        unresolved_quotes.push(proposal.quote);
                        continue;
                    };
                    if found.status() == MatchStatus::Ambiguous {
                        ambiguous += 1;
                    }

                    let resolved = resolve_in(&input.raw_text, &canonical, &input.source_id, start, end)?;
                    let source_ref = format!("{}#quote_{}", input.source_id, i);
                    let confidence = proposal.confidence.unwrap_or(self.confidence);

                    let (claim, ev) =
                        self.records_for(resolved, source_ref, proposal.claim.trim().to_string(), confidence);
                    claims.push(claim);
                    evidence.push(ev);
                }

                (claims, evidence)
            }
        };

        let summary = json!({
            "claims": claims.len(),
            "evidence": evidence.len(),
            "unresolved_quotes": unresolved_quotes.len(),
            "ambiguous_quotes": ambiguous,
        });

        let output = Extraction {
            source_id: input.source_id,
            canonical,
            claims,
            evidence,
            unresolved_quotes,
        };
        Ok(StageProduct::new(output, summary).with_cost(cost_usd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ProviderResponse, ScriptedProvider};
    use crate::domain::{BudgetCeilings, BudgetMeter};

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("جملة أولى. جملة ثانية.");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "جملة أولى.");
        assert_eq!((sentences[0].start, sentences[0].end), (0, 10));
        assert_eq!(sentences[1].text, "جملة ثانية.");
        assert_eq!((sentences[1].start, sentences[1].end), (11, 22));
    }

    #[test]
    fn test_split_without_terminator() {
        let sentences = split_sentences("  بلا نقطة  ");
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].text, "بلا نقطة");
        assert_eq!(sentences[0].start, 2);
    }

    #[test]
    fn test_split_skips_blank_segments() {
        let sentences = split_sentences("أ.\n\n؟ب!");
        let texts: Vec<_> = sentences.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["أ.", "؟", "ب!"]);
    }

    #[tokio::test]
    async fn test_two_sentences_two_claims() {
        let stage = ExtractionStage::sentences(CanonicalPolicy::default());
        let mut ctx = RunContext::default();

        let product = stage
            .run(&mut ctx, ExtractionInput::new("جملة أولى. جملة ثانية.", "s1"))
            .await
            .unwrap();
        let extraction = product.output;

        assert_eq!(extraction.claims.len(), 2);
        assert_eq!(extraction.evidence.len(), 2);
        assert_eq!(extraction.canonical.as_str(), "جملة اولى. جملة ثانية.");

        for (claim, ev) in extraction.claims.iter().zip(&extraction.evidence) {
            assert_eq!(claim.evidence_ids, vec![ev.evidence_id.clone()]);
            let span = &ev.spans[0];
            let expected = extraction
                .canonical
                .slice(span.char_start as usize, span.char_end as usize);
            assert_eq!(span.text, expected);
            assert_eq!(claim.text, span.text);
            assert_eq!(ev.confidence, 0.7);
        }
        assert_eq!(extraction.evidence[1].source_ref, "s1#sent_1");
        assert_eq!(extraction.claims[0].text, "جملة اولى.");
        assert!(ctx.source_hashes().contains_key("s1"));
    }

    #[tokio::test]
    async fn test_empty_input_fails() {
        let stage = ExtractionStage::sentences(CanonicalPolicy::default());
        let mut ctx = RunContext::default();
        let err = stage
            .run(&mut ctx, ExtractionInput::new("  \n ", "s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EmptyInput(_)));
    }

    #[tokio::test]
    async fn test_stop_between_sentences() {
        let stage = ExtractionStage::sentences(CanonicalPolicy::default());
        let mut ctx = RunContext::default();
        ctx.request_stop("cancelled");
        let err = stage
            .run(&mut ctx, ExtractionInput::new("أ. ب.", "s1"))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Stopped("cancelled".to_string()));
    }

    #[tokio::test]
    async fn test_model_quotes_resolved_and_unresolved() {
        let answer = r#"Here you go:
[{"claim": "Ibn Khaldun said it", "quote": "قَالَ ابنُ خلدون"},
 {"claim": "made up", "quote": "نص غير موجود"}]"#;
        let provider = ScriptedProvider::new().with_response(ProviderResponse::new(answer, 100, 50));
        let client = MeteredClient::new(Arc::new(provider));
        let stage = ExtractionStage::model_quotes(CanonicalPolicy::default(), client);
        assert!(stage.card().metered);

        let mut ctx = RunContext::default();
        let product = stage
            .run(&mut ctx, ExtractionInput::new("قَالَ ابنُ خلدون.", "s1"))
            .await
            .unwrap();
        let extraction = product.output;

        assert_eq!(extraction.claims.len(), 1);
        assert_eq!(extraction.evidence[0].spans[0].text, "قال ابن خلدون");
        assert_eq!(extraction.evidence[0].spans[0].char_start, 0);
        assert_eq!(extraction.unresolved_quotes, vec!["نص غير موجود".to_string()]);
        assert!(product.cost_usd > 0.0);
        assert_eq!(ctx.budget_snapshot().used_tool_calls(), 1);
        assert!(ctx
            .audit_events()
            .iter()
            .any(|e| e.event == AuditKind::QuoteUnresolved));
    }

    #[tokio::test]
    async fn test_model_quotes_garbage_is_provider_error() {
        let provider = ScriptedProvider::new().with_response(ProviderResponse::new("no idea", 10, 2));
        let stage = ExtractionStage::model_quotes(
            CanonicalPolicy::default(),
            MeteredClient::new(Arc::new(provider)),
        );
        let mut ctx = RunContext::default();
        let err = stage
            .run(&mut ctx, ExtractionInput::new("نص.", "s1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "provider_error");
    }

    #[tokio::test]
    async fn test_model_quotes_exhausted_budget() {
        let provider = ScriptedProvider::new().with_response(ProviderResponse::new("[]", 1, 1));
        let stage = ExtractionStage::model_quotes(
            CanonicalPolicy::default(),
            MeteredClient::new(Arc::new(provider)),
        );
        let budget = BudgetMeter::with_ceilings(BudgetCeilings {
            max_usd: 0.0,
            ..Default::default()
        });
        let mut ctx = RunContext::default().with_budget(budget);
        let err = stage
            .run(&mut ctx, ExtractionInput::new("نص.", "s1"))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::BudgetExhausted);
    }

    #[tokio::test]
    async fn test_configured_timeout_applies_to_quote_calls() {
        let mut config = EngineConfig::default();
        config.extraction.strategy = ExtractionStrategy::ModelQuotes;
        config.extraction.timeout_seconds = 1;

        let provider = ScriptedProvider::new()
            .with_response(ProviderResponse::new("[]", 1, 1))
            .with_delay(Duration::from_secs(5));
        let stage = ExtractionStage::from_config(&config, Some(MeteredClient::new(Arc::new(provider)))).unwrap();

        let mut ctx = RunContext::default();
        let err = stage
            .run(&mut ctx, ExtractionInput::new("نص.", "s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Provider { ref message, .. } if message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_distinct_texts_share_no_state() {
        let stage = ExtractionStage::sentences(CanonicalPolicy::default());
        let mut ctx = RunContext::default();
        for i in 0..20 {
            let raw = format!("جملة رقم {}.", i);
            let product = stage.run(&mut ctx, ExtractionInput::new(raw, format!("s{}", i))).await.unwrap();
            assert_eq!(product.output.claims.len(), 1);
        }
        assert_eq!(ctx.source_hashes().len(), 20);
    }

    #[test]
    fn test_from_config_requires_client_for_quotes() {
        let mut config = EngineConfig::default();
        config.extraction.strategy = ExtractionStrategy::ModelQuotes;
        assert!(ExtractionStage::from_config(&config, None).is_err());

        config.extraction.strategy = ExtractionStrategy::Sentences;
        let stage = ExtractionStage::from_config(&config, None).unwrap();
        assert!(!stage.card().metered);
    }
}

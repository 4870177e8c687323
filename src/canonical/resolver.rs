//! Span resolution: raw character ranges → exact canonical ranges.
//!
//! # Design Decisions
//!
//! - **Exact by construction**: canonical text is always sliced out of the
//!   same [`CanonicalText`] whose map produced the range
//! - **Honest unresolved**: quotes that do not occur verbatim get no span
//! - **Character offsets**: all positions count Unicode scalar values, not bytes

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::policy::CanonicalPolicy;
use super::transform::{transform, CanonicalText};
use crate::error::{CoreError, CoreResult};

/// A raw range resolved against the canonical form of its text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSpan {
    pub source_id: String,
    pub raw_start: usize,
    pub raw_end: usize,
    pub text_raw: String,
    pub text_canonical: String,
    pub canonical_start: usize,
    pub canonical_end: usize,
    pub canonicalizer_version: String,
}

impl ResolvedSpan {
    /// Whether canonicalization collapsed the range to nothing
    pub fn is_empty(&self) -> bool {
        self.canonical_end == self.canonical_start
    }
}

/// Resolve `[raw_start, raw_end)` of `raw_text` without caching
pub fn resolve_span(
    raw_text: &str,
    source_id: &str,
    raw_start: usize,
    raw_end: usize,
    policy: &CanonicalPolicy,
) -> CoreResult<ResolvedSpan> {
    let canonical = transform(raw_text, policy);
    resolve_in(raw_text, &canonical, source_id, raw_start, raw_end)
}

/// Resolve a raw range against an already computed canonical form
pub fn resolve_in(
    raw_text: &str,
    canonical: &CanonicalText,
    source_id: &str,
    raw_start: usize,
    raw_end: usize,
) -> CoreResult<ResolvedSpan> {
    let raw_len = canonical.map().raw_len();
    if raw_start >= raw_end || raw_end > raw_len {
        return Err(CoreError::InvalidRange {
            start: raw_start,
            end: raw_end,
            len: raw_len,
        });
    }

    let (canonical_start, canonical_end) = canonical.map().map_range(raw_start, raw_end);

    Ok(ResolvedSpan {
        source_id: source_id.to_string(),
        raw_start,
        raw_end,
        text_raw: char_slice(raw_text, raw_start, raw_end),
        text_canonical: canonical.slice(canonical_start, canonical_end),
        canonical_start,
        canonical_end,
        canonicalizer_version: canonical.policy_version().to_string(),
    })
}

/// Texts a resolver keeps before evicting the oldest
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Resolver that builds each text's offset map once and reuses it
///
/// The cache holds at most `capacity` texts; the oldest entry goes first.
#[derive(Debug)]
pub struct SpanResolver {
    policy: CanonicalPolicy,
    cache: HashMap<String, Arc<CanonicalText>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SpanResolver {
    pub fn new(policy: CanonicalPolicy) -> Self {
        Self::with_capacity(policy, DEFAULT_CACHE_CAPACITY)
    }

    /// Resolver caching at most `capacity` texts (at least one)
    pub fn with_capacity(policy: CanonicalPolicy, capacity: usize) -> Self {
        Self {
            policy,
            cache: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn policy(&self) -> &CanonicalPolicy {
        &self.policy
    }

    /// Canonical form of `raw_text`, computed on first use
    pub fn canonical(&mut self, raw_text: &str) -> Arc<CanonicalText> {
        let key = cache_key(&self.policy, raw_text);
        if let Some(hit) = self.cache.get(&key) {
            return Arc::clone(hit);
        }
        debug!(chars = raw_text.chars().count(), "building offset map");
        let built = Arc::new(transform(raw_text, &self.policy));
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.cache.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.cache.insert(key, Arc::clone(&built));
        built
    }

    pub fn resolve(
        &mut self,
        raw_text: &str,
        source_id: &str,
        raw_start: usize,
        raw_end: usize,
    ) -> CoreResult<ResolvedSpan> {
        let canonical = self.canonical(raw_text);
        resolve_in(raw_text, &canonical, source_id, raw_start, raw_end)
    }

    /// Number of cached texts
    pub fn cached_texts(&self) -> usize {
        self.cache.len()
    }
}

fn cache_key(policy: &CanonicalPolicy, raw_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(policy.fingerprint().as_bytes());
    hasher.update([0u8]);
    hasher.update(raw_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Characters `[start, end)` of `text`
pub fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Raw context around a span, about `window` characters wide
///
/// Ellipses mark truncation on either side.
pub fn anchor_context(raw_text: &str, start: usize, end: usize, window: usize) -> String {
    let chars: Vec<char> = raw_text.chars().collect();
    let end = end.min(chars.len());
    let start = start.min(end);

    let remaining = window.saturating_sub(end - start);
    let each_side = remaining / 2;

    let anchor_start = start.saturating_sub(each_side);
    let anchor_end = (end + each_side).min(chars.len());

    let prefix = if anchor_start > 0 { "..." } else { "" };
    let suffix = if anchor_end < chars.len() { "..." } else { "" };
    let anchor: String = chars[anchor_start..anchor_end].iter().collect();

    format!("{}{}{}", prefix, anchor, suffix)
}

/// Status of quote resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Exactly one match found
    Resolved,
    /// Multiple matches found, first selected
    Ambiguous,
    /// No match found
    Unresolved,
}

/// Result of searching for a quote in a raw text
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// All character ranges where the quote was found
    pub matches: Vec<(usize, usize)>,
}

impl MatchResult {
    pub fn status(&self) -> MatchStatus {
        match self.matches.len() {
            0 => MatchStatus::Unresolved,
            1 => MatchStatus::Resolved,
            _ => MatchStatus::Ambiguous,
        }
    }

    /// The selected match (first one, deterministic)
    pub fn selected_match(&self) -> Option<(usize, usize)> {
        self.matches.first().copied()
    }
}

/// Find every verbatim occurrence of `quote` in `text`, as character ranges
pub fn find_quote(text: &str, quote: &str) -> MatchResult {
    let haystack: Vec<char> = text.chars().collect();
    let needle: Vec<char> = quote.chars().collect();

    if needle.is_empty() || needle.len() > haystack.len() {
        return MatchResult { matches: Vec::new() };
    }

    let matches = haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle.as_slice())
        .map(|(i, _)| (i, i + needle.len()))
        .collect();

    MatchResult { matches }
}

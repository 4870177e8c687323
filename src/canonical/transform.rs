//! The canonicalization pipeline.
//!
//! Steps run in a fixed order because each one works on the characters the
//! previous one produced:
//!
//! 1. Unicode composition (NFC / NFKC), applied per composition segment
//! 2. Arabic diacritic stripping
//! 3. Hamza-seat folding
//! 4. Alef-madda folding
//! 5. Tatweel removal (then optional alef-maqsura folding)
//!
//! Anything else passes through untouched. Every step yields an
//! [`OffsetMap`]; the final map is their composition.

use serde::Serialize;
use sha2::{Digest, Sha256};
use unicode_normalization::char::{canonical_combining_class, compose};
use unicode_normalization::UnicodeNormalization;

use super::offset_map::OffsetMap;
use super::policy::{CanonicalPolicy, UnicodeForm};

const TATWEEL: char = '\u{0640}';
const ALEF: char = '\u{0627}';
const ALEF_MADDA: char = '\u{0622}';
const ALEF_MAQSURA: char = '\u{0649}';
const YEH: char = '\u{064A}';

/// Canonical form of one raw text, together with its offset map
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalText {
    text: String,
    #[serde(skip)]
    chars: Vec<char>,
    map: OffsetMap,
    hash: String,
    policy_version: String,
}

impl CanonicalText {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.chars.len()
    }

    pub fn map(&self) -> &OffsetMap {
        &self.map
    }

    /// `text_hash` of the canonical text
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn policy_version(&self) -> &str {
        &self.policy_version
    }

    /// Canonical characters `[start, end)`, clamped to the text
    pub fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.chars.len());
        let start = start.min(end);
        self.chars[start..end].iter().collect()
    }
}

/// Run the full pipeline, returning the canonical text and its offset map
///
/// Passes repeat until the text is stable. A deletion or fold can leave a
/// base letter next to a mark it composes with (`ا` `ـ` U+0654 without
/// diacritic stripping), which a single pass would leave behind.
pub fn transform(raw_text: &str, policy: &CanonicalPolicy) -> CanonicalText {
    let raw: Vec<char> = raw_text.chars().collect();

    let (mut chars, mut map) = single_pass(&raw, policy);
    // every pass that changes the text shortens it
    for _ in 0..raw.len() {
        let (next, next_map) = single_pass(&chars, policy);
        if next == chars {
            break;
        }
        map = map.compose(&next_map);
        chars = next;
    }

    let text: String = chars.iter().collect();
    let hash = text_hash(&text);

    CanonicalText {
        text,
        chars,
        map,
        hash,
        policy_version: policy.version().to_string(),
    }
}

fn single_pass(input: &[char], policy: &CanonicalPolicy) -> (Vec<char>, OffsetMap) {
    let (mut chars, mut map) = compose_unicode(input, policy.unicode_form());

    if policy.strip_diacritics() {
        apply_step(&mut chars, &mut map, |c| {
            if is_arabic_diacritic(c) {
                None
            } else {
                Some(c)
            }
        });
    }

    if policy.normalize_hamza() {
        apply_step(&mut chars, &mut map, |c| Some(fold_hamza_seat(c)));
    }

    if policy.fold_alef_madda() {
        apply_step(&mut chars, &mut map, |c| {
            Some(if c == ALEF_MADDA { ALEF } else { c })
        });
    }

    if policy.remove_tatweel() {
        apply_step(&mut chars, &mut map, |c| if c == TATWEEL { None } else { Some(c) });
    }

    if policy.normalize_alef_maqsura() {
        apply_step(&mut chars, &mut map, |c| {
            Some(if c == ALEF_MAQSURA { YEH } else { c })
        });
    }

    (chars, map)
}

/// Canonical form of `raw_text` under `policy`
pub fn canonicalize(raw_text: &str, policy: &CanonicalPolicy) -> String {
    transform(raw_text, policy).into_string()
}

/// Offset map from `raw_text` to its canonical form under `policy`
pub fn build_offset_map(raw_text: &str, policy: &CanonicalPolicy) -> OffsetMap {
    transform(raw_text, policy).map
}

/// Content hash of a canonical text, `"sha256:<hex>"`
///
/// Only ever computed over canonical text, so two raw variants that
/// normalize identically register as the same source.
pub fn text_hash(canonical_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_text.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Whether `c` is an Arabic combining mark removed by diacritic stripping
pub fn is_arabic_diacritic(c: char) -> bool {
    matches!(
        c,
        '\u{064B}'..='\u{065F}'
            | '\u{0670}'
            | '\u{06D6}'..='\u{06DC}'
            | '\u{06DF}'..='\u{06E4}'
            | '\u{06E7}'..='\u{06E8}'
            | '\u{06EA}'..='\u{06ED}'
    )
}

fn fold_hamza_seat(c: char) -> char {
    match c {
        // أ إ ٱ
        '\u{0623}' | '\u{0625}' | '\u{0671}' => ALEF,
        // ؤ
        '\u{0624}' => '\u{0648}',
        // ئ
        '\u{0626}' => YEH,
        other => other,
    }
}

/// Apply a one-to-one-or-delete step and fold its map into `map`
fn apply_step(chars: &mut Vec<char>, map: &mut OffsetMap, step: impl Fn(char) -> Option<char>) {
    let mut counts = Vec::with_capacity(chars.len());
    let mut out = Vec::with_capacity(chars.len());

    for &c in chars.iter() {
        match step(c) {
            Some(mapped) => {
                out.push(mapped);
                counts.push(1);
            }
            None => counts.push(0),
        }
    }

    // 1:1 steps leave the map untouched
    if out.len() != chars.len() {
        *map = map.compose(&OffsetMap::from_counts(&counts));
    }
    *chars = out;
}

/// Unicode composition, segment by segment
///
/// A segment starts at every starter that cannot compose with the character
/// before it, so normalizing segments independently matches normalizing the
/// whole text while letting each segment report its own length change.
fn compose_unicode(raw: &[char], form: UnicodeForm) -> (Vec<char>, OffsetMap) {
    if form == UnicodeForm::None || raw.is_empty() {
        return (raw.to_vec(), OffsetMap::identity(raw.len()));
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut counts = Vec::with_capacity(raw.len());
    let mut segment_start = 0;

    for i in 1..=raw.len() {
        let at_boundary = i == raw.len() || starts_segment(raw[i - 1], raw[i]);
        if !at_boundary {
            continue;
        }

        let segment = &raw[segment_start..i];
        let normalized: Vec<char> = match form {
            UnicodeForm::Nfkc => segment.iter().copied().nfkc().collect(),
            _ => segment.iter().copied().nfc().collect(),
        };
        distribute(segment.len(), normalized.len(), &mut counts);
        out.extend(normalized);
        segment_start = i;
    }

    let map = OffsetMap::from_counts(&counts);
    (out, map)
}

fn starts_segment(prev: char, c: char) -> bool {
    canonical_combining_class(c) == 0 && compose(prev, c).is_none()
}

/// Spread `produced` output characters over `consumed` input characters
///
/// Leading characters keep one output each; when the segment shrank, the
/// trailing characters become deletions; when it grew, the last character
/// owns the surplus.
fn distribute(consumed: usize, produced: usize, counts: &mut Vec<usize>) {
    if consumed == 0 {
        return;
    }
    if produced >= consumed {
        counts.extend(std::iter::repeat(1).take(consumed - 1));
        counts.push(produced - (consumed - 1));
    } else {
        counts.extend(std::iter::repeat(1).take(produced));
        counts.extend(std::iter::repeat(0).take(consumed - produced));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(text: &str) -> String {
        canonicalize(text, &CanonicalPolicy::default())
    }

    #[test]
    fn test_strip_diacritics() {
        assert_eq!(canon("قَالَ"), "قال");
    }

    #[test]
    fn test_hamza_normalization() {
        assert_eq!(canon("أحمد"), "احمد");
        assert_eq!(canon("إسلام"), "اسلام");
        assert_eq!(canon("مؤمن"), "مومن");
    }

    #[test]
    fn test_alef_madda() {
        assert_eq!(canon("آخر"), "اخر");
    }

    #[test]
    fn test_tatweel_removal() {
        assert_eq!(canon("عــربي"), "عربي");
    }

    #[test]
    fn test_alef_maqsura_preserved_by_default() {
        assert!(canon("موسى").contains('ى'));

        let policy = CanonicalPolicy::builder().normalize_alef_maqsura(true).build();
        assert_eq!(canonicalize("موسى", &policy), "موسي");
    }

    #[test]
    fn test_latin_passthrough() {
        assert_eq!(canon("hello"), "hello");
        let mixed = canon("قَالَ hello");
        assert_eq!(mixed, "قال hello");
    }

    #[test]
    fn test_empty_string() {
        let result = transform("", &CanonicalPolicy::default());
        assert_eq!(result.as_str(), "");
        assert_eq!(result.map().raw_len(), 0);
        assert_eq!(result.map().canonical_len(), 0);
    }

    #[test]
    fn test_decomposed_hamza_composes_then_folds() {
        // alef + combining hamza above composes to U+0623 before folding
        assert_eq!(canon("\u{0627}\u{0654}حمد"), "احمد");
    }

    #[test]
    fn test_latin_composition_keeps_offsets_monotonic() {
        let result = transform("e\u{0301}x", &CanonicalPolicy::default());
        assert_eq!(result.as_str(), "\u{00E9}x");
        assert_eq!(result.map().boundaries(), &[0, 1, 1, 2]);
    }

    #[test]
    fn test_unpaired_combining_mark_passes_through() {
        let result = transform("\u{0301}abc", &CanonicalPolicy::default());
        assert_eq!(result.as_str(), "\u{0301}abc");
        assert_eq!(result.map().raw_len(), 4);
    }

    #[test]
    fn test_nfkc_folds_presentation_forms() {
        let policy = CanonicalPolicy::builder().unicode_form(UnicodeForm::Nfkc).build();
        // lam-alef ligature
        let result = transform("\u{FEFB}", &policy);
        assert_eq!(result.as_str(), "\u{0644}\u{0627}");
        assert_eq!(result.map().map_range(0, 1), (0, 2));
    }

    #[test]
    fn test_scenario_sentence() {
        let result = transform("قَالَ ابنُ خلدون.", &CanonicalPolicy::default());
        assert_eq!(result.as_str(), "قال ابن خلدون.");
        assert_eq!(result.map().map_range(0, 5), (0, 3));
        assert_eq!(result.slice(0, 3), "قال");
    }

    #[test]
    fn test_text_hash() {
        assert_eq!(text_hash("قال"), text_hash("قال"));
        assert_ne!(text_hash("قال"), text_hash("قيل"));
        assert!(text_hash("").starts_with("sha256:"));
        assert_eq!(text_hash("x").len(), 7 + 64);
    }

    #[test]
    fn test_disabled_steps() {
        let policy = CanonicalPolicy::builder()
            .strip_diacritics(false)
            .normalize_hamza(false)
            .build();
        assert_eq!(canonicalize("أَ", &policy), "أَ");
    }

    #[test]
    fn test_removed_tatweel_exposes_composition() {
        let policy = CanonicalPolicy::builder().strip_diacritics(false).build();
        let result = transform("\u{0627}\u{0640}\u{0654}", &policy);
        assert_eq!(result.as_str(), "ا");
        assert_eq!(canonicalize(result.as_str(), &policy), "ا");
        assert_eq!(result.map().boundaries(), &[0, 1, 1, 1]);
    }

    #[test]
    fn test_distribute() {
        let mut counts = Vec::new();
        distribute(2, 1, &mut counts);
        distribute(1, 3, &mut counts);
        assert_eq!(counts, vec![1, 0, 3]);
    }
}

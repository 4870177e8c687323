//! Canonical-offset engine.
//!
//! Normalizes raw text under a versioned [`CanonicalPolicy`] and keeps an
//! exact map from raw character positions to canonical ones, so every span
//! downstream points at a verifiable slice of one specific canonical text.
//!
//! # Example
//!
//! ```
//! use claimgate::canonical::{resolve_span, CanonicalPolicy};
//!
//! let policy = CanonicalPolicy::default();
//! let span = resolve_span("قَالَ ابنُ خلدون.", "src", 0, 5, &policy).unwrap();
//! assert_eq!(span.text_canonical, "قال");
//! assert_eq!((span.canonical_start, span.canonical_end), (0, 3));
//! ```

pub mod offset_map;
pub mod policy;
pub mod resolver;
pub mod transform;

pub use offset_map::OffsetMap;
pub use policy::{CanonicalPolicy, PolicyBuilder, PolicyRegistry, UnicodeForm, POLICY_VERSION};
pub use resolver::{
    anchor_context, char_slice, find_quote, resolve_in, resolve_span, MatchResult, MatchStatus,
    ResolvedSpan, SpanResolver, DEFAULT_CACHE_CAPACITY,
};
pub use transform::{build_offset_map, canonicalize, text_hash, transform, CanonicalText};

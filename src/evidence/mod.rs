//! Evidence and claim records for grounding extracted assertions
//!
//! Every claim points at one or more evidence items, and every evidence item
//! points at exact canonical character ranges of a registered source.
//!
//! # Design Principles
//!
//! - **Two representations**: permissive wire records at the boundary,
//!   validated types inside the core. Conversion happens once, at ingress.
//! - **Append-only**: claims are never edited; corrections and approvals are
//!   new claims carrying a `supersedes` back-reference.
//! - **Honest unresolved**: a quote that cannot be located verbatim gets no
//!   evidence at all.
//!
//! # Example
//!
//! ```
//! use claimgate::evidence::{Claim, Evidence, TextSpan};
//!
//! let span = TextSpan::new("src", 0, 3, "قال", "قَالَ").unwrap();
//! let evidence = Evidence::new(vec![span], 0.7, "src#sent_0").unwrap();
//! let claim = Claim::new("قال", vec![evidence.evidence_id().to_string()], 0.7).unwrap();
//! assert!(!claim.approved());
//! ```

pub mod records;
pub mod types;

pub use records::{new_claim_id, new_evidence_id, ClaimRecord, EvidenceRecord, TextSpanRecord};
pub use types::{Claim, Evidence, TextSpan};

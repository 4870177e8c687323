//! Raw → canonical character offset map.
//!
//! The map is an arena of boundary positions built once per text:
//! `boundaries[i]` is the number of canonical characters produced by raw
//! characters `[0, i)`, so `boundaries` has `raw_len + 1` entries, starts at
//! 0, ends at `canonical_len` and never decreases. Every normalization step
//! produces one of these and the steps compose by index lookup.

use serde::{Deserialize, Serialize};

/// Monotonic raw → canonical character offset map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetMap {
    boundaries: Vec<usize>,
}

impl OffsetMap {
    /// Identity map over `len` characters
    pub fn identity(len: usize) -> Self {
        Self {
            boundaries: (0..=len).collect(),
        }
    }

    /// Build a map from the number of output characters each input
    /// character produced (0 for deleted characters)
    pub fn from_counts(counts: &[usize]) -> Self {
        let mut boundaries = Vec::with_capacity(counts.len() + 1);
        let mut produced = 0;
        boundaries.push(0);
        for count in counts {
            produced += count;
            boundaries.push(produced);
        }
        Self { boundaries }
    }

    /// Compose `self` (raw → intermediate) with `next` (intermediate → out)
    ///
    /// `next` must have been built over exactly the characters `self`
    /// produced.
    pub fn compose(&self, next: &OffsetMap) -> OffsetMap {
        debug_assert_eq!(self.canonical_len(), next.raw_len());
        let boundaries = self
            .boundaries
            .iter()
            .map(|&mid| next.boundaries[mid])
            .collect();
        OffsetMap { boundaries }
    }

    /// Number of raw characters covered by the map
    pub fn raw_len(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Number of canonical characters produced
    pub fn canonical_len(&self) -> usize {
        self.boundaries.last().copied().unwrap_or(0)
    }

    /// Whether the raw character at `raw_index` survived normalization
    pub fn is_retained(&self, raw_index: usize) -> bool {
        raw_index < self.raw_len() && self.boundaries[raw_index + 1] > self.boundaries[raw_index]
    }

    /// Canonical index of a single raw character
    ///
    /// Deleted characters map to the canonical index of the nearest retained
    /// predecessor, or 0 when nothing before them was retained. Indices past
    /// the end clamp to the canonical length.
    pub fn canonical_index(&self, raw_index: usize) -> usize {
        if raw_index >= self.raw_len() {
            return self.canonical_len();
        }
        let before = self.boundaries[raw_index];
        if self.is_retained(raw_index) {
            before
        } else {
            before.saturating_sub(1)
        }
    }

    /// Canonical range for the raw range `[raw_start, raw_end)`
    ///
    /// Out-of-range bounds clamp to the text; the result always satisfies
    /// `start <= end <= canonical_len`.
    pub fn map_range(&self, raw_start: usize, raw_end: usize) -> (usize, usize) {
        let last = self.raw_len();
        let start = self.boundaries[raw_start.min(last)];
        let end = self.boundaries[raw_end.min(last)];
        (start, end.max(start))
    }

    /// Smallest raw range whose characters produced `[canonical_start, canonical_end)`
    ///
    /// Deleted raw characters inside the range are included; deleted
    /// characters at either edge are not.
    pub fn raw_range(&self, canonical_start: usize, canonical_end: usize) -> (usize, usize) {
        // first raw char whose output reaches past canonical_start
        let start = self
            .boundaries
            .partition_point(|&b| b <= canonical_start)
            .saturating_sub(1);
        // first boundary that covers canonical_end
        let end = self.boundaries.partition_point(|&b| b < canonical_end);
        (start.min(self.raw_len()), end.max(start).min(self.raw_len()))
    }

    /// Raw boundary positions, `raw_len + 1` entries
    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_map() {
        let map = OffsetMap::identity(4);
        assert_eq!(map.raw_len(), 4);
        assert_eq!(map.canonical_len(), 4);
        assert_eq!(map.map_range(1, 3), (1, 3));
        assert_eq!(map.canonical_index(2), 2);
    }

    #[test]
    fn test_deleted_chars_map_to_predecessor() {
        // ق َ ا ل َ  → قال
        let map = OffsetMap::from_counts(&[1, 0, 1, 1, 0]);
        assert_eq!(map.canonical_len(), 3);
        assert_eq!(map.canonical_index(0), 0);
        assert_eq!(map.canonical_index(1), 0);
        assert_eq!(map.canonical_index(2), 1);
        assert_eq!(map.canonical_index(4), 2);
        assert_eq!(map.map_range(0, 5), (0, 3));
        assert!(!map.is_retained(1));
    }

    #[test]
    fn test_leading_deletion_maps_to_zero() {
        let map = OffsetMap::from_counts(&[0, 0, 1]);
        assert_eq!(map.canonical_index(0), 0);
        assert_eq!(map.canonical_index(1), 0);
        assert_eq!(map.map_range(0, 2), (0, 0));
    }

    #[test]
    fn test_compose() {
        // step one deletes index 1, step two deletes the new index 0
        let first = OffsetMap::from_counts(&[1, 0, 1, 1]);
        let second = OffsetMap::from_counts(&[0, 1, 1]);
        let composed = first.compose(&second);
        assert_eq!(composed.boundaries(), &[0, 0, 0, 1, 2]);
        assert_eq!(composed.canonical_len(), 2);
    }

    #[test]
    fn test_expansion_counts() {
        let map = OffsetMap::from_counts(&[1, 3, 1]);
        assert_eq!(map.canonical_len(), 5);
        assert_eq!(map.map_range(1, 2), (1, 4));
    }

    #[test]
    fn test_raw_range_round_trip() {
        let map = OffsetMap::from_counts(&[1, 0, 1, 1, 0]);
        assert_eq!(map.raw_range(0, 3), (0, 4));
        assert_eq!(map.raw_range(1, 2), (2, 3));
    }

    #[test]
    fn test_map_range_clamps() {
        let map = OffsetMap::identity(3);
        assert_eq!(map.map_range(2, 10), (2, 3));
    }
}

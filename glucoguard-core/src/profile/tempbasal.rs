//! Interval index for span treatments
//!
//! Temp basals and combo boluses are interval records: reporting and
//! analytics workloads ask "which span covers time T" for long runs of
//! nearly-monotonic T values. The index keeps the spans sorted ascending
//! by start, answers lookups with a binary search, and shortcuts the
//! common repeated-neighborhood case with a single-slot cache holding the
//! most recently matched span.
//!
//! Spans are expected to be non-overlapping (the store's duration
//! processing guarantees it), so the last span starting at or before T is
//! the only candidate.

use std::cell::Cell;

use crate::records::Treatment;
use crate::time::Timestamp;

/// Sorted, non-overlapping span treatments with O(log n) point lookups
#[derive(Debug, Default)]
pub struct SpanIndex {
    spans: Vec<Treatment>,
    /// Most recently matched span; invalidated on rebuild
    slot: Cell<Option<usize>>,
}

impl SpanIndex {
    /// Build an index over `spans`, sorting them by start time.
    pub fn new(mut spans: Vec<Treatment>) -> Self {
        spans.sort_by_key(|s| s.mills);
        Self {
            spans,
            slot: Cell::new(None),
        }
    }

    /// The span covering `time`, if any.
    pub fn at(&self, time: Timestamp) -> Option<&Treatment> {
        // Single-slot cache first: repeated nearby queries hit here
        if let Some(idx) = self.slot.get() {
            if let Some(span) = self.spans.get(idx) {
                if span.covers(time) {
                    return Some(span);
                }
            }
        }

        let idx = self.spans.partition_point(|s| s.mills <= time);
        if idx == 0 {
            return None;
        }
        let candidate = &self.spans[idx - 1];
        if candidate.covers(time) {
            self.slot.set(Some(idx - 1));
            Some(candidate)
        } else {
            None
        }
    }

    /// Number of indexed spans.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether the index holds no spans.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::event_types;

    fn span(mills: Timestamp, duration_mins: f64) -> Treatment {
        Treatment {
            mills,
            duration: Some(duration_mins),
            event_type: event_types::TEMP_BASAL.into(),
            absolute: Some(1.0),
            ..Treatment::default()
        }
    }

    #[test]
    fn finds_covering_span() {
        let index = SpanIndex::new(vec![span(1000, 30.0), span(3_000_000, 30.0)]);

        assert_eq!(index.at(1000).map(|s| s.mills), Some(1000));
        assert_eq!(index.at(1000 + 29 * 60_000).map(|s| s.mills), Some(1000));
        assert_eq!(index.at(3_000_000).map(|s| s.mills), Some(3_000_000));
    }

    #[test]
    fn gaps_between_spans_return_none() {
        let index = SpanIndex::new(vec![span(1000, 10.0), span(3_000_000, 10.0)]);

        assert!(index.at(999).is_none());
        // Just past the first span's end
        assert!(index.at(1000 + 10 * 60_000).is_none());
        assert!(index.at(2_000_000).is_none());
    }

    #[test]
    fn unsorted_input_is_sorted() {
        let index = SpanIndex::new(vec![span(3_000_000, 10.0), span(1000, 10.0)]);
        assert_eq!(index.at(1500).map(|s| s.mills), Some(1000));
    }

    #[test]
    fn slot_cache_survives_repeated_queries() {
        let index = SpanIndex::new(vec![span(1000, 30.0)]);

        // Prime the slot, then hammer the same neighborhood
        for offset in 0..100u64 {
            assert!(index.at(1000 + offset * 1000).is_some());
        }
        assert_eq!(index.slot.get(), Some(0));

        // A miss outside every span must not return the cached one
        assert!(index.at(90_000_000).is_none());
    }
}

use std::collections::BTreeMap;

use crate::collab::HpTime;

/// One contiguous logical time span.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Span {
    /// Earliest time covered.
    pub start: HpTime,
    /// Latest time covered.
    pub end: HpTime,
}

/// Union of logical time ranges of records successfully sent, per stream.
///
/// Spans that overlap or abut are merged; sample-rate-aware gap detection is
/// the record format library's business, not ours.
#[derive(Debug, Default)]
pub struct Coverage {
    streams: BTreeMap<String, Vec<Span>>,
}

impl Coverage {
    /// Records one sent time range for `stream_id`.
    pub fn add(&mut self, stream_id: &str, start: HpTime, end: HpTime) {
        let spans = self
            .streams
            .entry(stream_id.to_owned())
            .or_default();

        // Records usually arrive in time order within a stream, so the
        // common case extends the last span. The fast path requires the new
        // span to start at or after the last span's start: the list is kept
        // sorted and disjoint, so such a span can only overlap the last one.
        // A span reaching further back may overlap earlier spans and takes
        // the full re-merge path.
        if let Some(last) = spans.last_mut() {
            if start >= last.start && start <= last.end {
                last.end = last.end.max(end);
                return;
            }
        }

        spans.push(Span { start, end });
        spans.sort_by_key(|span| span.start);
        merge_sorted(spans);
    }

    /// Returns `true` when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Number of distinct streams with coverage.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Iterates over streams and their merged spans, ordered by stream id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Span])> {
        self.streams
            .iter()
            .map(|(id, spans)| (id.as_str(), spans.as_slice()))
    }
}

fn merge_sorted(spans: &mut Vec<Span>) {
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans.drain(..) {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
            }
            _ => merged.push(span),
        }
    }
    *spans = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_records_extend_one_span() {
        let mut coverage = Coverage::default();
        coverage.add("NET_STA__BHZ/MSEED", 0, 100);
        coverage.add("NET_STA__BHZ/MSEED", 100, 200);
        coverage.add("NET_STA__BHZ/MSEED", 200, 310);

        let spans: Vec<_> = coverage.iter().collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].1, &[Span { start: 0, end: 310 }]);
    }

    #[test]
    fn gaps_produce_separate_spans() {
        let mut coverage = Coverage::default();
        coverage.add("S/MSEED", 0, 100);
        coverage.add("S/MSEED", 500, 600);

        let spans: Vec<_> = coverage.iter().collect();
        assert_eq!(
            spans[0].1,
            &[Span { start: 0, end: 100 }, Span { start: 500, end: 600 }]
        );
    }

    #[test]
    fn out_of_order_insert_merges() {
        let mut coverage = Coverage::default();
        coverage.add("S/MSEED", 500, 600);
        coverage.add("S/MSEED", 0, 100);
        coverage.add("S/MSEED", 50, 520);

        let spans: Vec<_> = coverage.iter().collect();
        assert_eq!(spans[0].1, &[Span { start: 0, end: 600 }]);
    }

    #[test]
    fn backward_reaching_span_re_merges_earlier_spans() {
        // A span that overlaps the last span but starts before it must not
        // just widen the last span; it has to collapse into the earlier
        // spans it now touches, keeping the list sorted and disjoint.
        let mut coverage = Coverage::default();
        coverage.add("S/MSEED", 0, 100);
        coverage.add("S/MSEED", 500, 600);
        coverage.add("S/MSEED", 50, 550);

        let spans: Vec<_> = coverage.iter().collect();
        assert_eq!(spans[0].1, &[Span { start: 0, end: 600 }]);
    }

    #[test]
    fn streams_are_independent() {
        let mut coverage = Coverage::default();
        coverage.add("A/MSEED", 0, 10);
        coverage.add("B/MSEED", 0, 10);
        assert_eq!(coverage.stream_count(), 2);
    }
}

//! Discrepancy report types emitted by the pair matcher.

use crate::entities::SourceLabel;
use serde::Serialize;
use time::Duration;

/// Running min/mean/max over the latency deltas of matched pairs.
///
/// Folded incrementally as matches happen; reset at every report
/// boundary together with the matched counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Smallest observed |observed_at_B - observed_at_A|, in milliseconds.
    pub min_ms: i64,
    /// Mean delta over all matched pairs in the interval, in milliseconds.
    pub mean_ms: i64,
    /// Largest observed delta, in milliseconds.
    pub max_ms: i64,
    #[serde(skip)]
    sum_ms: i128,
    #[serde(skip)]
    count: u64,
}

impl LatencyStats {
    /// Stats over a single latency sample.
    pub fn single(latency: Duration) -> Self {
        let ms = latency.whole_milliseconds() as i64;
        Self {
            min_ms: ms,
            mean_ms: ms,
            max_ms: ms,
            sum_ms: ms as i128,
            count: 1,
        }
    }

    /// Fold one more latency sample into the running stats.
    pub fn fold(&mut self, latency: Duration) {
        let ms = latency.whole_milliseconds() as i64;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
        self.sum_ms += ms as i128;
        self.count += 1;
        self.mean_ms = (self.sum_ms / self.count as i128) as i64;
    }

    /// Number of samples folded in so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Snapshot of one report interval for one matched pair of sources.
///
/// Covers everything resolved since the previous report: matched pairs
/// with their latency statistics, entries evicted as permanently missing
/// from the other side, and the outstanding (still within the staleness
/// window) pending counts per side.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    /// The A-side label of the pair.
    pub side_a: SourceLabel,
    /// The B-side label of the pair.
    pub side_b: SourceLabel,
    /// Pairs matched since the last report.
    pub matched: u64,
    /// Entries seen only on side A that aged past the staleness threshold
    /// (permanently missing from B) and were evicted.
    pub a_only: u64,
    /// Entries seen only on side B that aged out (missing from A).
    pub b_only: u64,
    /// Latency statistics over the interval's matched pairs, when any.
    pub latency: Option<LatencyStats>,
    /// Identifiers still awaiting a match on side A after eviction.
    pub pending_a: usize,
    /// Identifiers still awaiting a match on side B after eviction.
    pub pending_b: usize,
}

impl MatchReport {
    /// Total identifiers resolved (matched or evicted) in the interval.
    pub fn resolved(&self) -> u64 {
        self.matched + self.a_only + self.b_only
    }
}

impl std::fmt::Display for MatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pair {}<->{}: matched={} {}-only={} {}-only={} pending=({}, {})",
            self.side_a,
            self.side_b,
            self.matched,
            self.side_a,
            self.a_only,
            self.side_b,
            self.b_only,
            self.pending_a,
            self.pending_b,
        )?;
        if let Some(latency) = &self.latency {
            write!(
                f,
                " latency_ms(min/mean/max)={}/{}/{}",
                latency.min_ms, latency.mean_ms, latency.max_ms
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_fold() {
        let mut stats = LatencyStats::single(Duration::milliseconds(30));
        stats.fold(Duration::milliseconds(10));
        stats.fold(Duration::milliseconds(50));
        assert_eq!(stats.min_ms, 10);
        assert_eq!(stats.max_ms, 50);
        assert_eq!(stats.mean_ms, 30);
        assert_eq!(stats.count(), 3);
    }

    #[test]
    fn test_report_json_shape() {
        let report = MatchReport {
            side_a: SourceLabel::push(),
            side_b: SourceLabel::pull(),
            matched: 2,
            a_only: 1,
            b_only: 0,
            latency: Some(LatencyStats::single(Duration::seconds(3))),
            pending_a: 4,
            pending_b: 5,
        };
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["side_a"], "push");
        assert_eq!(json["matched"], 2);
        assert_eq!(json["latency"]["mean_ms"], 3000);
        assert_eq!(json["pending_b"], 5);
    }
}

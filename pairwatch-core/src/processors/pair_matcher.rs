//! PairMatcher processor.
//!
//! The PairMatcher is responsible for:
//! - Receiving observations from the two connectors of its configured pair
//! - Correlating identical entry identifiers across the two sides
//! - Computing arrival-latency deltas for matched pairs
//! - Evicting entries that stay unmatched past the staleness threshold
//! - Emitting a [`MatchReport`] on every `Report` tick
//!
//! All pending state is owned by the matcher task; observations and
//! report ticks arrive through one serialized inbox, so no locking is
//! needed and a report always reflects every observation delivered
//! before its tick.

use crate::entities::{Observation, SourceLabel};
use crate::events::{MatcherEvent, MatcherEventReceiver};
use crate::report::{LatencyStats, MatchReport};
use compact_str::CompactString;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Which side of the pair an observation landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// PairMatcher correlates observations from exactly two source labels.
///
/// One instance per compared pair (e.g. push<->pull). Entries live in a
/// per-side pending map from first sighting until they are matched by
/// the opposite side or evicted as stale at a report boundary.
pub struct PairMatcher {
    side_a: SourceLabel,
    side_b: SourceLabel,
    staleness: Duration,
    /// id -> earliest observed_at on side A, awaiting a B sighting.
    pending_a: HashMap<CompactString, OffsetDateTime>,
    /// id -> earliest observed_at on side B, awaiting an A sighting.
    pending_b: HashMap<CompactString, OffsetDateTime>,
    matched: u64,
    latency: Option<LatencyStats>,
}

impl PairMatcher {
    /// Create a matcher for the `(side_a, side_b)` label pair.
    ///
    /// `staleness` is how long an entry may stay unmatched before a
    /// report evicts it as permanently missing from the other side.
    pub fn new(side_a: SourceLabel, side_b: SourceLabel, staleness: Duration) -> Self {
        Self {
            side_a,
            side_b,
            staleness,
            pending_a: HashMap::new(),
            pending_b: HashMap::new(),
            matched: 0,
            latency: None,
        }
    }

    /// Run the matcher until shutdown is signaled or the inbox closes.
    pub async fn run(mut self, mut inbox: MatcherEventReceiver, mut shutdown_rx: watch::Receiver<bool>) {
        info!(side_a = %self.side_a, side_b = %self.side_b, "PairMatcher started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(side_a = %self.side_a, side_b = %self.side_b, "PairMatcher received shutdown signal");
                        break;
                    }
                }

                Some(event) = inbox.recv() => {
                    match event {
                        MatcherEvent::Observation(obs) => self.record(obs),
                        MatcherEvent::Report => {
                            let report = self.report(OffsetDateTime::now_utc());
                            emit(&report);
                        }
                    }
                }

                else => {
                    info!(side_a = %self.side_a, side_b = %self.side_b, "MatcherEvent channel closed");
                    break;
                }
            }
        }

        info!(side_a = %self.side_a, side_b = %self.side_b, "PairMatcher shutdown complete");
    }

    /// Record one observation.
    ///
    /// Match-on-arrival: a sighting whose identifier is already pending
    /// on the opposite side resolves immediately, so no identifier is
    /// ever pending on both sides across a report boundary. A repeat
    /// sighting on the same side is a no-op (first-seen wins).
    pub fn record(&mut self, obs: Observation) {
        let side = if obs.source == self.side_a {
            Side::A
        } else if obs.source == self.side_b {
            Side::B
        } else {
            // Not our pair; connectors may fan out wider than one matcher.
            trace!(source = %obs.source, id = %obs.entry.id, "Ignoring observation for foreign label");
            return;
        };

        let (own, opposite) = match side {
            Side::A => (&mut self.pending_a, &mut self.pending_b),
            Side::B => (&mut self.pending_b, &mut self.pending_a),
        };

        if let Some(opposite_at) = opposite.remove(&obs.entry.id) {
            let latency = (obs.observed_at - opposite_at).abs();
            self.matched += 1;
            match &mut self.latency {
                Some(stats) => stats.fold(latency),
                None => self.latency = Some(LatencyStats::single(latency)),
            }
            debug!(
                id = %obs.entry.id,
                source = %obs.source,
                latency_ms = latency.whole_milliseconds() as i64,
                "Matched entry across sides"
            );
        } else if own.contains_key(&obs.entry.id) {
            trace!(id = %obs.entry.id, source = %obs.source, "Duplicate sighting, keeping earliest");
        } else {
            own.insert(obs.entry.id.clone(), obs.observed_at);
        }
    }

    /// Produce the report for the interval ending at `now` and reset the
    /// interval accumulators.
    ///
    /// Entries older than the staleness threshold are evicted here and
    /// counted as permanently missing from the other side; everything
    /// still inside the window stays pending for the next interval.
    pub fn report(&mut self, now: OffsetDateTime) -> MatchReport {
        let deadline = now - self.staleness;
        let a_only = evict_stale(&mut self.pending_a, deadline);
        let b_only = evict_stale(&mut self.pending_b, deadline);

        if a_only > 0 || b_only > 0 {
            warn!(
                side_a = %self.side_a,
                side_b = %self.side_b,
                a_only,
                b_only,
                "Evicted stale unmatched entries"
            );
        }

        let report = MatchReport {
            side_a: self.side_a.clone(),
            side_b: self.side_b.clone(),
            matched: self.matched,
            a_only,
            b_only,
            latency: self.latency,
            pending_a: self.pending_a.len(),
            pending_b: self.pending_b.len(),
        };

        self.matched = 0;
        self.latency = None;

        report
    }

    /// Whether an identifier is pending on either side. Test hook.
    #[cfg(test)]
    fn is_pending(&self, id: &str) -> bool {
        self.pending_a.contains_key(id) || self.pending_b.contains_key(id)
    }
}

/// Remove entries whose age exceeds the threshold (observed strictly
/// before `deadline`), returning how many were dropped.
fn evict_stale(pending: &mut HashMap<CompactString, OffsetDateTime>, deadline: OffsetDateTime) -> u64 {
    let before = pending.len();
    pending.retain(|id, observed_at| {
        let keep = *observed_at >= deadline;
        if !keep {
            debug!(id = %id, "Entry aged out unmatched");
        }
        keep
    });
    (before - pending.len()) as u64
}

/// Emit a report to the log sink, structured fields plus JSON snapshot.
fn emit(report: &MatchReport) {
    let json = serde_json::to_string(report).unwrap_or_default();
    info!(
        side_a = %report.side_a,
        side_b = %report.side_b,
        matched = report.matched,
        a_only = report.a_only,
        b_only = report.b_only,
        pending_a = report.pending_a,
        pending_b = report.pending_b,
        snapshot = %json,
        "{report}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::FeedEntry;
    use crate::events::matcher_event_channel;
    use time::macros::datetime;

    fn obs(source: SourceLabel, id: &str, at: OffsetDateTime) -> Observation {
        Observation::new(source, FeedEntry::new(id), at)
    }

    fn matcher() -> PairMatcher {
        PairMatcher::new(SourceLabel::push(), SourceLabel::pull(), Duration::seconds(60))
    }

    const T0: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    #[test]
    fn test_match_latency() {
        let mut m = matcher();
        m.record(obs(SourceLabel::push(), "n-42", T0 + Duration::seconds(100)));
        m.record(obs(SourceLabel::pull(), "n-42", T0 + Duration::seconds(130)));

        let report = m.report(T0 + Duration::seconds(131));
        assert_eq!(report.matched, 1);
        assert_eq!(report.a_only, 0);
        assert_eq!(report.b_only, 0);
        let latency = report.latency.unwrap();
        assert_eq!(latency.min_ms, 30_000);
        assert_eq!(latency.max_ms, 30_000);
        assert!(!m.is_pending("n-42"));
    }

    #[test]
    fn test_match_is_order_independent() {
        // B before A gives the same latency magnitude.
        let mut m = matcher();
        m.record(obs(SourceLabel::pull(), "x", T0 + Duration::seconds(130)));
        m.record(obs(SourceLabel::push(), "x", T0 + Duration::seconds(100)));

        let report = m.report(T0 + Duration::seconds(131));
        assert_eq!(report.matched, 1);
        assert_eq!(report.latency.unwrap().mean_ms, 30_000);
    }

    #[test]
    fn test_idempotent_ingestion() {
        let mut m = matcher();
        let sighting = obs(SourceLabel::push(), "a", T0);
        m.record(sighting.clone());
        m.record(sighting);

        let report = m.report(T0 + Duration::seconds(1));
        assert_eq!(report.pending_a, 1);
        assert_eq!(report.matched, 0);

        // The single pending entry matches exactly once.
        m.record(obs(SourceLabel::pull(), "a", T0 + Duration::seconds(2)));
        let report = m.report(T0 + Duration::seconds(3));
        assert_eq!(report.matched, 1);
        assert_eq!(report.pending_a, 0);
    }

    #[test]
    fn test_first_seen_wins() {
        let mut m = matcher();
        m.record(obs(SourceLabel::push(), "a", T0));
        m.record(obs(SourceLabel::push(), "a", T0 + Duration::seconds(20)));
        // Match against the earliest sighting, not the duplicate.
        m.record(obs(SourceLabel::pull(), "a", T0 + Duration::seconds(30)));

        let report = m.report(T0 + Duration::seconds(31));
        assert_eq!(report.matched, 1);
        assert_eq!(report.latency.unwrap().mean_ms, 30_000);
    }

    #[test]
    fn test_staleness_eviction() {
        let mut m = matcher();
        m.record(obs(SourceLabel::push(), "n-42", T0 + Duration::seconds(100)));

        // Inside the 60s window: still outstanding, nothing resolved.
        let report = m.report(T0 + Duration::seconds(130));
        assert_eq!(report.matched, 0);
        assert_eq!(report.a_only, 0);
        assert_eq!(report.pending_a, 1);

        // Past the window: counted missing-from-B and gone.
        let report = m.report(T0 + Duration::seconds(161));
        assert_eq!(report.a_only, 1);
        assert_eq!(report.matched, 0);
        assert_eq!(report.pending_a, 0);
        assert!(!m.is_pending("n-42"));

        // Eviction is counted in exactly one report.
        let report = m.report(T0 + Duration::seconds(300));
        assert_eq!(report.a_only, 0);
    }

    #[test]
    fn test_no_double_counting() {
        let mut m = matcher();
        m.record(obs(SourceLabel::push(), "m1", T0));
        m.record(obs(SourceLabel::pull(), "m1", T0 + Duration::seconds(1)));
        m.record(obs(SourceLabel::push(), "m2", T0));
        m.record(obs(SourceLabel::pull(), "gone-b", T0));
        m.record(obs(SourceLabel::push(), "fresh", T0 + Duration::seconds(90)));

        let report = m.report(T0 + Duration::seconds(70));
        // m1 matched, m2 and gone-b evicted, fresh still pending.
        assert_eq!(report.matched, 1);
        assert_eq!(report.a_only, 1);
        assert_eq!(report.b_only, 1);
        assert_eq!(report.resolved(), 3);
        assert_eq!(report.pending_a, 1);
    }

    #[test]
    fn test_counters_reset_between_reports() {
        let mut m = matcher();
        m.record(obs(SourceLabel::push(), "a", T0));
        m.record(obs(SourceLabel::pull(), "a", T0 + Duration::seconds(5)));

        let report = m.report(T0 + Duration::seconds(6));
        assert_eq!(report.matched, 1);

        let report = m.report(T0 + Duration::seconds(7));
        assert_eq!(report.matched, 0);
        assert!(report.latency.is_none());
    }

    #[test]
    fn test_foreign_label_ignored() {
        let mut m = matcher();
        m.record(obs(SourceLabel::long_pull(), "a", T0));
        let report = m.report(T0 + Duration::seconds(1));
        assert_eq!(report.pending_a, 0);
        assert_eq!(report.pending_b, 0);
    }

    #[tokio::test]
    async fn test_run_loop_processes_inbox_in_order() {
        let (tx, rx) = matcher_event_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let m = matcher();
        let handle = tokio::spawn(m.run(rx, shutdown_rx));

        tx.send(MatcherEvent::Observation(obs(SourceLabel::push(), "a", T0)))
            .await
            .unwrap();
        tx.send(MatcherEvent::Observation(obs(
            SourceLabel::pull(),
            "a",
            T0 + Duration::seconds(2),
        )))
        .await
        .unwrap();
        tx.send(MatcherEvent::Report).await.unwrap();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

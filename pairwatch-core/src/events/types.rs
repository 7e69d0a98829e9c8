//! Event type definitions for the monitor's message-passing layer.
//!
//! Every component owns its state exclusively and is driven by exactly
//! one inbox; these are the messages that flow through those inboxes.
//! Observations and report ticks share the matcher's inbox so that a
//! report always sees every observation delivered before it.

use crate::entities::Observation;

/// Inbox message for a [`PairMatcher`](crate::processors::PairMatcher).
///
/// Data and control share one channel: a `Report` tick is ordered after
/// all observations that were forwarded before it.
#[derive(Debug, Clone)]
pub enum MatcherEvent {
    /// A connector saw a feed entry.
    Observation(Observation),
    /// Produce and emit a discrepancy report for the elapsed interval.
    Report,
}

/// Tick telling a pull connector to fetch everything since its cursor.
///
/// Cadence is owned by the orchestrator's tickers, not by the connector.
#[derive(Debug, Clone, Copy)]
pub struct PollTick;

/// Lifecycle commands for the streaming connector.
///
/// Delivered through the connector's single command channel, so a
/// `Cancel` is ordered after any `Connect` issued before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushCommand {
    /// Establish the long-lived upstream connection and start forwarding.
    /// No-op while already connected.
    Connect,
    /// Tear down the connection and stop forwarding. No-op while not
    /// connected.
    Cancel,
}

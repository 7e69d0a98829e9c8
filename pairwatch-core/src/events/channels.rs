//! Event channel factories and handles.
//!
//! Provides factory functions for creating the typed channels that wire
//! connectors, matchers and the orchestrator's tickers together.

use super::types::{MatcherEvent, PollTick, PushCommand};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// Enough to absorb bursts from the streaming connector while keeping
/// memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for MatcherEvent messages.
pub type MatcherEventSender = mpsc::Sender<MatcherEvent>;
/// Receiver handle for MatcherEvent messages.
pub type MatcherEventReceiver = mpsc::Receiver<MatcherEvent>;

/// Sender handle for PollTick messages.
pub type PollTickSender = mpsc::Sender<PollTick>;
/// Receiver handle for PollTick messages.
pub type PollTickReceiver = mpsc::Receiver<PollTick>;

/// Sender handle for PushCommand messages.
pub type PushCommandSender = mpsc::Sender<PushCommand>;
/// Receiver handle for PushCommand messages.
pub type PushCommandReceiver = mpsc::Receiver<PushCommand>;

/// Create a new MatcherEvent channel.
///
/// One channel per matcher instance; clone the sender for every
/// connector and ticker that feeds it.
pub fn matcher_event_channel() -> (MatcherEventSender, MatcherEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new PollTick channel.
///
/// Each pull connector has its own tick channel and schedule.
pub fn poll_tick_channel() -> (PollTickSender, PollTickReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new PushCommand channel.
pub fn push_command_channel() -> (PushCommandSender, PushCommandReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

//! Long-running processors driven by message-passing inboxes.
//!
//! - `PairMatcher`: receives `MatcherEvent`, correlates observations
//!   across two source labels and emits periodic discrepancy reports
//! - `PushConnector`: receives `PushCommand`, forwards streamed entries
//! - `PullConnector`: receives `PollTick`, fetches since its cursor and
//!   forwards fetched entries
//!
//! Each processor owns its state exclusively and processes one message
//! at a time; cross-processor communication is channels only.

pub mod pair_matcher;
pub mod pull_connector;
pub mod push_connector;

pub use pair_matcher::PairMatcher;
pub use pull_connector::{Cursor, HttpPullSource, PullConnector, PullError, PullPage, PullSource};
pub use push_connector::{PushConnector, PushError};

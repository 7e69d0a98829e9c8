//! Core feed types shared by connectors and matchers.
//!
//! A [`FeedEntry`] is one unit of the upstream notification stream. The
//! same entry is delivered independently over the push and pull channels,
//! identified by the same opaque `id` on both. Connectors wrap each entry
//! they receive in an [`Observation`] carrying the connector's
//! [`SourceLabel`] and the local receipt time.

use compact_str::CompactString;
use serde::Deserialize;
use time::OffsetDateTime;

/// Label identifying the connector a feed entry was observed through.
///
/// A small fixed set of labels is used per deployment ("push", "pull",
/// "long-pull"). Labels are compared by value; a matcher is configured
/// with exactly two of them and ignores everything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SourceLabel(CompactString);

impl SourceLabel {
    pub fn new(label: impl Into<CompactString>) -> Self {
        Self(label.into())
    }

    /// The streaming (push) delivery channel.
    pub fn push() -> Self {
        Self::new("push")
    }

    /// The polling (pull) delivery channel.
    pub fn pull() -> Self {
        Self::new("pull")
    }

    /// The slower polling channel used to cross-check the pull channel.
    pub fn long_pull() -> Self {
        Self::new("long-pull")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of the upstream feed, immutable once observed.
///
/// `id` is assigned upstream and stable across delivery channels; it is
/// the correlation key for pair matching. `last_modified` is the time the
/// upstream system claims to have produced the entry, when the wire
/// format carries one. It is logged but never used for matching.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedEntry {
    pub id: CompactString,
    #[serde(default, rename = "lastModified", with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
}

impl FeedEntry {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self {
            id: id.into(),
            last_modified: None,
        }
    }
}

/// A labeled, timestamped sighting of a feed entry.
///
/// Created by a connector on every successfully parsed entry and consumed
/// by each matcher registered for the connector's label. `observed_at` is
/// the local receipt time, not the upstream production time.
#[derive(Debug, Clone)]
pub struct Observation {
    pub source: SourceLabel,
    pub entry: FeedEntry,
    pub observed_at: OffsetDateTime,
}

impl Observation {
    pub fn new(source: SourceLabel, entry: FeedEntry, observed_at: OffsetDateTime) -> Self {
        Self {
            source,
            entry,
            observed_at,
        }
    }

    /// Observation stamped with the current wall-clock time.
    pub fn now(source: SourceLabel, entry: FeedEntry) -> Self {
        Self::new(source, entry, OffsetDateTime::now_utc())
    }
}

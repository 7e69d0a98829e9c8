//! PullConnector processor.
//!
//! The PullConnector is responsible for:
//! - Receiving `PollTick` events on a cadence owned by the orchestrator
//! - Fetching everything after its resumption cursor from the pull feed
//! - Forwarding one observation per fetched entry to every registered
//!   matcher, stamped with the receipt time
//! - Advancing the cursor only after a successful fetch
//!
//! A failed tick leaves the cursor untouched and is retried by the next
//! scheduled tick; no backoff state is kept in between. The cursor never
//! rewinds, so every upstream entry reaches the matcher layer at least
//! once across retries (duplicates are absorbed by matcher dedup).

use crate::entities::{FeedEntry, HttpConfig, Observation, SourceLabel};
use crate::events::{MatcherEvent, MatcherEventSender, PollTickReceiver};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Errors that can occur while polling the pull feed.
#[derive(Debug, Error)]
pub enum PullError {
    /// Request could not be built.
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    /// Network-level request failure.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The feed answered with a non-success status.
    #[error("feed returned status {status}")]
    Status { status: u16 },

    /// The response body could not be decoded.
    #[error("malformed feed body: {0}")]
    Parse(#[from] serde_json::Error),
}

impl PullError {
    /// Whether this failure looks like rejected credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, PullError::Status { status: 401 | 403 })
    }
}

/// Resumption position in the pull feed.
///
/// Ordered by the `since` timestamp; an optional continuation token from
/// the feed rides along opaquely. Only [`advance_to`](Cursor::advance_to)
/// mutates a cursor, and it never moves backwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub since: OffsetDateTime,
    pub token: Option<String>,
}

impl Cursor {
    /// Start from the beginning of the feed.
    pub fn beginning() -> Self {
        Self {
            since: OffsetDateTime::UNIX_EPOCH,
            token: None,
        }
    }

    /// Start from the current time, skipping history.
    pub fn now() -> Self {
        Self {
            since: OffsetDateTime::now_utc(),
            token: None,
        }
    }

    /// Advance to `end` if it is ahead of the current position.
    ///
    /// A stale or equal position is ignored, keeping the cursor
    /// non-decreasing regardless of what a page reports.
    pub fn advance_to(&mut self, end: Cursor) {
        if end.since > self.since {
            *self = end;
        }
    }
}

/// One page of the pull feed.
#[derive(Debug, Clone)]
pub struct PullPage {
    pub entries: Vec<FeedEntry>,
    /// Position after the last entry, when the feed supplies one. `None`
    /// leaves the connector's cursor unchanged.
    pub end: Option<Cursor>,
}

/// Fetch seam for the pull feed.
///
/// The production implementation is [`HttpPullSource`]; tests substitute
/// scripted sources to exercise cursor and fan-out behavior.
#[async_trait]
pub trait PullSource: Send + Sync {
    /// Fetch all entries after `cursor`.
    async fn fetch_since(&self, cursor: &Cursor) -> Result<PullPage, PullError>;
}

/// Wire schema of one pull response.
#[derive(Debug, Deserialize)]
struct PullResponseBody {
    #[serde(default)]
    notifications: Vec<FeedEntry>,
    #[serde(default)]
    links: Vec<PullLink>,
}

#[derive(Debug, Deserialize)]
struct PullLink {
    href: String,
    rel: String,
}

/// HTTP implementation of [`PullSource`] over the feed's batch endpoint.
///
/// Issues `GET <path>?since=<cursor>` with basic auth and decodes the
/// JSON body into entries plus an optional `next` continuation link.
pub struct HttpPullSource {
    config: HttpConfig,
    client: reqwest::Client,
}

impl HttpPullSource {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl PullSource for HttpPullSource {
    async fn fetch_since(&self, cursor: &Cursor) -> Result<PullPage, PullError> {
        let mut url = self.config.url()?;
        let since = cursor
            .since
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        url.query_pairs_mut().append_pair("since", &since);
        if let Some(token) = &cursor.token {
            url.query_pairs_mut().append_pair("page", token);
        }

        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PullError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let body: PullResponseBody = serde_json::from_slice(&body)?;

        let end = page_end(&body);
        Ok(PullPage {
            entries: body.notifications,
            end,
        })
    }
}

/// Position after the page: the latest entry timestamp plus the feed's
/// `next` link, or `None` for pages that carry neither entries with
/// timestamps nor a usable position.
fn page_end(body: &PullResponseBody) -> Option<Cursor> {
    let since = body
        .notifications
        .iter()
        .filter_map(|entry| entry.last_modified)
        .max()?;
    let token = body
        .links
        .iter()
        .find(|link| link.rel == "next")
        .map(|link| link.href.clone());
    Some(Cursor { since, token })
}

/// PullConnector drives a [`PullSource`] from an external tick schedule
/// and fans fetched entries out to every registered matcher.
pub struct PullConnector<S: PullSource> {
    label: SourceLabel,
    source: S,
    targets: Vec<MatcherEventSender>,
    cursor: Cursor,
    failed_fetches: u64,
}

impl<S: PullSource> PullConnector<S> {
    pub fn new(label: SourceLabel, source: S, targets: Vec<MatcherEventSender>, start: Cursor) -> Self {
        Self {
            label,
            source,
            targets,
            cursor: start,
            failed_fetches: 0,
        }
    }

    /// Current resumption position.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Run the connector until shutdown is signaled or the tick channel
    /// closes.
    pub async fn run(mut self, mut ticks: PollTickReceiver, mut shutdown_rx: watch::Receiver<bool>) {
        info!(label = %self.label, "PullConnector started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(label = %self.label, "PullConnector received shutdown signal");
                        break;
                    }
                }

                Some(_tick) = ticks.recv() => {
                    self.fetch_once().await;
                }

                else => {
                    info!(label = %self.label, "PollTick channel closed");
                    break;
                }
            }
        }

        info!(label = %self.label, "PullConnector shutdown complete");
    }

    /// One "fetch since last" invocation.
    ///
    /// The cursor moves only on the success path; any failure leaves
    /// progress untouched for the next tick.
    async fn fetch_once(&mut self) {
        match self.source.fetch_since(&self.cursor).await {
            Ok(page) => {
                let observed_at = OffsetDateTime::now_utc();
                let count = page.entries.len();

                for entry in page.entries {
                    let obs = Observation::new(self.label.clone(), entry, observed_at);
                    for target in &self.targets {
                        if let Err(e) = target
                            .send(MatcherEvent::Observation(obs.clone()))
                            .await
                        {
                            warn!(label = %self.label, error = %e, "Matcher inbox closed, dropping observation");
                        }
                    }
                }

                if let Some(end) = page.end {
                    self.cursor.advance_to(end);
                }

                debug!(
                    label = %self.label,
                    entries = count,
                    since = %self.cursor.since,
                    "Pull fetch succeeded"
                );
            }
            Err(e) => {
                self.failed_fetches += 1;
                if e.is_auth() {
                    tracing::error!(
                        label = %self.label,
                        error = %e,
                        "Pull feed rejected credentials, will retry next tick"
                    );
                } else {
                    warn!(
                        label = %self.label,
                        error = %e,
                        failed_fetches = self.failed_fetches,
                        "Pull fetch failed, cursor unchanged"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::matcher_event_channel;
    use std::sync::Mutex;
    use time::Duration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    /// Source that replays a scripted sequence of results.
    struct ScriptedSource {
        script: Mutex<Vec<Result<PullPage, PullError>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<PullPage, PullError>>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl PullSource for ScriptedSource {
        async fn fetch_since(&self, _cursor: &Cursor) -> Result<PullPage, PullError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(PullPage {
                    entries: Vec::new(),
                    end: None,
                });
            }
            script.remove(0)
        }
    }

    fn page(ids: &[&str], end_secs: i64) -> PullPage {
        PullPage {
            entries: ids.iter().map(|id| FeedEntry::new(*id)).collect(),
            end: Some(Cursor {
                since: T0 + Duration::seconds(end_secs),
                token: None,
            }),
        }
    }

    fn start() -> Cursor {
        Cursor {
            since: T0,
            token: None,
        }
    }

    #[tokio::test]
    async fn test_cursor_monotonic_across_mixed_ticks() {
        let source = ScriptedSource::new(vec![
            Ok(page(&["a"], 10)),
            Err(PullError::Status { status: 503 }),
            Ok(page(&["b"], 25)),
            Err(PullError::Status { status: 500 }),
        ]);
        let (tx, mut rx) = matcher_event_channel();
        let mut connector =
            PullConnector::new(SourceLabel::pull(), source, vec![tx], start());

        connector.fetch_once().await;
        assert_eq!(connector.cursor().since, T0 + Duration::seconds(10));

        // Failure leaves the cursor where the last success put it.
        connector.fetch_once().await;
        assert_eq!(connector.cursor().since, T0 + Duration::seconds(10));

        connector.fetch_once().await;
        assert_eq!(connector.cursor().since, T0 + Duration::seconds(25));

        connector.fetch_once().await;
        assert_eq!(connector.cursor().since, T0 + Duration::seconds(25));

        // Both successful pages were forwarded despite the failures.
        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let MatcherEvent::Observation(obs) = event {
                ids.push(obs.entry.id.to_string());
            }
        }
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stale_page_end_never_rewinds() {
        let source = ScriptedSource::new(vec![Ok(page(&["old"], -100))]);
        let (tx, _rx) = matcher_event_channel();
        let mut connector =
            PullConnector::new(SourceLabel::pull(), source, vec![tx], start());

        connector.fetch_once().await;
        assert_eq!(connector.cursor().since, T0);
    }

    #[tokio::test]
    async fn test_empty_page_leaves_cursor_unchanged() {
        let source = ScriptedSource::new(vec![Ok(PullPage {
            entries: Vec::new(),
            end: None,
        })]);
        let (tx, _rx) = matcher_event_channel();
        let mut connector =
            PullConnector::new(SourceLabel::pull(), source, vec![tx], start());

        connector.fetch_once().await;
        assert_eq!(connector.cursor(), &start());
    }

    #[tokio::test]
    async fn test_fan_out_to_every_target() {
        let source = ScriptedSource::new(vec![Ok(page(&["x", "y"], 5))]);
        let (tx1, mut rx1) = matcher_event_channel();
        let (tx2, mut rx2) = matcher_event_channel();
        let mut connector =
            PullConnector::new(SourceLabel::pull(), source, vec![tx1, tx2], start());

        connector.fetch_once().await;

        for rx in [&mut rx1, &mut rx2] {
            let mut ids = Vec::new();
            while let Ok(MatcherEvent::Observation(obs)) = rx.try_recv() {
                ids.push(obs.entry.id.to_string());
            }
            assert_eq!(ids, vec!["x", "y"]);
        }
    }

    #[test]
    fn test_page_end_from_body() {
        let body: PullResponseBody = serde_json::from_str(
            r#"{
                "notifications": [
                    {"id": "n-1", "lastModified": "2024-05-01T12:00:05Z"},
                    {"id": "n-2", "lastModified": "2024-05-01T12:00:30Z"},
                    {"id": "n-3"}
                ],
                "links": [{"href": "opaque-token", "rel": "next"}]
            }"#,
        )
        .unwrap();
        let end = page_end(&body).unwrap();
        assert_eq!(end.since, T0 + Duration::seconds(30));
        assert_eq!(end.token.as_deref(), Some("opaque-token"));
    }

    #[test]
    fn test_page_end_absent_without_timestamps() {
        let body: PullResponseBody =
            serde_json::from_str(r#"{"notifications": [{"id": "n-1"}]}"#).unwrap();
        assert!(page_end(&body).is_none());
    }
}

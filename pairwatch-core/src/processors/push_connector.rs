//! PushConnector processor.
//!
//! The PushConnector is responsible for:
//! - Holding the long-lived streaming connection to the push feed
//! - Forwarding one observation per streamed entry, in arrival order,
//!   to every registered matcher
//! - Reconnecting with capped exponential backoff when the stream drops
//! - Skipping (and counting) malformed lines so one bad entry never
//!   blocks the stream
//!
//! Lifecycle is driven by [`PushCommand`]s on the connector's inbox:
//! `Connect` while disconnected opens the stream, `Cancel` closes it and
//! returns the connector to idle. Both are no-ops in the other state.
//!
//! The feed is a chunked HTTP response; each line of the body is a JSON
//! array of entries, with empty arrays and blank lines serving as
//! heartbeats.

use crate::entities::{FeedEntry, HttpConfig, Observation, SourceLabel};
use crate::events::{MatcherEvent, MatcherEventSender, PushCommand, PushCommandReceiver};
use bytes::Bytes;
use futures_util::StreamExt;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Cap for the reconnect backoff, in seconds.
const MAX_BACKOFF_SECS: u64 = 60;

/// Errors that can occur on the streaming connection.
#[derive(Debug, Error)]
pub enum PushError {
    /// Request could not be built.
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    /// Network-level failure establishing or reading the stream.
    #[error("stream error: {0}")]
    Request(#[from] reqwest::Error),

    /// The feed answered the connection attempt with a non-success status.
    #[error("feed returned status {status}")]
    Status { status: u16 },
}

impl PushError {
    /// Whether this failure looks like rejected credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, PushError::Status { status: 401 | 403 })
    }
}

/// Why the streaming loop handed control back.
enum StreamExit {
    /// Cancel command or closed command channel: back to idle.
    Cancelled,
    /// Shutdown signal: unwind the whole processor.
    Shutdown,
    /// Connection dropped or failed: reconnect after backoff.
    Dropped,
}

/// PushConnector owns the streaming side of the monitor.
pub struct PushConnector {
    label: SourceLabel,
    config: HttpConfig,
    targets: Vec<MatcherEventSender>,
    client: reqwest::Client,
    /// Malformed lines skipped since startup.
    skipped: u64,
}

impl PushConnector {
    pub fn new(label: SourceLabel, config: HttpConfig, targets: Vec<MatcherEventSender>) -> Self {
        Self {
            label,
            config,
            targets,
            // No overall timeout: the stream is expected to stay open
            // indefinitely, with heartbeats keeping it alive.
            client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            skipped: 0,
        }
    }

    /// Run the connector until shutdown is signaled or the command
    /// channel closes.
    ///
    /// Starts idle; the orchestrator sends `Connect` when the monitor
    /// comes up and `Cancel` before shutdown.
    pub async fn run(
        mut self,
        mut commands: PushCommandReceiver,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(label = %self.label, "PushConnector started (idle)");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(label = %self.label, "PushConnector received shutdown signal");
                        break;
                    }
                }

                Some(command) = commands.recv() => {
                    match command {
                        PushCommand::Connect => {
                            if let StreamExit::Shutdown =
                                self.stream_until_cancelled(&mut commands, &mut shutdown_rx).await
                            {
                                break;
                            }
                            info!(label = %self.label, "Streaming stopped, connector idle");
                        }
                        PushCommand::Cancel => {
                            trace!(label = %self.label, "Cancel while not connected is a no-op");
                        }
                    }
                }

                else => {
                    info!(label = %self.label, "PushCommand channel closed");
                    break;
                }
            }
        }

        info!(label = %self.label, skipped = self.skipped, "PushConnector shutdown complete");
    }

    /// Connect and forward entries until cancelled or shut down,
    /// reconnecting with backoff on any drop.
    async fn stream_until_cancelled(
        &mut self,
        commands: &mut PushCommandReceiver,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> StreamExit {
        let mut attempt: u32 = 0;

        loop {
            match self.open_stream().await {
                Ok(response) => {
                    info!(label = %self.label, "Push stream connected");
                    match self.read_stream(response, commands, shutdown_rx).await {
                        StreamExit::Dropped => {
                            // Fresh drop after a successful connect: start
                            // the backoff ladder over.
                            attempt = 0;
                        }
                        exit => return exit,
                    }
                }
                Err(e) if e.is_auth() => {
                    error!(
                        label = %self.label,
                        error = %e,
                        "Push feed rejected credentials, retrying in case of rotation"
                    );
                }
                Err(e) => {
                    warn!(label = %self.label, error = %e, "Push connect failed");
                }
            }

            let delay = backoff_delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(label = %self.label, delay_secs = delay.as_secs(), "Reconnecting after backoff");

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return StreamExit::Shutdown;
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(PushCommand::Cancel) | None => return StreamExit::Cancelled,
                        Some(PushCommand::Connect) => {
                            trace!(label = %self.label, "Connect while reconnecting is a no-op");
                        }
                    }
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Open the long-lived chunked response.
    async fn open_stream(&self) -> Result<reqwest::Response, PushError> {
        let url = self.config.url()?;
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PushError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Consume the body chunk by chunk until cancel, shutdown or drop.
    async fn read_stream(
        &mut self,
        response: reqwest::Response,
        commands: &mut PushCommandReceiver,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> StreamExit {
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return StreamExit::Shutdown;
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(PushCommand::Cancel) | None => {
                            info!(label = %self.label, "Push stream cancelled, connection released");
                            return StreamExit::Cancelled;
                        }
                        Some(PushCommand::Connect) => {
                            trace!(label = %self.label, "Connect while connected is a no-op");
                        }
                    }
                }

                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => self.consume_chunk(&mut buffer, bytes).await,
                        Some(Err(e)) => {
                            warn!(label = %self.label, error = %e, "Push stream read failed");
                            return StreamExit::Dropped;
                        }
                        None => {
                            warn!(label = %self.label, "Push stream ended by upstream");
                            return StreamExit::Dropped;
                        }
                    }
                }
            }
        }
    }

    /// Append a chunk and forward every complete line it finishes.
    async fn consume_chunk(&mut self, buffer: &mut Vec<u8>, chunk: Bytes) {
        buffer.extend_from_slice(&chunk);

        for line in drain_lines(buffer) {
            let entries = match parse_line(&line) {
                Ok(entries) => entries,
                Err(e) => {
                    self.skipped += 1;
                    warn!(
                        label = %self.label,
                        error = %e,
                        skipped = self.skipped,
                        "Skipping malformed push line"
                    );
                    continue;
                }
            };

            let observed_at = OffsetDateTime::now_utc();
            for entry in entries {
                trace!(label = %self.label, id = %entry.id, "Streamed entry");
                let obs = Observation::new(self.label.clone(), entry, observed_at);
                for target in &self.targets {
                    if let Err(e) = target.send(MatcherEvent::Observation(obs.clone())).await {
                        warn!(label = %self.label, error = %e, "Matcher inbox closed, dropping observation");
                    }
                }
            }
        }
    }
}

/// Split off every complete newline-terminated line, leaving the
/// unterminated tail in the buffer.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        lines.push(line);
    }
    lines
}

/// Parse one line of the push stream: a JSON array of feed entries.
///
/// Blank lines and empty arrays are heartbeats and yield no entries.
fn parse_line(line: &[u8]) -> Result<Vec<FeedEntry>, serde_json::Error> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(line)
}

/// Reconnect delay for the given attempt: 2^attempt seconds, capped.
fn backoff_delay(attempt: u32) -> std::time::Duration {
    let seconds = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
    std::time::Duration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_caps() {
        assert_eq!(backoff_delay(0), std::time::Duration::from_secs(1));
        assert_eq!(backoff_delay(1), std::time::Duration::from_secs(2));
        assert_eq!(backoff_delay(5), std::time::Duration::from_secs(32));
        assert_eq!(backoff_delay(6), std::time::Duration::from_secs(60));
        assert_eq!(backoff_delay(100), std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_drain_lines_across_chunk_boundaries() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"[{\"id\":\"a\"}]\n[{\"id\"");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"[{\"id\":\"a\"}]".to_vec()]);
        assert_eq!(buffer, b"[{\"id\"".to_vec());

        buffer.extend_from_slice(b":\"b\"}]\r\n");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"[{\"id\":\"b\"}]".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_line_entries() {
        let entries = parse_line(br#"[{"id":"n-1"},{"id":"n-2"}]"#).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "n-1");
    }

    #[test]
    fn test_parse_line_heartbeats() {
        assert!(parse_line(b"").unwrap().is_empty());
        assert!(parse_line(b"  ").unwrap().is_empty());
        assert!(parse_line(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_line_malformed() {
        assert!(parse_line(b"{not json").is_err());
        // A bare object is not the array the stream promises.
        assert!(parse_line(br#"{"id":"n-1"}"#).is_err());
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_block_stream() {
        let (tx, mut rx) = crate::events::matcher_event_channel();
        let config = HttpConfig::new("localhost", 8080, "/push", "u", "p");
        let mut connector = PushConnector::new(SourceLabel::push(), config, vec![tx]);

        let mut buffer = Vec::new();
        connector
            .consume_chunk(&mut buffer, Bytes::from_static(b"garbage\n[{\"id\":\"ok\"}]\n"))
            .await;

        assert_eq!(connector.skipped, 1);
        match rx.try_recv().unwrap() {
            MatcherEvent::Observation(obs) => assert_eq!(obs.entry.id, "ok"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

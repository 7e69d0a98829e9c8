//! Pairwatch Server
//!
//! Cross-checks the push and pull delivery channels of a notification
//! feed, reporting delivery gaps and latency between them.

mod config;
mod shutdown;
mod tickers;

use clap::Parser;
use config::ConfigLoader;
use pairwatch_core::entities::SourceLabel;
use pairwatch_core::events::{
    MatcherEvent, PollTick, PushCommand, matcher_event_channel, poll_tick_channel,
    push_command_channel,
};
use pairwatch_core::processors::{HttpPullSource, PairMatcher, PullConnector, PushConnector};
use std::path::PathBuf;
use std::time::Duration;
use tickers::TickerSet;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Pairwatch - push/pull notification delivery monitor
#[derive(Parser, Debug)]
#[command(name = "pairwatch-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./pairwatch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting pairwatch-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = ConfigLoader::new(&args.config);
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Shutdown fan-out shared by every processor
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One matcher per compared pair, each with its own serialized inbox
    let (push_pull_tx, push_pull_rx) = matcher_event_channel();
    let (pull_pull_tx, pull_pull_rx) = matcher_event_channel();

    let mut processors = Vec::new();

    processors.push(tokio::spawn(
        PairMatcher::new(SourceLabel::push(), SourceLabel::pull(), config.staleness)
            .run(push_pull_rx, shutdown_rx.clone()),
    ));
    processors.push(tokio::spawn(
        PairMatcher::new(SourceLabel::pull(), SourceLabel::long_pull(), config.staleness)
            .run(pull_pull_rx, shutdown_rx.clone()),
    ));

    // Streaming connector feeds the push<->pull matcher
    let (push_cmd_tx, push_cmd_rx) = push_command_channel();
    processors.push(tokio::spawn(
        PushConnector::new(
            SourceLabel::push(),
            config.push.clone(),
            vec![push_pull_tx.clone()],
        )
        .run(push_cmd_rx, shutdown_rx.clone()),
    ));

    // The pull connector fans out to both matchers; the long-pull
    // connector cross-checks the pull channel against itself on a
    // slower cadence
    let (pull_tick_tx, pull_tick_rx) = poll_tick_channel();
    processors.push(tokio::spawn(
        PullConnector::new(
            SourceLabel::pull(),
            HttpPullSource::new(config.pull.clone()),
            vec![push_pull_tx.clone(), pull_pull_tx.clone()],
            config.start_cursor(),
        )
        .run(pull_tick_rx, shutdown_rx.clone()),
    ));

    let (long_pull_tick_tx, long_pull_tick_rx) = poll_tick_channel();
    processors.push(tokio::spawn(
        PullConnector::new(
            SourceLabel::long_pull(),
            HttpPullSource::new(config.pull.clone()),
            vec![pull_pull_tx.clone()],
            config.start_cursor(),
        )
        .run(long_pull_tick_rx, shutdown_rx.clone()),
    ));

    // Recurring schedules: polls and reports
    let mut tickers = TickerSet::new();
    tickers.spawn("pull", pull_tick_tx, PollTick, Duration::ZERO, config.pull_interval);
    tickers.spawn(
        "long-pull",
        long_pull_tick_tx,
        PollTick,
        Duration::ZERO,
        config.long_pull_interval,
    );
    tickers.spawn(
        "report-push-pull",
        push_pull_tx,
        MatcherEvent::Report,
        config.report_interval,
        config.report_interval,
    );
    tickers.spawn(
        "report-pull-pull",
        pull_pull_tx,
        MatcherEvent::Report,
        Duration::ZERO,
        config.report_interval,
    );

    // Bring up the streaming side
    push_cmd_tx.send(PushCommand::Connect).await?;
    tracing::info!("Monitor started");

    shutdown::shutdown_signal().await;

    // Ordered teardown: stop the stream first, then the schedules, then
    // signal every processor and wait for them to drain
    let _ = push_cmd_tx.send(PushCommand::Cancel).await;
    tickers.abort_all();
    let _ = shutdown_tx.send(true);
    for handle in processors {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

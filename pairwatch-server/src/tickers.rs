//! Recurring schedules owned by the orchestrator.
//!
//! Each entry is a named `(initial delay, period)` pair driving one
//! message into one channel; poll and report cadences are all expressed
//! this way. The whole set is aborted as a unit on shutdown.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

/// The orchestrator's list of recurring schedules.
pub struct TickerSet {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TickerSet {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Spawn a ticker that sends `message` into `tx` after
    /// `initial_delay` and then every `period`.
    ///
    /// The ticker exits on its own when the receiving side goes away.
    pub fn spawn<T>(
        &mut self,
        name: &'static str,
        tx: mpsc::Sender<T>,
        message: T,
        initial_delay: Duration,
        period: Duration,
    ) where
        T: Clone + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let start = Instant::now() + initial_delay;
            let mut ticks = interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                if tx.send(message.clone()).await.is_err() {
                    debug!(ticker = name, "Receiver closed, ticker stopping");
                    break;
                }
            }
        });

        debug!(
            ticker = name,
            initial_delay_secs = initial_delay.as_secs(),
            period_secs = period.as_secs(),
            "Ticker scheduled"
        );
        self.handles.push((name, handle));
    }

    /// Cancel every schedule. Called once during shutdown.
    pub fn abort_all(self) {
        for (name, handle) in self.handles {
            debug!(ticker = name, "Ticker cancelled");
            handle.abort();
        }
        info!("All tickers cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticker_honors_initial_delay_and_period() {
        let (tx, mut rx) = mpsc::channel::<u32>(8);
        let mut tickers = TickerSet::new();
        tickers.spawn(
            "test",
            tx,
            7,
            Duration::from_secs(3),
            Duration::from_secs(5),
        );

        let start = Instant::now();
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(start.elapsed(), Duration::from_secs(8));

        tickers.abort_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_when_receiver_drops() {
        let (tx, rx) = mpsc::channel::<u32>(8);
        let mut tickers = TickerSet::new();
        tickers.spawn(
            "test",
            tx,
            1,
            Duration::ZERO,
            Duration::from_secs(1),
        );
        drop(rx);

        // The ticker notices on its next send and exits by itself.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let (_, handle) = tickers.handles.remove(0);
        assert!(handle.await.is_ok());
    }
}

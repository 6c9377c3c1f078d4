//! Audio Level Monitor
//!
//! Polls the track analyser at UI-refresh cadence and publishes a
//! normalized level in `[0, 1]`. The polling loop is a [`Ticker`], so it
//! stops deterministically when the owning session is torn down.

use crate::media::Analyser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default polling period, roughly one display frame.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(16);

// `interval` panics on a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Mean bin magnitude scaled to `[0, 1]`.
pub fn normalized_level(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u64 = bins.iter().map(|&b| u64::from(b)).sum();
    let level = (sum as f64 / bins.len() as f64 / 255.0) as f32;
    if level.is_finite() {
        level.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A periodic task that runs until stopped or dropped.
pub struct Ticker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick(),
                }
            }
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop and waits for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct LevelMonitor {
    ticker: Option<Ticker>,
    output: Arc<watch::Sender<f32>>,
}

impl LevelMonitor {
    /// Starts publishing levels from `analyser` into `output`.
    ///
    /// Without an analyser (or with one that has no bins) the output is
    /// pinned to 0 and no loop runs.
    pub fn start(
        analyser: Option<Arc<dyn Analyser>>,
        output: Arc<watch::Sender<f32>>,
        period: Duration,
    ) -> Self {
        output.send_replace(0.0);
        let ticker = match analyser {
            Some(analyser) if analyser.bin_count() > 0 => {
                let mut bins = vec![0u8; analyser.bin_count()];
                let sink = output.clone();
                Some(Ticker::spawn(period, move || {
                    analyser.byte_frequency_data(&mut bins);
                    sink.send_replace(normalized_level(&bins));
                }))
            }
            _ => {
                debug!("No analyser available, level output stays at 0");
                None
            }
        };
        Self { ticker, output }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(Ticker::is_running)
    }

    pub async fn stop(&mut self) {
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.stop().await;
        }
        self.ticker = None;
        self.output.send_replace(0.0);
    }
}

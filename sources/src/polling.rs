use async_trait::async_trait;
use scan_resolve_common::frame::Frame;
use scan_resolve_common::source::{FrameSource, SourceError};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Polling-based fallback: periodically fetch single snapshots.
///
/// Failed fetches are skipped; more than `max_failures` in a row surfaces the
/// last error.
pub struct PollingSource {
    url: String,
    client: reqwest::Client,
    ticker: Interval,
    seq: u64,
    failures: u32,
    max_failures: u32,
    closed: bool,
}

impl PollingSource {
    pub fn new(
        url: &str,
        interval: Duration,
        connect_timeout: Duration,
        max_failures: u32,
    ) -> Result<Self, SourceError> {
        if interval.is_zero() {
            return Err(SourceError::Config("polling interval must be non-zero".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(url, interval_ms = interval.as_millis() as u64, "polling camera snapshots");
        Ok(Self {
            url: url.to_string(),
            client,
            ticker,
            seq: 0,
            failures: 0,
            max_failures,
            closed: false,
        })
    }

    fn record_failure(&mut self, err: SourceError) -> Result<(), SourceError> {
        self.failures += 1;
        warn!(error = %err, failures = self.failures, "failed to fetch camera frame");
        if self.failures > self.max_failures {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for PollingSource {
    async fn next(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }

        loop {
            self.ticker.tick().await;

            let err = match self.client.get(&self.url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(body) => {
                        let seq = self.seq;
                        self.seq += 1;
                        self.failures = 0;
                        debug!(seq, bytes = body.len(), "polled camera frame");
                        return Ok(Some(Frame::captured_now(body, seq)));
                    }
                    Err(e) => SourceError::Stream(e.to_string()),
                },
                Ok(resp) => SourceError::Status(resp.status().as_u16()),
                Err(e) => SourceError::Connect(e.to_string()),
            };
            self.record_failure(err)?;
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            info!(url = %self.url, frames = self.seq, "stopped polling camera");
        }
        self.closed = true;
    }

    fn name(&self) -> &str {
        "polling"
    }
}

//! Periodic statistics summary.

use crate::metrics::{
    API_CONNECTED, FRAMES_RECEIVED_TOTAL, FRAMES_SENT_TOTAL, RECONNECT_TOTAL, TICKS_DROPPED_TOTAL,
    TICKS_RECEIVED_TOTAL, TICKS_WRITTEN_TOTAL, WRITER_ERRORS_TOTAL,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::IntCounterVec;
use tracing::info;

/// Point-in-time copy of the process counters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub connected: bool,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bid_ticks_received: u64,
    pub ask_ticks_received: u64,
    pub ticks_dropped: u64,
    pub reconnects: u64,
    pub writer_errors: u64,
    /// Ticks written per symbol, sorted by symbol name.
    pub ticks_written: Vec<(String, u64)>,
}

/// Every label value of a one-label counter with its count.
fn label_counts(counter: &IntCounterVec) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> = counter
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .filter_map(|metric| {
            let label = metric.get_label().first()?;
            Some((
                label.get_value().to_string(),
                metric.get_counter().get_value() as u64,
            ))
        })
        .collect();
    counts.sort();
    counts
}

impl StatsSnapshot {
    /// Read the counters. Symbols are whatever has been written so far, so
    /// symbols discovered after startup are included.
    pub fn capture() -> Self {
        Self {
            connected: API_CONNECTED.get() == 1,
            frames_sent: FRAMES_SENT_TOTAL.get(),
            frames_received: FRAMES_RECEIVED_TOTAL.get(),
            bid_ticks_received: TICKS_RECEIVED_TOTAL.with_label_values(&["Bid"]).get(),
            ask_ticks_received: TICKS_RECEIVED_TOTAL.with_label_values(&["Ask"]).get(),
            ticks_dropped: label_counts(&TICKS_DROPPED_TOTAL)
                .iter()
                .map(|(_, n)| n)
                .sum(),
            reconnects: RECONNECT_TOTAL.get(),
            writer_errors: WRITER_ERRORS_TOTAL.get(),
            ticks_written: label_counts(&TICKS_WRITTEN_TOTAL),
        }
    }

    pub fn total_written(&self) -> u64 {
        self.ticks_written.iter().map(|(_, n)| n).sum()
    }
}

/// Logs a summary of the counters since process start.
pub struct StatsReporter {
    start_time: DateTime<Utc>,
}

impl StatsReporter {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::capture()
    }

    /// Output statistics to logs.
    pub fn output_summary(&self) {
        let s = self.snapshot();
        let duration = Utc::now() - self.start_time;

        info!("========== Recorder Statistics ==========");
        info!(
            "Since {} ({} hours {} minutes)",
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            duration.num_hours(),
            duration.num_minutes() % 60
        );
        info!(
            connected = s.connected,
            frames_sent = s.frames_sent,
            frames_received = s.frames_received,
            reconnects = s.reconnects,
            "Connection"
        );
        info!(
            bid = s.bid_ticks_received,
            ask = s.ask_ticks_received,
            written = s.total_written(),
            dropped = s.ticks_dropped,
            writer_errors = s.writer_errors,
            "Ticks"
        );
        for (symbol, written) in s.ticks_written.iter().filter(|(_, n)| *n > 0) {
            info!("  {symbol}: {written} written");
        }
        info!("=========================================");
    }
}

impl Default for StatsReporter {
    fn default() -> Self {
        Self::new()
    }
}

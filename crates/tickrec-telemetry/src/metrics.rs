//! Prometheus metrics for the tick recorder.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error caught at first use.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// API connection state (1 = connected, 0 = disconnected).
pub static API_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tickrec_api_connected", "API connection state (1=connected)").unwrap()
});

pub static FRAMES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tickrec_frames_sent_total", "Total frames written to the API").unwrap()
});

pub static FRAMES_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickrec_frames_received_total",
        "Total frames received from the API"
    )
    .unwrap()
});

/// Labels: side (Bid/Ask)
pub static TICKS_RECEIVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickrec_ticks_received_total",
        "Total ticks received",
        &["side"]
    )
    .unwrap()
});

/// Labels: symbol
pub static TICKS_WRITTEN_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickrec_ticks_written_total",
        "Total ticks appended to day files",
        &["symbol"]
    )
    .unwrap()
});

/// Labels: reason (unknown_account/unknown_symbol)
pub static TICKS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickrec_ticks_dropped_total",
        "Total ticks discarded without being written",
        &["reason"]
    )
    .unwrap()
});

pub static RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tickrec_reconnect_total", "Total API reconnection attempts").unwrap()
});

pub static WRITER_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickrec_writer_errors_total",
        "Total failed tick file appends"
    )
    .unwrap()
});

/// Labels: account
pub static TICK_BUFFER_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tickrec_tick_buffer_depth",
        "Ticks waiting to be written",
        &["account"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn api_connected() {
        API_CONNECTED.set(1);
    }

    pub fn api_disconnected() {
        API_CONNECTED.set(0);
    }

    pub fn frame_sent() {
        FRAMES_SENT_TOTAL.inc();
    }

    pub fn frame_received() {
        FRAMES_RECEIVED_TOTAL.inc();
    }

    pub fn tick_received(side: &str) {
        TICKS_RECEIVED_TOTAL.with_label_values(&[side]).inc();
    }

    pub fn ticks_written(symbol: &str, count: u64) {
        TICKS_WRITTEN_TOTAL
            .with_label_values(&[symbol])
            .inc_by(count);
    }

    pub fn ticks_dropped(reason: &str, count: u64) {
        TICKS_DROPPED_TOTAL
            .with_label_values(&[reason])
            .inc_by(count);
    }

    pub fn reconnect() {
        RECONNECT_TOTAL.inc();
    }

    pub fn writer_error() {
        WRITER_ERRORS_TOTAL.inc();
    }

    /// Set queued tick count for one account.
    pub fn buffer_depth(account: &str, depth: usize) {
        TICK_BUFFER_DEPTH
            .with_label_values(&[account])
            .set(depth as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_updates_counters() {
        let before = FRAMES_SENT_TOTAL.get();
        Metrics::frame_sent();
        assert!(FRAMES_SENT_TOTAL.get() > before);

        let before = TICKS_WRITTEN_TOTAL.with_label_values(&["TESTSYM"]).get();
        Metrics::ticks_written("TESTSYM", 5);
        assert_eq!(
            TICKS_WRITTEN_TOTAL.with_label_values(&["TESTSYM"]).get(),
            before + 5
        );
    }

    #[test]
    fn test_buffer_depth_gauge() {
        Metrics::buffer_depth("test-account", 42);
        assert_eq!(
            TICK_BUFFER_DEPTH.with_label_values(&["test-account"]).get(),
            42
        );
    }
}

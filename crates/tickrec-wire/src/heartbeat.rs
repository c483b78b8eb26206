//! Keep-alive for the API connection.
//!
//! The server drops clients that stay silent, so a heartbeat frame is queued
//! every ten seconds once the outbound queue first drains. Inbound traffic of
//! any kind is tracked in `Liveness`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::dispatcher::OutboundQueue;
use crate::message::OutboundRequest;

/// Periodic heartbeat producer. At most one timer task runs per connection.
pub struct HeartbeatTimer {
    interval: Duration,
    running: AtomicBool,
}

impl HeartbeatTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the timer unless it already runs.
    ///
    /// Returns `true` if this call started it.
    pub fn ensure_running(self: &Arc<Self>, queue: OutboundQueue, shutdown: CancellationToken) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let timer = Arc::clone(self);
        tokio::spawn(async move {
            timer.run(queue, shutdown).await;
            timer.running.store(false, Ordering::SeqCst);
        });
        true
    }

    async fn run(&self, queue: OutboundQueue, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if queue.push(OutboundRequest::heartbeat()).is_err() {
                        break;
                    }
                    trace!("Heartbeat queued");
                }
            }
        }
        debug!("Heartbeat timer stopped");
    }
}

/// Inbound activity tracker.
pub struct Liveness {
    last_message: RwLock<DateTime<Utc>>,
    messages: AtomicU64,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_message: RwLock::new(Utc::now()),
            messages: AtomicU64::new(0),
        }
    }

    /// Record that any message was received.
    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_message(&self) -> DateTime<Utc> {
        *self.last_message.read()
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Get time since last message.
    pub fn time_since_last_message_ms(&self) -> i64 {
        (Utc::now() - *self.last_message.read()).num_milliseconds()
    }

    pub fn stats(&self) -> LivenessStats {
        LivenessStats {
            last_message: self.last_message(),
            message_count: self.message_count(),
            time_since_last_message_ms: self.time_since_last_message_ms(),
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness statistics.
#[derive(Debug, Clone)]
pub struct LivenessStats {
    pub last_message: DateTime<Utc>,
    pub message_count: u64,
    pub time_since_last_message_ms: i64,
}

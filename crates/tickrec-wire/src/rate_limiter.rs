//! Rate limiting for outbound frames.
//!
//! The server disconnects clients that send faster than one frame every two
//! seconds or more than 30 frames per minute. Both limits are enforced here
//! using a sliding window of send timestamps.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Sliding-window rate limiter with a minimum spacing between sends.
pub struct RateLimiter {
    /// Minimum gap between two consecutive sends.
    min_spacing: Duration,
    /// Maximum sends per window.
    max_messages: u32,
    /// Window length.
    window: Duration,
    /// Timestamps of recent sends, oldest first.
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `min_spacing` - Minimum gap between consecutive sends
    /// * `max_messages` - Maximum sends per window
    /// * `window` - Window length
    pub fn new(min_spacing: Duration, max_messages: u32, window: Duration) -> Self {
        Self {
            min_spacing,
            max_messages,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_messages as usize)),
        }
    }

    /// Check if a frame may be sent now.
    pub fn can_send(&self) -> bool {
        self.next_slot() <= Instant::now()
    }

    /// Record a send.
    pub fn record_send(&self) {
        self.cleanup_old_timestamps();

        let mut timestamps = self.timestamps.lock();
        timestamps.push_back(Instant::now());

        if timestamps.len() >= self.max_messages as usize {
            warn!(
                count = timestamps.len(),
                max = self.max_messages,
                "Approaching rate limit"
            );
        }
    }

    /// Get current send count in window.
    pub fn current_count(&self) -> u32 {
        self.cleanup_old_timestamps();
        self.timestamps.lock().len() as u32
    }

    /// Get remaining capacity in the window.
    pub fn remaining_capacity(&self) -> u32 {
        self.max_messages.saturating_sub(self.current_count())
    }

    /// Wait until a frame may be sent.
    pub async fn wait_for_capacity(&self) {
        loop {
            let slot = self.next_slot();
            if slot <= Instant::now() {
                return;
            }
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Earliest instant at which both limits allow a send.
    fn next_slot(&self) -> Instant {
        self.cleanup_old_timestamps();

        let timestamps = self.timestamps.lock();
        let mut slot = Instant::now();
        if let Some(&last) = timestamps.back() {
            slot = slot.max(last + self.min_spacing);
        }
        if timestamps.len() >= self.max_messages as usize {
            if let Some(&oldest) = timestamps.front() {
                slot = slot.max(oldest + self.window);
            }
        }
        slot
    }

    fn cleanup_old_timestamps(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };

        let mut timestamps = self.timestamps.lock();
        while timestamps.front().is_some_and(|&t| t <= cutoff) {
            timestamps.pop_front();
        }
    }

    /// Reset rate limiter state.
    pub fn reset(&self) {
        self.timestamps.lock().clear();
    }
}

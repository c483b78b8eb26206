//! Per-account tick buffer.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tickrec_core::Tick;

/// Unbounded FIFO shared between the manager (producer) and one writer.
#[derive(Debug, Default)]
pub struct TickBuffer {
    queue: Mutex<VecDeque<Tick>>,
}

impl TickBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, tick: Tick) {
        self.queue.lock().push_back(tick);
    }

    /// Remove up to `max` of the oldest ticks.
    pub fn pop_batch(&self, max: usize) -> Vec<Tick> {
        let mut queue = self.queue.lock();
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Put ticks back at the front, keeping their order.
    pub fn requeue_front(&self, ticks: Vec<Tick>) {
        let mut queue = self.queue.lock();
        for tick in ticks.into_iter().rev() {
            queue.push_front(tick);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

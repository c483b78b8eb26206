//! Activity and error log files.
//!
//! Message events are appended to `activity.log` and error events to
//! `errors.log`, one timestamped line each. Lines queue in memory and are
//! appended once per flush interval, at most `max_batch` lines per file per
//! flush. A failed append is logged and its lines are discarded.

use chrono::Utc;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tickrec_core::RecorderEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ActivityLogConfig;

pub const ACTIVITY_FILE: &str = "activity.log";
pub const ERRORS_FILE: &str = "errors.log";

pub struct ActivityLog {
    dir: PathBuf,
    flush_interval: Duration,
    max_batch: usize,
    messages: VecDeque<String>,
    errors: VecDeque<String>,
}

impl ActivityLog {
    pub fn new(dir: impl Into<PathBuf>, flush_interval: Duration, max_batch: usize) -> Self {
        Self {
            dir: dir.into(),
            flush_interval,
            max_batch,
            messages: VecDeque::new(),
            errors: VecDeque::new(),
        }
    }

    /// `None` when the configured directory is empty.
    pub fn from_config(config: &ActivityLogConfig) -> Option<Self> {
        if config.dir.trim().is_empty() {
            return None;
        }
        Some(Self::new(
            &config.dir,
            Duration::from_millis(config.flush_interval_ms),
            config.max_batch,
        ))
    }

    pub fn pending(&self) -> usize {
        self.messages.len() + self.errors.len()
    }

    /// Queue the line for an event. Events without a text form are ignored.
    pub fn record(&mut self, event: &RecorderEvent) {
        match event {
            RecorderEvent::Message(text) => self.messages.push_back(stamped(text)),
            RecorderEvent::SpotsRequested {
                account_id,
                symbol_id,
            } => self.messages.push_back(stamped(&format!(
                "Symbol {symbol_id} spots requested for account {account_id}."
            ))),
            RecorderEvent::ConnectionLost => {
                self.messages.push_back(stamped("API connection lost."))
            }
            RecorderEvent::Error(text) => self.errors.push_back(stamped(text)),
            RecorderEvent::TickObserved { .. }
            | RecorderEvent::SymbolWrite { .. }
            | RecorderEvent::HeartbeatAlive => {}
        }
    }

    /// Append one batch per file. Returns the number of lines written.
    pub fn flush(&mut self) -> usize {
        let dir = self.dir.clone();
        let max_batch = self.max_batch;
        append_batch(&dir.join(ACTIVITY_FILE), &mut self.messages, max_batch)
            + append_batch(&dir.join(ERRORS_FILE), &mut self.errors, max_batch)
    }

    /// Record events until `shutdown` fires or the bus closes, then write out
    /// whatever is still queued.
    pub async fn run(
        mut self,
        mut rx: broadcast::Receiver<RecorderEvent>,
        shutdown: CancellationToken,
    ) {
        info!(dir = %self.dir.display(), "Activity log started");
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush();
                }
                event = rx.recv() => match event {
                    Ok(event) => self.record(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Activity log fell behind, events skipped");
                        self.errors
                            .push_back(stamped(&format!("{skipped} events were not recorded.")));
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        while let Ok(event) = rx.try_recv() {
            self.record(&event);
        }
        while self.pending() > 0 {
            if self.flush() == 0 {
                break;
            }
        }
        info!(dropped = self.pending(), "Activity log stopped");
    }
}

fn stamped(text: &str) -> String {
    format!("{}: {text}\n", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"))
}

fn append_batch(path: &Path, queue: &mut VecDeque<String>, max_batch: usize) -> usize {
    if queue.is_empty() {
        return 0;
    }
    let count = queue.len().min(max_batch);
    let content: String = queue.drain(..count).collect();

    match append(path, content.as_bytes()) {
        Ok(()) => {
            debug!(path = %path.display(), lines = count, "Activity lines written");
            count
        }
        Err(e) => {
            error!(path = %path.display(), lines = count, error = %e, "Could not record activity");
            0
        }
    }
}

fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)
}

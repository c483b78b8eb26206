//! Tick day-file writer.
//!
//! One writer task runs per authorized account. Each iteration drains up to
//! `max_batch` ticks, groups them by symbol, side and UTC date and appends
//! each group to its file:
//!
//! ```text
//! <data_path>/Tick/<symbol>/<yyyy-MM-dd>_<Bid|Ask>.csv
//! HH:mm:ss.fff,<value>
//! ```
//!
//! Files are opened in append mode and never truncated. A failed append only
//! affects its own group: the other groups of the batch are still written and
//! the failed ticks go back to the front of the buffer. After
//! `max_group_retries` consecutive failures for one file its pending ticks are
//! dropped, so a single bad path cannot hold up the account.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tickrec_core::{AccountId, EventBus, RecorderEvent, Side, SymbolCatalog, SymbolId, Tick};
use tickrec_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::TickBuffer;
use crate::error::{PersistenceError, PersistenceResult};

/// Writer pacing.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum ticks taken from the buffer per iteration.
    pub max_batch: usize,
    /// Sleep when the buffer is empty.
    pub idle_wait: Duration,
    /// Sleep after a failed iteration.
    pub error_backoff: Duration,
    /// Consecutive failed appends to one file before its ticks are dropped.
    pub max_group_retries: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch: 10_000,
            idle_wait: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            max_group_retries: 5,
        }
    }
}

/// Path of the day file for one symbol and side.
pub fn tick_file_path(data_path: &Path, symbol_name: &str, date: &str, side: Side) -> PathBuf {
    data_path
        .join("Tick")
        .join(symbol_name)
        .join(format!("{date}_{side}.csv"))
}

type FileKey = (SymbolId, String, Side);

/// Ticks bound for one file.
struct TickGroup {
    symbol_id: SymbolId,
    symbol_name: String,
    date: String,
    side: Side,
    ticks: Vec<Tick>,
}

impl TickGroup {
    fn key(&self) -> FileKey {
        (self.symbol_id, self.date.clone(), self.side)
    }

    fn contents(&self) -> String {
        self.ticks.iter().map(Tick::to_line).collect()
    }
}

pub struct TickWriter {
    account_id: AccountId,
    data_path: PathBuf,
    symbols: Arc<SymbolCatalog>,
    buffer: Arc<TickBuffer>,
    events: EventBus,
    config: WriterConfig,
    failures: Mutex<HashMap<FileKey, u32>>,
}

impl TickWriter {
    pub fn new(
        account_id: AccountId,
        data_path: impl Into<PathBuf>,
        symbols: Arc<SymbolCatalog>,
        buffer: Arc<TickBuffer>,
        events: EventBus,
        config: WriterConfig,
    ) -> Self {
        Self {
            account_id,
            data_path: data_path.into(),
            symbols,
            buffer,
            events,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Drain the buffer until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(account = %self.account_id, path = %self.data_path.display(), "Tick writer started");

        while !shutdown.is_cancelled() {
            let pause = match self.write_once() {
                Ok(0) => self.config.idle_wait,
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    error!(account = %self.account_id, error = %e, "Tick write failed");
                    self.events
                        .error(format!("Error writing ticks for account {}: {e}", self.account_id));
                    Metrics::writer_error();
                    self.config.error_backoff
                }
            };
            Metrics::buffer_depth(&self.account_id.to_string(), self.buffer.len());

            if pause.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(account = %self.account_id, pending = self.buffer.len(), "Tick writer stopped");
    }

    /// Take one batch from the buffer and append it.
    ///
    /// Returns the number of ticks written.
    pub fn write_once(&self) -> PersistenceResult<usize> {
        let batch = self.buffer.pop_batch(self.config.max_batch);
        if batch.is_empty() {
            return Ok(0);
        }
        self.write_batch(batch)
    }

    fn write_batch(&self, batch: Vec<Tick>) -> PersistenceResult<usize> {
        let groups = self.group(batch);
        let mut written = 0;
        let mut retry: Vec<Tick> = Vec::new();
        let mut first_error = None;

        for group in &groups {
            match self.append(group) {
                Ok(()) => {
                    self.failures.lock().remove(&group.key());
                    written += group.ticks.len();
                    Metrics::ticks_written(&group.symbol_name, group.ticks.len() as u64);
                    self.events.emit(RecorderEvent::SymbolWrite {
                        symbol_name: group.symbol_name.clone(),
                        symbol_id: group.symbol_id,
                        date: group.date.clone(),
                        is_bid: group.side.is_bid(),
                    });
                }
                Err(e) => {
                    if self.record_failure(group) {
                        retry.extend(group.ticks.iter().copied());
                    } else {
                        self.drop_group(group, &e);
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        if !retry.is_empty() {
            warn!(account = %self.account_id, requeued = retry.len(), "Returning unwritten ticks to buffer");
            self.buffer.requeue_front(retry);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(account = %self.account_id, written, files = groups.len(), "Batch written");
                Ok(written)
            }
        }
    }

    /// Count a failed append. Returns `true` while the group may be retried.
    fn record_failure(&self, group: &TickGroup) -> bool {
        let mut failures = self.failures.lock();
        let attempts = failures.entry(group.key()).or_insert(0);
        *attempts += 1;
        if *attempts > self.config.max_group_retries {
            failures.remove(&group.key());
            return false;
        }
        true
    }

    fn drop_group(&self, group: &TickGroup, cause: &PersistenceError) {
        let side = group.side;
        error!(
            account = %self.account_id,
            symbol = %group.symbol_name,
            date = %group.date,
            %side,
            dropped = group.ticks.len(),
            error = %cause,
            "Giving up on tick file"
        );
        Metrics::ticks_dropped("write_failed", group.ticks.len() as u64);
        self.events.error(format!(
            "Dropped {} {side} ticks for {} {}: {cause}",
            group.ticks.len(),
            group.symbol_name,
            group.date
        ));
    }

    /// Split a batch into per-file groups, keeping arrival order within each.
    fn group(&self, batch: Vec<Tick>) -> Vec<TickGroup> {
        let mut groups: Vec<TickGroup> = Vec::new();
        let mut index: HashMap<FileKey, usize> = HashMap::new();
        let mut dropped = 0u64;

        for tick in batch {
            let Some(name) = self.symbols.name_of(tick.symbol_id) else {
                dropped += 1;
                continue;
            };
            let date = tick.date_string();
            let key = (tick.symbol_id, date.clone(), tick.side);
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(TickGroup {
                    symbol_id: tick.symbol_id,
                    symbol_name: name.to_string(),
                    date,
                    side: tick.side,
                    ticks: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].ticks.push(tick);
        }

        if dropped > 0 {
            warn!(account = %self.account_id, dropped, "Ticks for unknown symbols discarded");
            Metrics::ticks_dropped("unknown_symbol", dropped);
        }
        groups
    }

    fn append(&self, group: &TickGroup) -> PersistenceResult<()> {
        let path = tick_file_path(&self.data_path, &group.symbol_name, &group.date, group.side);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(group.contents().as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

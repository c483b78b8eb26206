//! Upward event surface.
//!
//! The core never calls into presentation code. Everything a console or GUI
//! front end wants to show is emitted as a `RecorderEvent` on a broadcast
//! channel; front ends subscribe and render.

use crate::account::AccountId;
use crate::symbol::SymbolId;
use crate::tick::Side;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

/// Event emitted by the recorder core.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// Informational status text.
    Message(String),
    /// Error text. Recoverable errors are reported here and processing continues.
    Error(String),
    /// A tick was received and queued for writing.
    TickObserved {
        symbol_id: SymbolId,
        side: Side,
        value: u64,
        time: DateTime<Utc>,
    },
    /// A batch of ticks was appended to one day file.
    SymbolWrite {
        symbol_name: String,
        symbol_id: SymbolId,
        date: String,
        is_bid: bool,
    },
    /// A spot subscription request was transmitted.
    SpotsRequested {
        account_id: AccountId,
        symbol_id: SymbolId,
    },
    /// The transport failed; a full reconnect is required.
    ConnectionLost,
    /// Any inbound message was observed.
    HeartbeatAlive,
}

/// Cloneable handle for emitting events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecorderEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: RecorderEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn message(&self, text: impl Into<String>) {
        self.emit(RecorderEvent::Message(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(RecorderEvent::Error(text.into()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

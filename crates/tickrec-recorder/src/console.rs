//! Console front end: renders recorder events as log lines.

use tickrec_core::RecorderEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, trace, warn};

/// Log every event until the bus closes.
pub async fn log_events(mut rx: broadcast::Receiver<RecorderEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Console fell behind, events skipped"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &RecorderEvent) {
    match event {
        RecorderEvent::Message(text) => info!("{text}"),
        RecorderEvent::Error(text) => error!("{text}"),
        RecorderEvent::SpotsRequested {
            account_id,
            symbol_id,
        } => info!("Subscribed to symbol {symbol_id} for account {account_id}."),
        RecorderEvent::SymbolWrite {
            symbol_name,
            date,
            is_bid,
            ..
        } => {
            let side = if *is_bid { "Bid" } else { "Ask" };
            debug!("Wrote {symbol_name} {date} {side}");
        }
        RecorderEvent::TickObserved {
            symbol_id,
            side,
            value,
            ..
        } => trace!(%symbol_id, %side, value, "Tick"),
        RecorderEvent::ConnectionLost => warn!("API connection lost."),
        RecorderEvent::HeartbeatAlive => {}
    }
}

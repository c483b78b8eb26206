//! Inbound listener.
//!
//! Reads frames from the connection, decodes them and routes the result.
//! Keep-alive traffic is consumed here; everything else is forwarded to the
//! connection manager over a channel.

use futures_util::StreamExt;
use std::sync::Arc;
use tickrec_core::{EventBus, RecorderEvent};
use tickrec_telemetry::Metrics;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::FrameCodec;
use crate::error::{WireError, WireResult};
use crate::heartbeat::Liveness;
use crate::message::{decode_inbound, InboundMessage};

pub struct InboundListener {
    events: EventBus,
    liveness: Arc<Liveness>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    shutdown: CancellationToken,
    max_frame_len: usize,
}

impl InboundListener {
    pub fn new(
        events: EventBus,
        liveness: Arc<Liveness>,
        inbound_tx: mpsc::UnboundedSender<InboundMessage>,
        shutdown: CancellationToken,
        max_frame_len: usize,
    ) -> Self {
        Self {
            events,
            liveness,
            inbound_tx,
            shutdown,
            max_frame_len,
        }
    }

    /// Read until shutdown, end of stream or a fatal frame.
    ///
    /// End of stream is reported as `WireError::ConnectionClosed`.
    pub async fn run<R>(self, reader: R) -> WireResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, FrameCodec::new(self.max_frame_len));
        info!(max_frame_len = frames.decoder().max_frame_len(), "Inbound listener started");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Inbound listener stopped");
                    return Ok(());
                }
                next = frames.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(e),
                None => return Err(WireError::ConnectionClosed),
            };

            Metrics::frame_received();
            let message = decode_inbound(&frame)?;
            self.route(message);
        }
    }

    fn route(&self, message: InboundMessage) {
        self.liveness.record_message();
        self.events.emit(RecorderEvent::HeartbeatAlive);

        match message {
            InboundMessage::Heartbeat => trace!("Heartbeat event received"),
            InboundMessage::PingReq { timestamp } => {
                debug!(timestamp, "Ping request received");
                self.events.message("Ping req");
            }
            InboundMessage::PingRes { timestamp } => {
                debug!(timestamp, "Ping response received");
                self.events.message("Ping res");
            }
            other => {
                if self.inbound_tx.send(other).is_err() {
                    warn!("Inbound receiver dropped, message discarded");
                }
            }
        }
    }
}

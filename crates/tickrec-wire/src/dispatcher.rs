//! Outbound dispatcher.
//!
//! A single task owns the write half of the connection. Requests are taken
//! from an unbounded FIFO queue one at a time and written as frames, with a
//! fixed pause after every iteration so the server's rate limits are never
//! hit. The first time the queue is found empty the heartbeat timer starts.

use bytes::Bytes;
use futures_util::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tickrec_core::EventBus;
use tickrec_telemetry::Metrics;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::codec::FrameCodec;
use crate::error::{WireError, WireResult};
use crate::heartbeat::HeartbeatTimer;
use crate::message::OutboundRequest;
use crate::rate_limiter::RateLimiter;

/// Timing parameters for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Pause after every dispatcher iteration.
    pub send_interval: Duration,
    /// Minimum gap between two frames on the wire.
    pub min_spacing: Duration,
    /// Maximum frames per window.
    pub window_max_messages: u32,
    pub window: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(2010),
            min_spacing: Duration::from_millis(2000),
            window_max_messages: 30,
            window: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// Producer handle for the outbound queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundRequest>,
}

impl OutboundQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Append a request. Fails once the dispatcher has gone away.
    pub fn push(&self, request: OutboundRequest) -> WireResult<()> {
        self.tx.send(request).map_err(|_| WireError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single writer for one connection.
pub struct OutboundDispatcher {
    config: DispatchConfig,
    limiter: RateLimiter,
    heartbeat: Arc<HeartbeatTimer>,
    queue: OutboundQueue,
    rx: mpsc::UnboundedReceiver<OutboundRequest>,
    events: EventBus,
    shutdown: CancellationToken,
    sent: u64,
}

impl OutboundDispatcher {
    pub fn new(
        config: DispatchConfig,
        queue: OutboundQueue,
        rx: mpsc::UnboundedReceiver<OutboundRequest>,
        events: EventBus,
        shutdown: CancellationToken,
    ) -> Self {
        let limiter = RateLimiter::new(
            config.min_spacing,
            config.window_max_messages,
            config.window,
        );
        let heartbeat = Arc::new(HeartbeatTimer::new(config.heartbeat_interval));
        Self {
            config,
            limiter,
            heartbeat,
            queue,
            rx,
            events,
            shutdown,
            sent: 0,
        }
    }

    /// Run until shutdown or a write failure.
    pub async fn run<W>(mut self, writer: W) -> WireResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut sink = FramedWrite::new(writer, FrameCodec::default());
        info!("Outbound dispatcher started");

        while !self.shutdown.is_cancelled() {
            match self.rx.try_recv() {
                Ok(request) => self.transmit(&mut sink, request).await?,
                Err(TryRecvError::Empty) => {
                    if self
                        .heartbeat
                        .ensure_running(self.queue.clone(), self.shutdown.clone())
                    {
                        debug!("Heartbeat timer started");
                    }
                }
                Err(TryRecvError::Disconnected) => return Err(WireError::QueueClosed),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.send_interval) => {}
            }
        }

        info!(sent = self.sent, "Outbound dispatcher stopped");
        Ok(())
    }

    async fn transmit<W>(
        &mut self,
        sink: &mut FramedWrite<W, FrameCodec>,
        request: OutboundRequest,
    ) -> WireResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(()),
            _ = self.limiter.wait_for_capacity() => {}
        }

        let frame: Bytes = request.payload().clone();
        sink.send(frame).await?;
        self.limiter.record_send();
        self.sent += 1;
        Metrics::frame_sent();
        trace!(
            kind = ?request.kind(),
            window_remaining = self.limiter.remaining_capacity(),
            "Frame sent"
        );

        if let Some(event) = request.kind().status_event() {
            self.events.emit(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PayloadType, ProtoMessage};
    use futures_util::StreamExt;
    use prost::Message;
    use tickrec_core::{AccountId, RecorderEvent, SymbolId};
    use tokio::time::Instant;
    use tokio_util::codec::FramedRead;

    fn payload_type(frame: &[u8]) -> u32 {
        ProtoMessage::decode(frame).unwrap().payload_type
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_sent_in_order_with_spacing() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (queue, rx) = OutboundQueue::channel();
        let events = EventBus::default();
        let mut event_rx = events.subscribe();
        let shutdown = CancellationToken::new();

        queue.push(OutboundRequest::app_auth("id", "secret")).unwrap();
        queue.push(OutboundRequest::account_list("token")).unwrap();
        queue
            .push(OutboundRequest::subscribe_spots(
                AccountId::new(555),
                SymbolId::new(1),
            ))
            .unwrap();

        let dispatcher = OutboundDispatcher::new(
            DispatchConfig::default(),
            queue.clone(),
            rx,
            events,
            shutdown.clone(),
        );
        let handle = tokio::spawn(dispatcher.run(client));

        let mut frames = FramedRead::new(server, FrameCodec::default());
        let mut arrivals = Vec::new();
        let mut types = Vec::new();
        for _ in 0..3 {
            let frame = frames.next().await.unwrap().unwrap();
            arrivals.push(Instant::now());
            types.push(payload_type(&frame));
        }

        assert_eq!(
            types,
            vec![
                PayloadType::ApplicationAuthReq.as_u32(),
                PayloadType::GetAccountsByAccessTokenReq.as_u32(),
                PayloadType::SubscribeSpotsReq.as_u32(),
            ]
        );
        for pair in arrivals.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }

        assert_eq!(
            event_rx.recv().await.unwrap(),
            RecorderEvent::Message("Authorising app.".to_string())
        );
        assert_eq!(
            event_rx.recv().await.unwrap(),
            RecorderEvent::Message("Retrieving account id.".to_string())
        );
        assert_eq!(
            event_rx.recv().await.unwrap(),
            RecorderEvent::SpotsRequested {
                account_id: AccountId::new(555),
                symbol_id: SymbolId::new(1),
            }
        );

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_queue_starts_heartbeat() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (queue, rx) = OutboundQueue::channel();
        let shutdown = CancellationToken::new();

        let dispatcher = OutboundDispatcher::new(
            DispatchConfig::default(),
            queue,
            rx,
            EventBus::default(),
            shutdown.clone(),
        );
        let start = Instant::now();
        let handle = tokio::spawn(dispatcher.run(client));

        let mut frames = FramedRead::new(server, FrameCodec::default());
        let frame = frames.next().await.unwrap().unwrap();
        assert_eq!(payload_type(&frame), PayloadType::HeartbeatEvent.as_u32());
        assert!(start.elapsed() >= Duration::from_secs(10));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_request_sent_once() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (queue, rx) = OutboundQueue::channel();
        let shutdown = CancellationToken::new();

        queue.push(OutboundRequest::app_auth("id", "secret")).unwrap();

        let dispatcher = OutboundDispatcher::new(
            DispatchConfig::default(),
            queue,
            rx,
            EventBus::default(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(dispatcher.run(client));

        let mut frames = FramedRead::new(server, FrameCodec::default());
        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(payload_type(&first), PayloadType::ApplicationAuthReq.as_u32());

        // Nothing else until the heartbeat, which comes ten seconds after the
        // queue first drains.
        let next = frames.next().await.unwrap().unwrap();
        assert_eq!(payload_type(&next), PayloadType::HeartbeatEvent.as_u32());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_dispatcher() {
        let (client, _server) = tokio::io::duplex(1024);
        let (queue, rx) = OutboundQueue::channel();
        let shutdown = CancellationToken::new();

        let dispatcher = OutboundDispatcher::new(
            DispatchConfig::default(),
            queue,
            rx,
            EventBus::default(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(dispatcher.run(client));

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}

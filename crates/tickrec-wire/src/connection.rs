//! One live API connection.
//!
//! Owns the listener and dispatcher tasks for a single stream. A fatal
//! failure in either task cancels both and trips the lost signal exactly
//! once; the owner then closes the connection and opens a fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tickrec_core::{EventBus, RecorderEvent};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::MAX_FRAME_LEN;
use crate::dispatcher::{DispatchConfig, OutboundDispatcher, OutboundQueue};
use crate::error::WireResult;
use crate::heartbeat::Liveness;
use crate::listener::InboundListener;
use crate::message::InboundMessage;
use crate::transport::{TransportConfig, WireTransport};

/// Everything needed to open a connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub transport: TransportConfig,
    pub dispatch: DispatchConfig,
    pub max_frame_len: usize,
}

impl ConnectionSettings {
    pub fn new(transport: TransportConfig, dispatch: DispatchConfig) -> Self {
        Self {
            transport,
            dispatch,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Connection-lost latch. Trips once; later trips are no-ops.
#[derive(Debug, Clone)]
pub struct LostSignal {
    token: CancellationToken,
    reported: Arc<AtomicBool>,
    events: EventBus,
}

impl LostSignal {
    pub fn new(events: EventBus) -> Self {
        Self {
            token: CancellationToken::new(),
            reported: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Mark the connection lost. Returns `true` for the first caller only.
    pub fn trip(&self) -> bool {
        if self.reported.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.events.emit(RecorderEvent::ConnectionLost);
        self.token.cancel();
        true
    }

    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

pub struct Connection {
    outbound: OutboundQueue,
    shutdown: CancellationToken,
    lost: LostSignal,
    liveness: Arc<Liveness>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Open a TLS stream and start the workers on it.
    pub async fn open(
        settings: &ConnectionSettings,
        events: EventBus,
    ) -> WireResult<(Self, mpsc::UnboundedReceiver<InboundMessage>)> {
        let stream = WireTransport::connect(&settings.transport).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self::start(
            reader,
            writer,
            &settings.dispatch,
            settings.max_frame_len,
            events,
        ))
    }

    /// Start the workers on an already-open stream.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        dispatch: &DispatchConfig,
        max_frame_len: usize,
        events: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<InboundMessage>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let lost = LostSignal::new(events.clone());
        let liveness = Arc::new(Liveness::new());
        let (outbound, outbound_rx) = OutboundQueue::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let listener = InboundListener::new(
            events.clone(),
            liveness.clone(),
            inbound_tx,
            shutdown.clone(),
            max_frame_len,
        );
        let dispatcher = OutboundDispatcher::new(
            dispatch.clone(),
            outbound.clone(),
            outbound_rx,
            events.clone(),
            shutdown.clone(),
        );

        let tasks = vec![
            tokio::spawn(supervise(
                "listener",
                listener.run(reader),
                events.clone(),
                shutdown.clone(),
                lost.clone(),
            )),
            tokio::spawn(supervise(
                "dispatcher",
                dispatcher.run(writer),
                events,
                shutdown.clone(),
                lost.clone(),
            )),
        ];

        info!("Connection workers started");
        let connection = Self {
            outbound,
            shutdown,
            lost,
            liveness,
            tasks,
        };
        (connection, inbound_rx)
    }

    pub fn outbound(&self) -> OutboundQueue {
        self.outbound.clone()
    }

    /// Token cancelled when the connection is closing.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn lost_signal(&self) -> LostSignal {
        self.lost.clone()
    }

    pub fn liveness(&self) -> Arc<Liveness> {
        self.liveness.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_tripped()
    }

    /// Resolves once the connection has been declared lost.
    pub async fn lost(&self) {
        self.lost.wait().await
    }

    /// Stop both workers and wait for them to exit.
    pub async fn close(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Connection closed");
    }
}

async fn supervise<F>(
    name: &'static str,
    worker: F,
    events: EventBus,
    shutdown: CancellationToken,
    lost: LostSignal,
) where
    F: std::future::Future<Output = WireResult<()>>,
{
    match worker.await {
        Ok(()) => debug!(worker = name, "Worker stopped"),
        Err(e) if shutdown.is_cancelled() => {
            debug!(worker = name, error = %e, "Worker stopped during shutdown");
        }
        Err(e) => {
            error!(worker = name, error = %e, "Worker failed");
            events.error(format!("Connection {name} failed: {e}"));
            shutdown.cancel();
            lost.trip();
        }
    }
}

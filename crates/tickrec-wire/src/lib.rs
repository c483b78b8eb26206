//! Wire layer for the vendor trading-data API.
//!
//! Provides the transport and the long-running protocol workers:
//! - TLS transport with certificate and hostname validation
//! - Length-prefixed framing (`FrameCodec`)
//! - Protobuf payload messages and request builders
//! - Outbound dispatcher with rate limiting (≥2s spacing, 30 msg/min)
//! - Heartbeat timer and liveness tracking
//! - Inbound listener decoding and routing frames

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod listener;
pub mod message;
pub mod rate_limiter;
pub mod transport;

pub use codec::{FrameCodec, MAX_FRAME_LEN};
pub use connection::{Connection, ConnectionSettings, LostSignal};
pub use dispatcher::{DispatchConfig, OutboundDispatcher, OutboundQueue};
pub use error::{WireError, WireResult};
pub use heartbeat::{HeartbeatTimer, Liveness, LivenessStats};
pub use listener::InboundListener;
pub use message::{
    decode_inbound, encode_envelope, InboundMessage, OutboundRequest, PayloadType, RequestKind,
    SpotUpdate,
};
pub use rate_limiter::RateLimiter;
pub use transport::{TlsStream, TransportConfig, WireTransport};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the ring crypto provider as the process default.
/// Call before any TLS connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

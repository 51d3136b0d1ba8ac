//! Parcel collection server
//!
//! Streams queued parcels to authenticated endpoints over a long-lived
//! duplex channel and deletes each parcel once its acknowledgement arrives.
//!
//! - `handshake`: nonce challenge / multi-signature response
//! - `session`: per-connection state machine (delivery + ack directions)
//! - `tracker`: per-session pending-ack bookkeeping
//! - `ws`: the axum WebSocket binding

pub mod handshake;
pub mod session;
pub mod tracker;
pub mod ws;

pub use session::{CollectionSession, SessionError, SessionOutcome};
pub use tracker::CollectionTracker;

use async_trait::async_trait;

/// A frame on the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary frame (handshake messages, parcel deliveries)
    Binary(Vec<u8>),
    /// Text frame (raw delivery-id acknowledgements)
    Text(String),
}

/// The server side of one duplex connection.
///
/// The WebSocket framing library sits behind this seam; tests drive
/// sessions through an in-memory implementation.
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError>;

    /// Receive the next data frame. `None` once the peer closed the
    /// connection or the transport failed.
    async fn recv(&mut self) -> Option<Frame>;

    /// Close the connection with a code and reason. Best-effort.
    async fn close(&mut self, code: u16, reason: &str);
}

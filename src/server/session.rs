//! Parcel collection session
//!
//! One session per connection. After the handshake, the delivery direction
//! streams queued parcels while the ack direction deletes each parcel whose
//! delivery id comes back. Both directions run on this one task; the
//! tracker needs no lock.
//!
//! Delivery ids live only in memory: if the session (or process) dies
//! before an ack arrives, the parcel stays in the store and is re-offered
//! to the next session.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{CLOSE_CODE_CANNOT_ACCEPT, CLOSE_CODE_NORMAL};
use crate::messages::{now_unix, ParcelDelivery};
use crate::stores::{KeyStore, ParcelDirection, ParcelStore, StoreError};

use super::handshake::{perform_handshake, HandshakeFailure};
use super::tracker::CollectionTracker;
use super::{Frame, FrameTransport};

/// Session-fatal errors
#[derive(Debug)]
pub enum SessionError {
    /// The transport failed while sending
    Transport(String),
    /// A store operation failed
    Store(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Transport(e) => write!(f, "transport error: {}", e),
            SessionError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e.to_string())
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Queue drained and every ack received; closed with 1000
    Complete,
    /// The handshake failed; closed with 1008
    HandshakeRefused,
    /// The client acknowledged an id that was never issued; closed with 1008
    UnknownAck,
    /// The client closed (or the transport died) first
    TransportClosed,
}

/// A parcel collection session over one connection.
pub struct CollectionSession<T: FrameTransport> {
    transport: T,
    parcel_store: Arc<dyn ParcelStore>,
    key_store: Arc<dyn KeyStore>,
    keep_alive: bool,
}

enum Step {
    Deliver(String),
    Drained,
    Inbound(Option<Frame>),
}

impl<T: FrameTransport> CollectionSession<T> {
    /// Create a session.
    ///
    /// `keep_alive` is false only when the client sent the literal
    /// `close-upon-completion` streaming mode.
    pub fn new(
        transport: T,
        parcel_store: Arc<dyn ParcelStore>,
        key_store: Arc<dyn KeyStore>,
        keep_alive: bool,
    ) -> Self {
        CollectionSession {
            transport,
            parcel_store,
            key_store,
            keep_alive,
        }
    }

    /// Run the session to completion.
    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        let trusted = self.key_store.fetch_node_certificates().await?;

        let endpoint_addresses =
            match perform_handshake(&mut self.transport, &trusted, now_unix()).await {
                Ok(addresses) => addresses,
                Err(HandshakeFailure::ConnectionClosed) => {
                    return Ok(SessionOutcome::TransportClosed);
                }
                Err(HandshakeFailure::Refused(_)) => {
                    return Ok(SessionOutcome::HandshakeRefused);
                }
                Err(HandshakeFailure::Transport(e)) => return Err(e),
            };

        info!(
            endpoints = endpoint_addresses.len(),
            keep_alive = self.keep_alive,
            "collection session established"
        );

        let mut parcel_keys = self
            .parcel_store
            .stream_active_bound_for_endpoints(endpoint_addresses, self.keep_alive)
            .await?;

        let mut tracker = CollectionTracker::new();

        loop {
            let step = tokio::select! {
                key = parcel_keys.recv(), if !tracker.all_sent() => match key {
                    Some(key) => Step::Deliver(key),
                    None => Step::Drained,
                },
                frame = self.transport.recv() => Step::Inbound(frame),
            };

            match step {
                Step::Deliver(parcel_key) => {
                    let serialized = self
                        .parcel_store
                        .retrieve(&parcel_key, ParcelDirection::FromInternetToEndpoint)
                        .await?;
                    let serialized = match serialized {
                        Some(bytes) => bytes,
                        None => {
                            debug!(parcel_key = %parcel_key, "parcel deleted before delivery, skipping");
                            continue;
                        }
                    };

                    let delivery_id = Uuid::new_v4().to_string();
                    tracker.add_pending_ack(delivery_id.clone(), parcel_key.clone());
                    let delivery = ParcelDelivery {
                        delivery_id,
                        parcel_serialized: serialized,
                    };
                    self.transport
                        .send(Frame::Binary(delivery.serialize()))
                        .await?;
                    debug!(parcel_key = %parcel_key, "parcel delivered");
                }
                Step::Drained => {
                    tracker.mark_all_parcels_delivered();
                }
                Step::Inbound(None) => {
                    debug!("client closed the connection");
                    return Ok(SessionOutcome::TransportClosed);
                }
                Step::Inbound(Some(Frame::Text(delivery_id))) => {
                    match tracker.pop_pending_parcel_key(&delivery_id) {
                        Some(parcel_key) => {
                            self.parcel_store
                                .delete(&parcel_key, ParcelDirection::FromInternetToEndpoint)
                                .await?;
                            debug!(parcel_key = %parcel_key, "parcel acknowledged and deleted");
                        }
                        None => {
                            warn!(delivery_id = %delivery_id, "unknown delivery id");
                            self.transport
                                .close(
                                    CLOSE_CODE_CANNOT_ACCEPT,
                                    &format!("Unknown delivery id: {delivery_id}"),
                                )
                                .await;
                            return Ok(SessionOutcome::UnknownAck);
                        }
                    }
                }
                Step::Inbound(Some(Frame::Binary(_))) => {
                    debug!("ignoring binary frame after handshake");
                }
            }

            if tracker.is_complete() {
                info!("collection session complete");
                self.transport
                    .close(CLOSE_CODE_NORMAL, "All parcels delivered")
                    .await;
                return Ok(SessionOutcome::Complete);
            }
        }
    }
}

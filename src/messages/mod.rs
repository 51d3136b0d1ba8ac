//! Gateway protocol wire formats
//!
//! Defines the messages exchanged with endpoints, couriers and the public
//! gateway:
//! - Parcels and parcel collection acknowledgements
//! - Cargoes and cargo message sets (courier channel)
//! - Cargo collection authorizations (courier channel)
//! - Handshake challenge/response frames (parcel collection endpoint)
//!
//! All messages are serde structs encoded with postcard.

pub mod ack;
pub mod cargo;
pub mod cca;
pub mod delivery;
pub mod handshake;
pub mod parcel;

pub use ack::ParcelCollectionAck;
pub use cargo::{generate_cargoes, Cargo, CargoMessage, CargoMessageSet};
pub use cca::{CargoCollectionAuthorization, CargoCollectionRequest};
pub use delivery::ParcelDelivery;
pub use handshake::{HandshakeChallenge, HandshakeResponse, NonceSignature};
pub use parcel::{Parcel, RecipientType};

use std::time::{SystemTime, UNIX_EPOCH};

/// Message validation and decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The message bytes could not be decoded
    Malformed(String),
    /// The message signature does not verify
    InvalidSignature,
    /// The message is outside its validity window
    OutsideValidityWindow,
    /// The sender certificate does not chain to a trusted certificate
    UntrustedSender,
    /// The recipient address has the wrong form for this context
    InvalidRecipient(String),
    /// The enveloped payload could not be sealed or opened
    Envelope(String),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::Malformed(e) => write!(f, "malformed message: {}", e),
            MessageError::InvalidSignature => write!(f, "invalid message signature"),
            MessageError::OutsideValidityWindow => {
                write!(f, "message outside its validity window")
            }
            MessageError::UntrustedSender => write!(f, "message sender is not trusted"),
            MessageError::InvalidRecipient(addr) => write!(f, "invalid recipient: {}", addr),
            MessageError::Envelope(e) => write!(f, "envelope error: {}", e),
        }
    }
}

impl std::error::Error for MessageError {}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

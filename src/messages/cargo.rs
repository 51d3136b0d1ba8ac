//! Cargoes and cargo message sets
//!
//! A cargo is a signed, time-bounded envelope carried over the courier
//! channel. Its payload is a sealed message set whose items are parcels or
//! parcel collection acknowledgements.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CLOCK_DRIFT_TOLERANCE_MINUTES, OUTBOUND_CARGO_TTL_DAYS};
use crate::security::certificate::{sign_detached, verify_detached, Certificate};
use crate::security::envelope::{open_envelope, seal_envelope};
use crate::security::keys::KeyPair;

use super::ack::ParcelCollectionAck;
use super::parcel::Parcel;
use super::MessageError;

/// Upper bound on messages batched into one cargo.
pub const MAX_MESSAGES_PER_CARGO: usize = 100;

/// Upper bound on the combined payload bytes of one cargo.
pub const MAX_CARGO_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// An item carried inside a cargo message set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CargoMessage {
    /// A parcel in transit
    Parcel(Parcel),
    /// A parcel collection acknowledgement
    CollectionAck(ParcelCollectionAck),
}

impl CargoMessage {
    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes. A failure here is the "unknown or malformed
    /// message" case and the caller skips the item.
    pub fn deserialize(bytes: &[u8]) -> Result<CargoMessage, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

/// The plaintext payload of a cargo: a sequence of encoded [`CargoMessage`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoMessageSet {
    /// Encoded messages, in packing order
    pub messages: Vec<Vec<u8>>,
}

impl CargoMessageSet {
    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<CargoMessageSet, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

/// A signed, time-bounded bundle of messages for the courier channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cargo {
    /// Certificate of the gateway that created the cargo
    pub sender_certificate: Certificate,
    /// Address of the receiving gateway
    pub recipient_address: String,
    /// Random cargo id
    pub cargo_id: String,
    /// Creation time (unix seconds)
    pub creation_time: i64,
    /// Lifetime in seconds from creation
    pub ttl_secs: i64,
    /// Sealed [`CargoMessageSet`]
    pub payload: Vec<u8>,
    /// Detached signature by the sender over the fields above
    pub signature: Vec<u8>,
}

impl Cargo {
    /// Build a cargo: seal the message set to the recipient and sign.
    pub fn new(
        sender: &KeyPair,
        sender_certificate: Certificate,
        recipient_certificate: &Certificate,
        recipient_address: impl Into<String>,
        message_set: &CargoMessageSet,
        creation_time: i64,
        ttl_secs: i64,
    ) -> Result<Cargo, MessageError> {
        let payload = seal_envelope(recipient_certificate, &message_set.serialize())
            .map_err(|e| MessageError::Envelope(e.to_string()))?;

        let mut cargo = Cargo {
            sender_certificate,
            recipient_address: recipient_address.into(),
            cargo_id: Uuid::new_v4().to_string(),
            creation_time,
            ttl_secs,
            payload,
            signature: Vec::new(),
        };
        cargo.signature = sign_detached(&sender.private_key, &cargo.signed_data());
        Ok(cargo)
    }

    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Cargo, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    /// Expiry time (unix seconds).
    pub fn expiry(&self) -> i64 {
        self.creation_time.saturating_add(self.ttl_secs)
    }

    /// Validate the cargo against trusted certificates.
    ///
    /// The sender certificate must be issued by one of `trusted`, the
    /// signature must verify, and `now` must fall inside the validity
    /// window (with clock-drift tolerance on the creation time).
    pub fn validate(&self, trusted: &[Certificate], now: i64) -> Result<(), MessageError> {
        let drift = CLOCK_DRIFT_TOLERANCE_MINUTES * 60;
        if self.creation_time > now + drift || now > self.expiry() {
            return Err(MessageError::OutsideValidityWindow);
        }

        if !verify_detached(
            &self.sender_certificate.subject_public_key,
            &self.signed_data(),
            &self.signature,
        ) {
            return Err(MessageError::InvalidSignature);
        }

        self.sender_certificate
            .verify_chain(trusted, now)
            .map_err(|_| MessageError::UntrustedSender)
    }

    /// Open the sealed payload with our private key.
    pub fn unwrap_payload(&self, private_key: &[u8; 32]) -> Result<CargoMessageSet, MessageError> {
        let plaintext = open_envelope(private_key, &self.payload)
            .map_err(|e| MessageError::Envelope(e.to_string()))?;
        CargoMessageSet::deserialize(&plaintext)
    }

    fn signed_data(&self) -> Vec<u8> {
        postcard::to_allocvec(&(
            &self.sender_certificate,
            &self.recipient_address,
            &self.cargo_id,
            self.creation_time,
            self.ttl_secs,
            &self.payload,
        ))
        .expect("serialization should not fail")
    }
}

/// Pack `(message bytes, expiry)` pairs into signed, sealed cargoes.
///
/// Messages are batched in order; a cargo is cut when it reaches
/// [`MAX_MESSAGES_PER_CARGO`] items or [`MAX_CARGO_PAYLOAD_BYTES`] combined
/// bytes. Each cargo's expiry is the latest expiry among its items, clamped
/// to the outbound cargo TTL; its creation time is backdated by the clock
/// drift tolerance.
pub fn generate_cargoes(
    items: Vec<(Vec<u8>, i64)>,
    recipient_certificate: &Certificate,
    recipient_address: &str,
    sender: &KeyPair,
    sender_certificate: &Certificate,
    now: i64,
) -> Result<Vec<Cargo>, MessageError> {
    let mut cargoes = Vec::new();
    let mut batch: Vec<Vec<u8>> = Vec::new();
    let mut batch_bytes = 0usize;
    let mut batch_expiry = now;

    let mut flush = |batch: &mut Vec<Vec<u8>>, batch_expiry: i64| -> Result<(), MessageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let creation_time = now - CLOCK_DRIFT_TOLERANCE_MINUTES * 60;
        let max_expiry = now + OUTBOUND_CARGO_TTL_DAYS * 24 * 3600;
        let expiry = batch_expiry.clamp(now, max_expiry);
        let message_set = CargoMessageSet {
            messages: std::mem::take(batch),
        };
        let cargo = Cargo::new(
            sender,
            sender_certificate.clone(),
            recipient_certificate,
            recipient_address,
            &message_set,
            creation_time,
            expiry - creation_time,
        )?;
        cargoes.push(cargo);
        Ok(())
    };

    for (message, expiry) in items {
        let cut = batch.len() >= MAX_MESSAGES_PER_CARGO
            || (!batch.is_empty() && batch_bytes + message.len() > MAX_CARGO_PAYLOAD_BYTES);
        if cut {
            flush(&mut batch, batch_expiry)?;
            batch_bytes = 0;
            batch_expiry = now;
        }
        batch_bytes += message.len();
        batch_expiry = batch_expiry.max(expiry);
        batch.push(message);
    }
    flush(&mut batch, batch_expiry)?;

    Ok(cargoes)
}

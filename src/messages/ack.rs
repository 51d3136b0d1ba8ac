//! Parcel collection acknowledgements
//!
//! A PCA tells the sender's side that a parcel has been collected by the
//! recipient's gateway, so the original can be garbage-collected. PCAs
//! travel inside cargoes only.

use serde::{Deserialize, Serialize};

use super::MessageError;

/// Proof that a parcel was collected on behalf of its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelCollectionAck {
    /// Private address of the endpoint that sent the original parcel
    pub sender_endpoint_private_address: String,
    /// Address the original parcel was bound for
    pub recipient_endpoint_address: String,
    /// Id of the collected parcel
    pub parcel_id: String,
}

impl ParcelCollectionAck {
    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<ParcelCollectionAck, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let ack = ParcelCollectionAck {
            sender_endpoint_private_address: "0a1b2c".to_string(),
            recipient_endpoint_address: "https://ping.example.com".to_string(),
            parcel_id: "parcel-42".to_string(),
        };

        let bytes = ack.serialize();
        let decoded = ParcelCollectionAck::deserialize(&bytes).unwrap();
        assert_eq!(decoded, ack);
    }

    #[test]
    fn test_deserialize_garbage() {
        assert!(ParcelCollectionAck::deserialize(&[0xFF, 0xFF, 0xFF]).is_err());
    }
}

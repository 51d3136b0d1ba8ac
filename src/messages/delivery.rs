//! Parcel delivery frames for the parcel collection endpoint

use serde::{Deserialize, Serialize};

use super::MessageError;

/// Server → client: one queued parcel, tagged with a session-scoped id the
/// client must echo back as its acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelDelivery {
    /// Session-unique delivery id (UUID v4)
    pub delivery_id: String,
    /// The parcel's serialization
    pub parcel_serialized: Vec<u8>,
}

impl ParcelDelivery {
    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<ParcelDelivery, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let delivery = ParcelDelivery {
            delivery_id: "3e0cfc7e-d231-4b88-8d4e-8ef7c1a0d2ab".to_string(),
            parcel_serialized: b"parcel bytes".to_vec(),
        };
        let decoded = ParcelDelivery::deserialize(&delivery.serialize()).unwrap();
        assert_eq!(decoded, delivery);
    }
}

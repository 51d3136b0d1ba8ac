//! Cargo collection authorizations
//!
//! A CCA lets the public gateway hand our queued cargo to the courier that
//! presents it. It carries a freshly issued cargo delivery authorization
//! certificate, sealed so only the public gateway can read it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CLOCK_DRIFT_TOLERANCE_MINUTES, OUTBOUND_CARGO_TTL_DAYS};
use crate::security::certificate::{sign_detached, verify_detached, Certificate};
use crate::security::envelope::{open_envelope, seal_envelope};
use crate::security::keys::KeyPair;

use super::MessageError;

/// The sealed payload of a CCA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoCollectionRequest {
    /// Short-lived certificate authorizing cargo delivery to the courier
    pub cargo_delivery_authorization: Certificate,
}

impl CargoCollectionRequest {
    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<CargoCollectionRequest, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

/// A signed, encrypted request authorizing cargo collection by a courier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoCollectionAuthorization {
    /// Certificate of the private gateway issuing the authorization
    pub sender_certificate: Certificate,
    /// `https://` address of the public gateway
    pub recipient_address: String,
    /// Random authorization id
    pub cca_id: String,
    /// Creation time (unix seconds)
    pub creation_time: i64,
    /// Lifetime in seconds from creation
    pub ttl_secs: i64,
    /// Sealed [`CargoCollectionRequest`]
    pub payload: Vec<u8>,
    /// Detached signature by the sender over the fields above
    pub signature: Vec<u8>,
}

impl CargoCollectionAuthorization {
    /// Build and sign a CCA for the given public gateway.
    ///
    /// The validity window is `[now − drift tolerance, now + cargo TTL]`.
    /// The embedded cargo delivery authorization names the public gateway's
    /// identity key as subject, is issued by the CCA issuer and is valid
    /// until `now + cargo TTL`.
    pub fn new(
        public_gateway_certificate: &Certificate,
        public_gateway_address: &str,
        node: &KeyPair,
        node_certificate: Certificate,
        cca_issuer: &KeyPair,
        now: i64,
    ) -> Result<CargoCollectionAuthorization, MessageError> {
        let drift = CLOCK_DRIFT_TOLERANCE_MINUTES * 60;
        let ttl = OUTBOUND_CARGO_TTL_DAYS * 24 * 3600;

        let cargo_delivery_authorization = Certificate::issue(
            public_gateway_certificate.subject_public_key,
            cca_issuer,
            now - drift,
            now + ttl,
        );

        let request = CargoCollectionRequest {
            cargo_delivery_authorization,
        };
        let payload = seal_envelope(public_gateway_certificate, &request.serialize())
            .map_err(|e| MessageError::Envelope(e.to_string()))?;

        let mut cca = CargoCollectionAuthorization {
            sender_certificate: node_certificate,
            recipient_address: format!("https://{public_gateway_address}"),
            cca_id: Uuid::new_v4().to_string(),
            creation_time: now - drift,
            ttl_secs: drift + ttl,
            payload,
            signature: Vec::new(),
        };
        cca.signature = sign_detached(&node.private_key, &cca.signed_data());
        Ok(cca)
    }

    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<CargoCollectionAuthorization, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    /// Expiry time (unix seconds).
    pub fn expiry(&self) -> i64 {
        self.creation_time.saturating_add(self.ttl_secs)
    }

    /// Verify the sender signature.
    pub fn verify_signature(&self) -> Result<(), MessageError> {
        if verify_detached(
            &self.sender_certificate.subject_public_key,
            &self.signed_data(),
            &self.signature,
        ) {
            Ok(())
        } else {
            Err(MessageError::InvalidSignature)
        }
    }

    /// Open the sealed request with the public gateway's private key.
    pub fn unwrap_payload(
        &self,
        private_key: &[u8; 32],
    ) -> Result<CargoCollectionRequest, MessageError> {
        let plaintext = open_envelope(private_key, &self.payload)
            .map_err(|e| MessageError::Envelope(e.to_string()))?;
        CargoCollectionRequest::deserialize(&plaintext)
    }

    fn signed_data(&self) -> Vec<u8> {
        postcard::to_allocvec(&(
            &self.sender_certificate,
            &self.recipient_address,
            &self.cca_id,
            self.creation_time,
            self.ttl_secs,
            &self.payload,
        ))
        .expect("serialization should not fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::keys::generate_key_pair;

    struct Fixture {
        public_gateway: KeyPair,
        public_gateway_cert: Certificate,
        node: KeyPair,
        node_cert: Certificate,
        cca_issuer: KeyPair,
    }

    fn fixture() -> Fixture {
        let public_gateway = generate_key_pair();
        let public_gateway_cert =
            Certificate::issue(public_gateway.public_key, &public_gateway, 0, i64::MAX);
        let node = generate_key_pair();
        let node_cert = Certificate::issue(node.public_key, &public_gateway, 0, i64::MAX);
        let cca_issuer = generate_key_pair();
        Fixture {
            public_gateway,
            public_gateway_cert,
            node,
            node_cert,
            cca_issuer,
        }
    }

    #[test]
    fn test_validity_window() {
        let f = fixture();
        let now = 1_000_000;

        let cca = CargoCollectionAuthorization::new(
            &f.public_gateway_cert,
            "gw.example.com",
            &f.node,
            f.node_cert,
            &f.cca_issuer,
            now,
        )
        .unwrap();

        // creation ≤ now ≤ expiry, with expiry − creation = 14d + 90min
        assert!(cca.creation_time <= now && now <= cca.expiry());
        assert_eq!(
            cca.expiry() - cca.creation_time,
            OUTBOUND_CARGO_TTL_DAYS * 24 * 3600 + CLOCK_DRIFT_TOLERANCE_MINUTES * 60
        );
        assert_eq!(cca.recipient_address, "https://gw.example.com");
    }

    #[test]
    fn test_roundtrip_and_unwrap() {
        let f = fixture();
        let now = 1_000_000;

        let cca = CargoCollectionAuthorization::new(
            &f.public_gateway_cert,
            "gw.example.com",
            &f.node,
            f.node_cert,
            &f.cca_issuer,
            now,
        )
        .unwrap();

        let decoded = CargoCollectionAuthorization::deserialize(&cca.serialize()).unwrap();
        assert_eq!(decoded, cca);
        assert!(decoded.verify_signature().is_ok());

        let request = decoded.unwrap_payload(&f.public_gateway.private_key).unwrap();
        let cda = request.cargo_delivery_authorization;
        assert_eq!(cda.subject_public_key, f.public_gateway.public_key);
        assert_eq!(cda.issuer_public_key, f.cca_issuer.public_key);
        assert!(cda.is_valid_at(now + OUTBOUND_CARGO_TTL_DAYS * 24 * 3600));
        assert!(!cda.is_valid_at(now + OUTBOUND_CARGO_TTL_DAYS * 24 * 3600 + 1));
    }

    #[test]
    fn test_tampered_cca_fails_signature() {
        let f = fixture();
        let mut cca = CargoCollectionAuthorization::new(
            &f.public_gateway_cert,
            "gw.example.com",
            &f.node,
            f.node_cert,
            &f.cca_issuer,
            1_000_000,
        )
        .unwrap();

        cca.recipient_address = "https://evil.example.com".into();
        assert_eq!(cca.verify_signature(), Err(MessageError::InvalidSignature));
    }
}

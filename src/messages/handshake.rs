//! Handshake frames for the parcel collection endpoint
//!
//! The server opens every session with a nonce challenge; the client
//! answers with one detached signature per endpoint it speaks for. Each
//! signature embeds the signing endpoint's certificate so the server can
//! chain it back to its own certificates.

use serde::{Deserialize, Serialize};

use crate::security::certificate::{sign_detached, verify_detached, Certificate};
use crate::security::keys::KeyPair;

use super::parcel::verify_sender_chain;
use super::MessageError;

/// Size of the handshake nonce.
pub const NONCE_SIZE: usize = 16;

/// Server → client: the challenge nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeChallenge {
    /// 16 cryptographically random bytes
    pub nonce: [u8; NONCE_SIZE],
}

impl HandshakeChallenge {
    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<HandshakeChallenge, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

/// Client → server: one signature per endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Encoded [`NonceSignature`]s, one per endpoint
    pub nonce_signatures: Vec<Vec<u8>>,
}

impl HandshakeResponse {
    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<HandshakeResponse, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

/// A detached signature over the challenge nonce, carrying the signer's
/// certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceSignature {
    /// Certificate of the signing endpoint
    pub certificate: Certificate,
    /// Detached signature over the nonce
    pub signature: Vec<u8>,
}

impl NonceSignature {
    /// Sign `nonce` with an endpoint key.
    pub fn sign(nonce: &[u8; NONCE_SIZE], signer: &KeyPair, certificate: Certificate) -> Self {
        NonceSignature {
            certificate,
            signature: sign_detached(&signer.private_key, nonce),
        }
    }

    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    /// Decode from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<NonceSignature, MessageError> {
        postcard::from_bytes(bytes).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    /// Verify the signature over `nonce` and chain the certificate to one
    /// of `trusted`. Returns the verified endpoint certificate.
    pub fn verify(
        &self,
        nonce: &[u8; NONCE_SIZE],
        trusted: &[Certificate],
        now: i64,
    ) -> Result<Certificate, MessageError> {
        if !verify_detached(
            &self.certificate.subject_public_key,
            nonce,
            &self.signature,
        ) {
            return Err(MessageError::InvalidSignature);
        }
        verify_sender_chain(&self.certificate, &[], trusted, now)?;
        Ok(self.certificate.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::keys::generate_key_pair;

    #[test]
    fn test_challenge_roundtrip() {
        let challenge = HandshakeChallenge { nonce: [7u8; 16] };
        let decoded = HandshakeChallenge::deserialize(&challenge.serialize()).unwrap();
        assert_eq!(decoded, challenge);
    }

    #[test]
    fn test_nonce_signature_verifies() {
        let gateway = generate_key_pair();
        let gateway_cert = Certificate::issue(gateway.public_key, &gateway, 0, i64::MAX);
        let endpoint = generate_key_pair();
        let endpoint_cert = Certificate::issue(endpoint.public_key, &gateway, 0, i64::MAX);

        let nonce = [42u8; 16];
        let signature = NonceSignature::sign(&nonce, &endpoint, endpoint_cert.clone());

        let verified = signature
            .verify(&nonce, std::slice::from_ref(&gateway_cert), 1000)
            .unwrap();
        assert_eq!(verified.private_address(), endpoint_cert.private_address());
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        let gateway = generate_key_pair();
        let gateway_cert = Certificate::issue(gateway.public_key, &gateway, 0, i64::MAX);
        let endpoint = generate_key_pair();
        let endpoint_cert = Certificate::issue(endpoint.public_key, &gateway, 0, i64::MAX);

        let signature = NonceSignature::sign(&[1u8; 16], &endpoint, endpoint_cert);

        assert_eq!(
            signature.verify(&[2u8; 16], std::slice::from_ref(&gateway_cert), 1000),
            Err(MessageError::InvalidSignature)
        );
    }

    #[test]
    fn test_foreign_endpoint_rejected() {
        let gateway = generate_key_pair();
        let gateway_cert = Certificate::issue(gateway.public_key, &gateway, 0, i64::MAX);

        // Endpoint certified by a different gateway
        let other_gateway = generate_key_pair();
        let endpoint = generate_key_pair();
        let endpoint_cert = Certificate::issue(endpoint.public_key, &other_gateway, 0, i64::MAX);

        let nonce = [42u8; 16];
        let signature = NonceSignature::sign(&nonce, &endpoint, endpoint_cert);

        assert_eq!(
            signature.verify(&nonce, std::slice::from_ref(&gateway_cert), 1000),
            Err(MessageError::UntrustedSender)
        );
    }

    #[test]
    fn test_response_roundtrip() {
        let endpoint = generate_key_pair();
        let cert = Certificate::issue(endpoint.public_key, &endpoint, 0, i64::MAX);
        let signature = NonceSignature::sign(&[3u8; 16], &endpoint, cert);

        let response = HandshakeResponse {
            nonce_signatures: vec![signature.serialize()],
        };
        let decoded = HandshakeResponse::deserialize(&response.serialize()).unwrap();
        assert_eq!(decoded, response);

        let parsed = NonceSignature::deserialize(&decoded.nonce_signatures[0]).unwrap();
        assert_eq!(parsed, signature);
    }
}

//! PoWeb client seam
//!
//! The two RPCs of the registration round-trip, behind a trait so the
//! registrar can be exercised without a network. The production client
//! talks HTTP to the public gateway; DNS/SRV resolution of the address is
//! delegated to the HTTP stack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::security::certificate::{sign_detached, verify_detached, Certificate};
use crate::security::keys::KeyPair;

/// PoWeb transport errors
#[derive(Debug)]
pub enum PowebError {
    /// The request could not be sent or the response not read
    Http(String),
    /// The gateway answered with an unexpected status
    UnexpectedStatus(u16),
    /// The response body could not be decoded
    Malformed(String),
}

impl std::fmt::Display for PowebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowebError::Http(e) => write!(f, "http error: {}", e),
            PowebError::UnexpectedStatus(status) => {
                write!(f, "unexpected response status: {}", status)
            }
            PowebError::Malformed(e) => write!(f, "malformed response: {}", e),
        }
    }
}

impl std::error::Error for PowebError {}

/// A signed request to register this node with a public gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateNodeRegistrationRequest {
    /// The node's public key
    pub public_key: [u8; 32],
    /// The opaque authorization blob from pre-registration
    pub registration_authorization: Vec<u8>,
    /// Detached signature by the node key over the fields above
    pub signature: Vec<u8>,
}

impl PrivateNodeRegistrationRequest {
    /// Build and sign a registration request.
    pub fn new(node: &KeyPair, registration_authorization: Vec<u8>) -> Self {
        let mut request = PrivateNodeRegistrationRequest {
            public_key: node.public_key,
            registration_authorization,
            signature: Vec::new(),
        };
        request.signature = sign_detached(&node.private_key, &request.signed_data());
        request
    }

    /// Verify the request signature (used by the public gateway side and
    /// by tests).
    pub fn verify_signature(&self) -> bool {
        verify_detached(&self.public_key, &self.signed_data(), &self.signature)
    }

    /// Encode to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("serialization should not fail")
    }

    fn signed_data(&self) -> Vec<u8> {
        postcard::to_allocvec(&(&self.public_key, &self.registration_authorization))
            .expect("serialization should not fail")
    }
}

/// The public gateway's answer to a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateNodeRegistration {
    /// Long-lived identity certificate for this node
    pub private_node_certificate: Certificate,
    /// The public gateway's own identity certificate
    pub public_gateway_certificate: Certificate,
}

/// Client for the two registration RPCs.
#[async_trait]
pub trait PublicGatewayClient: Send + Sync {
    /// Send our public key; receive an opaque registration authorization.
    async fn pre_register_node(&self, public_key: &[u8; 32]) -> Result<Vec<u8>, PowebError>;

    /// Send the signed registration request; receive the certificates.
    async fn register_node(
        &self,
        request: &PrivateNodeRegistrationRequest,
    ) -> Result<PrivateNodeRegistration, PowebError>;
}

/// Resolves a public gateway address into a client.
#[async_trait]
pub trait PublicGatewayClientFactory: Send + Sync {
    /// Resolve a client for `public_address`.
    async fn resolve(
        &self,
        public_address: &str,
    ) -> Result<Box<dyn PublicGatewayClient>, PowebError>;
}

/// HTTP-backed PoWeb client.
pub struct HttpPowebClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPowebClient {
    /// Create a client for the gateway at `public_address`.
    pub fn new(public_address: &str) -> HttpPowebClient {
        HttpPowebClient {
            base_url: format!("https://{public_address}"),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PublicGatewayClient for HttpPowebClient {
    async fn pre_register_node(&self, public_key: &[u8; 32]) -> Result<Vec<u8>, PowebError> {
        let response = self
            .http
            .post(format!("{}/v1/pre-registrations", self.base_url))
            .body(public_key.to_vec())
            .send()
            .await
            .map_err(|e| PowebError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PowebError::UnexpectedStatus(response.status().as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| PowebError::Http(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn register_node(
        &self,
        request: &PrivateNodeRegistrationRequest,
    ) -> Result<PrivateNodeRegistration, PowebError> {
        let response = self
            .http
            .post(format!("{}/v1/nodes", self.base_url))
            .body(request.serialize())
            .send()
            .await
            .map_err(|e| PowebError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PowebError::UnexpectedStatus(response.status().as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| PowebError::Http(e.to_string()))?;
        postcard::from_bytes(&body).map_err(|e| PowebError::Malformed(e.to_string()))
    }
}

/// Factory producing [`HttpPowebClient`]s.
#[derive(Default)]
pub struct HttpPowebClientFactory;

#[async_trait]
impl PublicGatewayClientFactory for HttpPowebClientFactory {
    async fn resolve(
        &self,
        public_address: &str,
    ) -> Result<Box<dyn PublicGatewayClient>, PowebError> {
        Ok(Box::new(HttpPowebClient::new(public_address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::keys::generate_key_pair;

    #[test]
    fn test_registration_request_signature() {
        let node = generate_key_pair();
        let request = PrivateNodeRegistrationRequest::new(&node, b"auth-blob".to_vec());

        assert!(request.verify_signature());

        // Tampering with the authorization invalidates the signature
        let mut tampered = request.clone();
        tampered.registration_authorization = b"other-blob".to_vec();
        assert!(!tampered.verify_signature());
    }

    #[test]
    fn test_registration_request_roundtrip() {
        let node = generate_key_pair();
        let request = PrivateNodeRegistrationRequest::new(&node, b"auth".to_vec());

        let decoded: PrivateNodeRegistrationRequest =
            postcard::from_bytes(&request.serialize()).unwrap();
        assert_eq!(decoded, request);
        assert!(decoded.verify_signature());
    }
}

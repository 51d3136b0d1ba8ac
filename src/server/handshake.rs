//! Session-opening handshake
//!
//! Proves that the peer controls the private keys of one or more endpoint
//! certificates issued by this gateway before any parcel is streamed.

use rand::RngCore;
use tracing::{debug, warn};

use crate::constants::CLOSE_CODE_CANNOT_ACCEPT;
use crate::messages::handshake::{
    HandshakeChallenge, HandshakeResponse, NonceSignature, NONCE_SIZE,
};
use crate::security::certificate::Certificate;

use super::{Frame, FrameTransport, SessionError};

/// Why a handshake did not produce authenticated endpoints.
#[derive(Debug)]
pub enum HandshakeFailure {
    /// The peer closed (or the transport failed) before responding
    ConnectionClosed,
    /// The response was rejected; the session was closed with 1008
    Refused(String),
    /// Sending the challenge failed
    Transport(SessionError),
}

/// Run the server side of the handshake on `transport`.
///
/// Returns the private addresses of all verified endpoint certificates.
/// On any validation failure the connection is closed with code 1008 and
/// the failure is returned; the caller must not stream anything.
pub async fn perform_handshake<T: FrameTransport>(
    transport: &mut T,
    trusted: &[Certificate],
    now: i64,
) -> Result<Vec<String>, HandshakeFailure> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let challenge = HandshakeChallenge { nonce };
    transport
        .send(Frame::Binary(challenge.serialize()))
        .await
        .map_err(HandshakeFailure::Transport)?;

    // Exactly one binary frame is the response; anything else in this
    // phase is ignored.
    let response_bytes = loop {
        match transport.recv().await {
            Some(Frame::Binary(bytes)) => break bytes,
            Some(Frame::Text(_)) => {
                debug!("ignoring text frame during handshake");
            }
            None => return Err(HandshakeFailure::ConnectionClosed),
        }
    };

    let response = match HandshakeResponse::deserialize(&response_bytes) {
        Ok(response) => response,
        Err(e) => {
            return refuse(transport, format!("Invalid handshake response: {e}")).await;
        }
    };

    if response.nonce_signatures.is_empty() {
        return refuse(
            transport,
            "Handshake response did not include any nonce signatures".to_string(),
        )
        .await;
    }

    let mut endpoint_addresses = Vec::with_capacity(response.nonce_signatures.len());
    for signature_bytes in &response.nonce_signatures {
        let signature = match NonceSignature::deserialize(signature_bytes) {
            Ok(signature) => signature,
            Err(e) => {
                return refuse(transport, format!("Malformed nonce signature: {e}")).await;
            }
        };
        match signature.verify(&nonce, trusted, now) {
            Ok(certificate) => endpoint_addresses.push(certificate.private_address()),
            Err(e) => {
                return refuse(transport, format!("Invalid nonce signature: {e}")).await;
            }
        }
    }

    debug!(
        endpoints = endpoint_addresses.len(),
        "handshake complete"
    );
    Ok(endpoint_addresses)
}

async fn refuse<T: FrameTransport>(
    transport: &mut T,
    reason: String,
) -> Result<Vec<String>, HandshakeFailure> {
    warn!(reason = %reason, "handshake refused");
    transport.close(CLOSE_CODE_CANNOT_ACCEPT, &reason).await;
    Err(HandshakeFailure::Refused(reason))
}

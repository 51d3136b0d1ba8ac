//! Sessionless enveloped-data
//!
//! Encrypts payloads so that only the holder of a certificate's subject key
//! can decrypt, without any prior session state. Uses ed25519→x25519 key
//! conversion + crypto_box sealed boxes: an ephemeral key pair is generated
//! per envelope, so the sender needs no long-term decryption key and the
//! recipient learns nothing about the sender from the ciphertext.

use ed25519_dalek::{SigningKey, VerifyingKey};

use super::certificate::Certificate;

/// Envelope sealing/opening errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The recipient public key is not a valid Ed25519 point
    InvalidRecipientKey,
    /// Sealing failed
    SealFailed,
    /// Opening failed - wrong key or corrupted ciphertext
    OpenFailed,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::InvalidRecipientKey => write!(f, "invalid recipient public key"),
            EnvelopeError::SealFailed => write!(f, "envelope sealing failed"),
            EnvelopeError::OpenFailed => {
                write!(f, "envelope opening failed (wrong key or corrupted data)")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// Seal `plaintext` so only the subject of `recipient` can open it.
pub fn seal_envelope(recipient: &Certificate, plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    use crypto_box::aead::OsRng;

    // Convert the recipient's ed25519 public key to x25519
    let verifying_key = VerifyingKey::from_bytes(&recipient.subject_public_key)
        .map_err(|_| EnvelopeError::InvalidRecipientKey)?;
    let x25519_public = crypto_box::PublicKey::from(verifying_key.to_montgomery());

    x25519_public
        .seal(&mut OsRng, plaintext)
        .map_err(|_| EnvelopeError::SealFailed)
}

/// Open an envelope sealed to the holder of `private_key`.
pub fn open_envelope(private_key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    // Convert our ed25519 private key to x25519
    let signing_key = SigningKey::from_bytes(private_key);
    let x25519_secret = crypto_box::SecretKey::from(signing_key.to_scalar());

    x25519_secret
        .unseal(ciphertext)
        .map_err(|_| EnvelopeError::OpenFailed)
}

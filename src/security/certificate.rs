//! Gateway and endpoint certificates
//!
//! Certificates bind an Ed25519 subject key to an issuer key for a bounded
//! validity window. Two identifiers are derived from a certificate:
//!
//! - **private address**: `hex(BLAKE3(subject public key))`
//! - **issuer private address**: `hex(BLAKE3(issuer public key))`
//!
//! A certificate is self-issued when the two addresses coincide.
//!
//! # Signing Scheme
//!
//! ```text
//! hash = BLAKE3(serial || subject_key || issuer_key || not_before || not_after)
//! signature = Ed25519_Sign(issuer_private_key, hash)
//! ```
//!
//! Hash-then-sign keeps the signed input a fixed size and matches how every
//! other signed structure in this crate is produced.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::keys::{private_address_for, KeyPair};

/// Certificate errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// The issuer signature does not verify
    InvalidSignature,
    /// The subject public key is not a valid Ed25519 point
    InvalidPublicKey,
    /// The certificate is outside its validity window
    OutsideValidityWindow,
    /// No trusted certificate issued this one
    UntrustedIssuer,
}

impl std::fmt::Display for CertificateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateError::InvalidSignature => write!(f, "invalid certificate signature"),
            CertificateError::InvalidPublicKey => write!(f, "invalid subject public key"),
            CertificateError::OutsideValidityWindow => {
                write!(f, "certificate outside its validity window")
            }
            CertificateError::UntrustedIssuer => write!(f, "certificate issuer is not trusted"),
        }
    }
}

impl std::error::Error for CertificateError {}

/// A certificate binding a subject key to an issuer for a validity window.
///
/// Timestamps are unix seconds; the window is inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Random serial number, also used as the key store lookup handle
    pub serial_number: u64,
    /// Subject's 32-byte Ed25519 public key
    pub subject_public_key: [u8; 32],
    /// Issuer's 32-byte Ed25519 public key
    pub issuer_public_key: [u8; 32],
    /// Start of validity (unix seconds, inclusive)
    pub not_before: i64,
    /// End of validity (unix seconds, inclusive)
    pub not_after: i64,
    /// Ed25519 signature by the issuer over the remaining fields
    pub signature: Vec<u8>,
}

impl Certificate {
    /// Issue a certificate for `subject_public_key`, signed by `issuer`.
    ///
    /// A random serial number is minted. Pass the issuer's own public key
    /// as the subject to self-issue.
    pub fn issue(
        subject_public_key: [u8; 32],
        issuer: &KeyPair,
        not_before: i64,
        not_after: i64,
    ) -> Certificate {
        let serial_number = rand::rngs::OsRng.next_u64();
        let tbs = tbs_hash(
            serial_number,
            &subject_public_key,
            &issuer.public_key,
            not_before,
            not_after,
        );

        let signing_key = SigningKey::from_bytes(&issuer.private_key);
        let signature: Signature = signing_key.sign(tbs.as_bytes());

        Certificate {
            serial_number,
            subject_public_key,
            issuer_public_key: issuer.public_key,
            not_before,
            not_after,
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// The subject's private address.
    pub fn private_address(&self) -> String {
        private_address_for(&self.subject_public_key)
    }

    /// The issuer's private address.
    pub fn issuer_private_address(&self) -> String {
        private_address_for(&self.issuer_public_key)
    }

    /// Whether subject and issuer are the same key.
    pub fn is_self_issued(&self) -> bool {
        self.subject_public_key == self.issuer_public_key
    }

    /// Whether `now` falls inside the validity window.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Verify the issuer signature against the embedded issuer key.
    pub fn verify_signature(&self) -> Result<(), CertificateError> {
        let verifying_key = VerifyingKey::from_bytes(&self.issuer_public_key)
            .map_err(|_| CertificateError::InvalidPublicKey)?;

        let signature_bytes: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| CertificateError::InvalidSignature)?;
        let signature = Signature::from_bytes(&signature_bytes);

        let tbs = tbs_hash(
            self.serial_number,
            &self.subject_public_key,
            &self.issuer_public_key,
            self.not_before,
            self.not_after,
        );

        verifying_key
            .verify(tbs.as_bytes(), &signature)
            .map_err(|_| CertificateError::InvalidSignature)
    }

    /// Check that this certificate was issued by one of `trusted` and is
    /// valid at `now`.
    ///
    /// Issuance is direct: the issuer key must be the subject key of a
    /// trusted certificate and the signature must verify against it.
    pub fn verify_chain(
        &self,
        trusted: &[Certificate],
        now: i64,
    ) -> Result<(), CertificateError> {
        if !self.is_valid_at(now) {
            return Err(CertificateError::OutsideValidityWindow);
        }
        let issued_by_trusted = trusted
            .iter()
            .any(|anchor| anchor.subject_public_key == self.issuer_public_key);
        if !issued_by_trusted {
            return Err(CertificateError::UntrustedIssuer);
        }
        self.verify_signature()
    }
}

/// Sign arbitrary bytes: `Ed25519_Sign(private_key, BLAKE3(data))`.
pub fn sign_detached(private_key: &[u8; 32], data: &[u8]) -> Vec<u8> {
    let hash = blake3::hash(data);
    let signing_key = SigningKey::from_bytes(private_key);
    signing_key.sign(hash.as_bytes()).to_bytes().to_vec()
}

/// Verify a detached signature produced by [`sign_detached`].
pub fn verify_detached(public_key: &[u8; 32], data: &[u8], signature: &[u8]) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key,
        Err(_) => {
            tracing::trace!("verify_detached: invalid public key bytes");
            return false;
        }
    };
    let signature_bytes: [u8; 64] = match signature.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let signature = Signature::from_bytes(&signature_bytes);
    let hash = blake3::hash(data);
    verifying_key.verify(hash.as_bytes(), &signature).is_ok()
}

/// Hash the to-be-signed fields of a certificate.
fn tbs_hash(
    serial_number: u64,
    subject_public_key: &[u8; 32],
    issuer_public_key: &[u8; 32],
    not_before: i64,
    not_after: i64,
) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serial_number.to_be_bytes());
    hasher.update(subject_public_key);
    hasher.update(issuer_public_key);
    hasher.update(&not_before.to_be_bytes());
    hasher.update(&not_after.to_be_bytes());
    hasher.finalize()
}

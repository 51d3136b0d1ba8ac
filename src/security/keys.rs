//! Node identity keys
//!
//! Every node in the relay network - gateways and endpoints alike - is an
//! Ed25519 key pair. The public half doubles as the node's wire identity:
//! the private address is derived from it, and certificates bind it to an
//! issuer. The private half signs parcels, cargoes and handshake nonces
//! and opens enveloped payloads; it is zeroed from memory on drop.

use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Derive a node's private address from its public key:
/// `hex(BLAKE3(public key))`.
///
/// This is the identifier by which parcels, collection acks and the parcel
/// store name private nodes; certificates derive their subject and issuer
/// addresses the same way.
pub fn private_address_for(public_key: &[u8; 32]) -> String {
    hex::encode(blake3::hash(public_key).as_bytes())
}

/// An Ed25519 node key pair.
///
/// The private key is zeroed from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    /// 32-byte private key (keep this secret!)
    pub private_key: [u8; 32],
    /// 32-byte public key: the node's wire identity
    #[zeroize(skip)]
    pub public_key: [u8; 32],
}

impl KeyPair {
    /// The private address this key answers to on the wire.
    pub fn private_address(&self) -> String {
        private_address_for(&self.public_key)
    }
}

// Logs name nodes by private address; the private half never appears.
impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_address", &self.private_address())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh node key pair from the OS CSPRNG.
pub fn generate_key_pair() -> KeyPair {
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    let key_pair = key_pair_from_bytes(&secret);
    secret.zeroize();
    key_pair
}

/// Restore a key pair from a private key held by the key store.
///
/// The public half (and with it the node's private address) is recomputed
/// rather than persisted, so a stored key cannot disagree with its address.
pub fn key_pair_from_bytes(private_key: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(private_key);
    KeyPair {
        private_key: signing_key.to_bytes(),
        public_key: signing_key.verifying_key().to_bytes(),
    }
}

//! Cryptographic identities for the gateway
//!
//! - `keys`: Ed25519 key pairs with zeroized private halves
//! - `certificate`: minimal certificates with derived private addresses
//! - `envelope`: sessionless enveloped-data (sealed boxes)

pub mod certificate;
pub mod envelope;
pub mod keys;

pub use certificate::{Certificate, CertificateError};
pub use envelope::{seal_envelope, open_envelope, EnvelopeError};
pub use keys::{generate_key_pair, key_pair_from_bytes, private_address_for, KeyPair};

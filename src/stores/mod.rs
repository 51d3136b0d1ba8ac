//! Consumed storage interfaces
//!
//! The sync core does not own its persistence: parcels, keys and config are
//! reached through the traits below. `SqliteStore` is the production
//! implementation; tests use the in-memory store from `crate::testing`.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::{Parcel, ParcelCollectionAck};
use crate::security::certificate::Certificate;
use crate::security::keys::KeyPair;

/// Which way a stored parcel is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParcelDirection {
    /// Arrived from the internet, awaiting collection by a local endpoint
    FromInternetToEndpoint,
    /// Queued by a local endpoint, awaiting shipment towards the internet
    TowardsInternet,
}

impl ParcelDirection {
    /// Stable integer tag used by the database layer.
    pub fn as_i64(self) -> i64 {
        match self {
            ParcelDirection::FromInternetToEndpoint => 0,
            ParcelDirection::TowardsInternet => 1,
        }
    }
}

/// A queued internet-bound parcel reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternetBoundParcel {
    /// Opaque store key
    pub parcel_key: String,
    /// Expiry time (unix seconds)
    pub expiry: i64,
}

/// A private key together with its certificate.
#[derive(Debug, Clone)]
pub struct NodeKey {
    /// The key pair
    pub key_pair: KeyPair,
    /// The matching certificate
    pub certificate: Certificate,
}

/// Storage errors
#[derive(Debug)]
pub enum StoreError {
    /// Database error
    Database(String),
    /// A referenced key is missing from the key store
    KeyNotFound(String),
    /// Stored bytes could not be decoded
    Corrupted(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::KeyNotFound(serial) => write!(f, "key not found: {}", serial),
            StoreError::Corrupted(e) => write!(f, "corrupted store entry: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Blob store for parcels, indexed by recipient address and direction.
#[async_trait]
pub trait ParcelStore: Send + Sync {
    /// Lazily yield keys of active (unexpired) endpoint-bound parcels for
    /// any of `addresses`.
    ///
    /// With `keep_alive`, the stream never ends on drain: it stays open and
    /// yields keys of parcels stored after subscription. Without it, the
    /// stream closes once the current queue has been enumerated. Dropping
    /// the receiver cancels the subscription.
    async fn stream_active_bound_for_endpoints(
        &self,
        addresses: Vec<String>,
        keep_alive: bool,
    ) -> Result<mpsc::Receiver<String>, StoreError>;

    /// Fetch a parcel's serialization; `None` if it was deleted meanwhile.
    async fn retrieve(
        &self,
        parcel_key: &str,
        direction: ParcelDirection,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a parcel. Deleting an absent key is a no-op.
    async fn delete(&self, parcel_key: &str, direction: ParcelDirection)
        -> Result<(), StoreError>;

    /// Store an endpoint-bound parcel and record its collection.
    ///
    /// Returns `None` when the parcel had already been collected (duplicate
    /// ingest), in which case nothing is stored.
    async fn store_endpoint_bound(
        &self,
        parcel_serialized: Vec<u8>,
        parcel: &Parcel,
    ) -> Result<Option<String>, StoreError>;

    /// Store an internet-bound parcel queued by a local endpoint.
    async fn store_internet_bound(
        &self,
        parcel_serialized: Vec<u8>,
        parcel: &Parcel,
    ) -> Result<String, StoreError>;

    /// List queued internet-bound parcels with their expiry dates.
    async fn list_internet_bound(&self) -> Result<Vec<InternetBoundParcel>, StoreError>;

    /// List collection acknowledgements not yet shipped in a cargo, each
    /// with the original parcel's expiry date.
    async fn list_pending_collection_acks(
        &self,
    ) -> Result<Vec<(ParcelCollectionAck, i64)>, StoreError>;

    /// Delete the internet-bound parcel an acknowledgement refers to.
    /// Idempotent: a second call for the same ack is a no-op.
    async fn delete_internet_bound_from_ack(
        &self,
        ack: &ParcelCollectionAck,
    ) -> Result<(), StoreError>;

    /// Delete collection rows after their acknowledgements were shipped.
    async fn delete_collection_acks(
        &self,
        acks: &[ParcelCollectionAck],
    ) -> Result<(), StoreError>;
}

/// Persistent store for the node's keys and certificates.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// The node's current identity key and certificate.
    async fn get_current_key(&self) -> Result<NodeKey, StoreError>;

    /// All certificates held for this node (trust anchors for handshakes
    /// and cargo validation).
    async fn fetch_node_certificates(&self) -> Result<Vec<Certificate>, StoreError>;

    /// The CCA issuer key, created (or reissued when stale) on demand.
    async fn get_or_create_cca_issuer(&self) -> Result<NodeKey, StoreError>;

    /// Persist a node key and make it current.
    async fn save_node_key(
        &self,
        key: &KeyPair,
        certificate: &Certificate,
    ) -> Result<(), StoreError>;

    /// Persist the public gateway's identity certificate.
    async fn save_public_gateway_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<(), StoreError>;

    /// The public gateway's identity certificate, if registered.
    async fn get_public_gateway_certificate(&self) -> Result<Option<Certificate>, StoreError>;
}

/// Small key→string map persisted across restarts.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a config value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a config value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

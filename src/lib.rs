//! Private Gateway Sync Core
//!
//! The synchronization machinery of a private gateway in a store-and-forward
//! relay network. It moves opaque, authenticated parcels between local
//! endpoints and a remote public gateway, falling back to couriers -
//! portable devices that physically carry batched cargo - when no Internet
//! path exists.
//!
//! # Module Structure
//!
//! - `server/`: parcel collection endpoint (handshake, sessions, tracking)
//! - `courier/`: two-phase courier sync (driver, transport seam, manager)
//! - `registrar/`: registration with a public gateway
//! - `messages/`: wire formats (parcels, cargoes, CCAs, handshake frames)
//! - `security/`: keys, certificates, sealed envelopes
//! - `stores/`: consumed storage interfaces + SQLite implementation
//! - `testing/`: in-process doubles for all of the above
//!
//! # Quick Start
//!
//! ```ignore
//! use private_gateway::server::ws::{serve, ParcelCollectionState};
//! use private_gateway::stores::SqliteStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open("gateway.db")?);
//! let state = ParcelCollectionState {
//!     parcel_store: store.clone(),
//!     key_store: store,
//! };
//! serve("127.0.0.1:8080".parse()?, state).await?;
//! ```

pub mod constants;
pub mod courier;
pub mod messages;
pub mod registrar;
pub mod security;
pub mod server;
pub mod stores;
pub mod testing;

// Re-export main API types for convenience
pub use courier::{
    CourierSyncDriver, CourierSyncError, CourierSyncManager, CourierSyncStage, CourierSyncStatus,
};
pub use registrar::{GatewayRegistrar, RegistrationError};
pub use server::{CollectionSession, SessionOutcome};
pub use stores::{ConfigStore, KeyStore, ParcelStore, SqliteStore};

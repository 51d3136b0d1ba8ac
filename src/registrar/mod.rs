//! Gateway registration
//!
//! Runs the two-round registration against a public gateway and persists
//! the resulting identity. Nothing is written before the full round-trip
//! succeeds, so a failed registration leaves no partial state.

pub mod poweb;

pub use poweb::{
    HttpPowebClient, HttpPowebClientFactory, PowebError, PrivateNodeRegistration,
    PrivateNodeRegistrationRequest, PublicGatewayClient, PublicGatewayClientFactory,
};

use std::sync::Arc;

use tracing::{debug, info};

use crate::constants::{CONFIG_PUBLIC_GATEWAY_ADDRESS, DEFAULT_PUBLIC_GATEWAY};
use crate::security::keys::{generate_key_pair, KeyPair};
use crate::stores::{ConfigStore, KeyStore, StoreError};

/// Registration failures
#[derive(Debug)]
pub enum RegistrationError {
    /// The PoWeb exchange failed
    Poweb(PowebError),
    /// Reading or writing local state failed
    Store(String),
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::Poweb(e) => write!(f, "registration failed: {}", e),
            RegistrationError::Store(e) => write!(f, "registration failed: {}", e),
        }
    }
}

impl std::error::Error for RegistrationError {}

impl From<PowebError> for RegistrationError {
    fn from(e: PowebError) -> Self {
        RegistrationError::Poweb(e)
    }
}

impl From<StoreError> for RegistrationError {
    fn from(e: StoreError) -> Self {
        RegistrationError::Store(e.to_string())
    }
}

/// Registers this gateway with a public gateway.
pub struct GatewayRegistrar {
    config_store: Arc<dyn ConfigStore>,
    key_store: Arc<dyn KeyStore>,
    client_factory: Arc<dyn PublicGatewayClientFactory>,
}

impl GatewayRegistrar {
    /// Create a registrar.
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        key_store: Arc<dyn KeyStore>,
        client_factory: Arc<dyn PublicGatewayClientFactory>,
    ) -> GatewayRegistrar {
        GatewayRegistrar {
            config_store,
            key_store,
            client_factory,
        }
    }

    /// Register with the gateway at `public_address`.
    ///
    /// Idempotent: when the stored address already equals `public_address`
    /// the call returns without any network activity (the client factory
    /// is not even invoked).
    pub async fn register(&self, public_address: &str) -> Result<(), RegistrationError> {
        let registered = self
            .config_store
            .get(CONFIG_PUBLIC_GATEWAY_ADDRESS)
            .await?;
        if registered.as_deref() == Some(public_address) {
            debug!(public_address, "already registered with this gateway");
            return Ok(());
        }

        let client = self.client_factory.resolve(public_address).await?;

        // Reuse the node key if one exists; mint one on first registration.
        let node_key: KeyPair = match self.key_store.get_current_key().await {
            Ok(current) => current.key_pair,
            Err(_) => generate_key_pair(),
        };

        let authorization = client.pre_register_node(&node_key.public_key).await?;
        let request = PrivateNodeRegistrationRequest::new(&node_key, authorization);
        let registration = client.register_node(&request).await?;

        // The round-trip succeeded; only now is anything persisted.
        self.key_store
            .save_node_key(&node_key, &registration.private_node_certificate)
            .await?;
        self.key_store
            .save_public_gateway_certificate(&registration.public_gateway_certificate)
            .await?;
        self.config_store
            .set(CONFIG_PUBLIC_GATEWAY_ADDRESS, public_address)
            .await?;

        info!(public_address, "registered with public gateway");
        Ok(())
    }

    /// Register with the default public gateway unless an address is
    /// already stored.
    pub async fn register_if_unregistered(&self) -> Result<(), RegistrationError> {
        let registered = self
            .config_store
            .get(CONFIG_PUBLIC_GATEWAY_ADDRESS)
            .await?;
        if registered.is_some() {
            return Ok(());
        }
        self.register(DEFAULT_PUBLIC_GATEWAY).await
    }
}

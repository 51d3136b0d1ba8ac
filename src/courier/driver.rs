//! Courier sync driver
//!
//! The subprocess side of a courier sync: collect inbound cargoes, wait,
//! then deliver queued messages. Per-item failures (unparseable cargo,
//! invalid parcel, undecryptable payload) are logged and skipped; only
//! infrastructure failures abort the sync.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::{
    CONFIG_PUBLIC_GATEWAY_ADDRESS, COURIER_PORT, DELAY_BETWEEN_COLLECTION_AND_DELIVERY_SECONDS,
};
use crate::messages::{
    generate_cargoes, now_unix, Cargo, CargoCollectionAuthorization, CargoMessage, Parcel,
    RecipientType,
};
use crate::security::certificate::Certificate;
use crate::stores::{ConfigStore, KeyStore, NodeKey, ParcelDirection, ParcelStore, StoreError};

use super::cogrpc::{CargoDelivery, CourierClient, CourierClientFactory};
use super::notifier::{CourierSyncStage, StageNotifier};
use super::DefaultGatewayResolver;

/// Sync finished cleanly.
pub const EXIT_OK: i32 = 0;
/// No public gateway is registered.
pub const EXIT_UNREGISTERED_GATEWAY: i32 = 1;
/// The sync failed (network, discovery, stores).
pub const EXIT_FAILED_SYNC: i32 = 2;

enum SyncFailure {
    Unregistered,
    Failed(String),
}

impl From<StoreError> for SyncFailure {
    fn from(e: StoreError) -> Self {
        SyncFailure::Failed(e.to_string())
    }
}

/// Two-phase courier sync.
pub struct CourierSyncDriver {
    parcel_store: Arc<dyn ParcelStore>,
    key_store: Arc<dyn KeyStore>,
    config_store: Arc<dyn ConfigStore>,
    client_factory: Arc<dyn CourierClientFactory>,
    gateway_resolver: Arc<dyn DefaultGatewayResolver>,
    phase_wait: Duration,
}

impl CourierSyncDriver {
    /// Create a driver with the standard inter-phase wait.
    pub fn new(
        parcel_store: Arc<dyn ParcelStore>,
        key_store: Arc<dyn KeyStore>,
        config_store: Arc<dyn ConfigStore>,
        client_factory: Arc<dyn CourierClientFactory>,
        gateway_resolver: Arc<dyn DefaultGatewayResolver>,
    ) -> CourierSyncDriver {
        CourierSyncDriver {
            parcel_store,
            key_store,
            config_store,
            client_factory,
            gateway_resolver,
            phase_wait: Duration::from_secs(DELAY_BETWEEN_COLLECTION_AND_DELIVERY_SECONDS),
        }
    }

    /// Override the inter-phase wait (tests).
    pub fn with_phase_wait(mut self, phase_wait: Duration) -> CourierSyncDriver {
        self.phase_wait = phase_wait;
        self
    }

    /// Run the sync, reporting stages through `notifier`. Returns the
    /// process exit code.
    pub async fn run<W: AsyncWrite + Unpin + Send>(
        &self,
        notifier: &mut StageNotifier<W>,
    ) -> i32 {
        match self.sync(notifier).await {
            Ok(()) => {
                info!("courier sync complete");
                EXIT_OK
            }
            Err(SyncFailure::Unregistered) => {
                warn!("courier sync aborted: gateway is not registered");
                EXIT_UNREGISTERED_GATEWAY
            }
            Err(SyncFailure::Failed(reason)) => {
                error!(reason = %reason, "courier sync failed");
                EXIT_FAILED_SYNC
            }
        }
    }

    async fn sync<W: AsyncWrite + Unpin + Send>(
        &self,
        notifier: &mut StageNotifier<W>,
    ) -> Result<(), SyncFailure> {
        // Pre-flight: a registered public gateway and a reachable courier.
        let public_address = self
            .config_store
            .get(CONFIG_PUBLIC_GATEWAY_ADDRESS)
            .await?
            .ok_or(SyncFailure::Unregistered)?;
        let public_gateway_certificate = self
            .key_store
            .get_public_gateway_certificate()
            .await?
            .ok_or(SyncFailure::Unregistered)?;

        let courier_ip = self
            .gateway_resolver
            .resolve()
            .await
            .map_err(|e| SyncFailure::Failed(e.to_string()))?;
        let courier_url = format!("https://{courier_ip}:{COURIER_PORT}");
        info!(courier_url = %courier_url, "connecting to courier");

        let mut client = self
            .client_factory
            .connect(&courier_url)
            .await
            .map_err(|e| SyncFailure::Failed(e.to_string()))?;

        let result = self
            .exchange(
                client.as_mut(),
                notifier,
                &public_address,
                &public_gateway_certificate,
            )
            .await;
        client.close().await;
        result
    }

    async fn exchange<W: AsyncWrite + Unpin + Send>(
        &self,
        client: &mut dyn CourierClient,
        notifier: &mut StageNotifier<W>,
        public_address: &str,
        public_gateway_certificate: &Certificate,
    ) -> Result<(), SyncFailure> {
        let node = self.key_store.get_current_key().await?;

        self.collect(client, notifier, public_address, public_gateway_certificate, &node)
            .await?;

        notifier
            .notify(CourierSyncStage::Wait)
            .await
            .map_err(|e| SyncFailure::Failed(e.to_string()))?;
        tokio::time::sleep(self.phase_wait).await;

        self.deliver(client, notifier, public_address, public_gateway_certificate, &node)
            .await
    }

    async fn collect<W: AsyncWrite + Unpin + Send>(
        &self,
        client: &mut dyn CourierClient,
        notifier: &mut StageNotifier<W>,
        public_address: &str,
        public_gateway_certificate: &Certificate,
        node: &NodeKey,
    ) -> Result<(), SyncFailure> {
        notifier
            .notify(CourierSyncStage::Collection)
            .await
            .map_err(|e| SyncFailure::Failed(e.to_string()))?;

        let cca_issuer = self.key_store.get_or_create_cca_issuer().await?;
        let cca = CargoCollectionAuthorization::new(
            public_gateway_certificate,
            public_address,
            &node.key_pair,
            node.certificate.clone(),
            &cca_issuer.key_pair,
            now_unix(),
        )
        .map_err(|e| SyncFailure::Failed(e.to_string()))?;

        let mut cargoes = client
            .collect_cargo(cca.serialize())
            .await
            .map_err(|e| SyncFailure::Failed(e.to_string()))?;

        let own_certificates = self.key_store.fetch_node_certificates().await?;
        // Trust anchors for cargo validation are restricted to self-issued
        // certificates: a trust anchor sharing its subject key with an end
        // entity breaks chain verification otherwise.
        let self_issued: Vec<Certificate> = own_certificates
            .iter()
            .filter(|cert| cert.issuer_private_address() == cert.private_address())
            .cloned()
            .collect();

        let mut collected = 0usize;
        while let Some(cargo_serialized) = cargoes.recv().await {
            collected += 1;
            self.process_cargo(&cargo_serialized, &self_issued, &own_certificates, node)
                .await?;
        }
        info!(cargoes = collected, "collection phase finished");
        Ok(())
    }

    /// Ingest one inbound cargo. Anything wrong with the cargo or its
    /// items is logged and skipped; store failures propagate.
    async fn process_cargo(
        &self,
        cargo_serialized: &[u8],
        self_issued: &[Certificate],
        own_certificates: &[Certificate],
        node: &NodeKey,
    ) -> Result<(), SyncFailure> {
        let cargo = match Cargo::deserialize(cargo_serialized) {
            Ok(cargo) => cargo,
            Err(e) => {
                warn!(error = %e, "ignoring unparseable cargo");
                return Ok(());
            }
        };

        let now = now_unix();
        if let Err(e) = cargo.validate(self_issued, now) {
            info!(cargo_id = %cargo.cargo_id, error = %e, "ignoring unauthorized cargo");
            return Ok(());
        }

        let message_set = match cargo.unwrap_payload(&node.key_pair.private_key) {
            Ok(message_set) => message_set,
            Err(e) => {
                info!(cargo_id = %cargo.cargo_id, error = %e, "ignoring undecryptable cargo");
                return Ok(());
            }
        };

        for item in &message_set.messages {
            match CargoMessage::deserialize(item) {
                Ok(CargoMessage::Parcel(parcel)) => {
                    if let Err(e) = parcel.validate(RecipientType::Private, own_certificates, now) {
                        info!(parcel_id = %parcel.parcel_id, error = %e, "ignoring invalid parcel");
                        continue;
                    }
                    match self
                        .parcel_store
                        .store_endpoint_bound(parcel.serialize(), &parcel)
                        .await?
                    {
                        Some(parcel_key) => {
                            debug!(parcel_key = %parcel_key, "stored endpoint-bound parcel");
                        }
                        None => {
                            debug!(parcel_id = %parcel.parcel_id, "duplicate parcel ignored");
                        }
                    }
                }
                Ok(CargoMessage::CollectionAck(ack)) => {
                    self.parcel_store.delete_internet_bound_from_ack(&ack).await?;
                    debug!(parcel_id = %ack.parcel_id, "applied collection ack");
                }
                Err(e) => {
                    info!(error = %e, "ignoring malformed cargo item");
                }
            }
        }
        Ok(())
    }

    async fn deliver<W: AsyncWrite + Unpin + Send>(
        &self,
        client: &mut dyn CourierClient,
        notifier: &mut StageNotifier<W>,
        public_address: &str,
        public_gateway_certificate: &Certificate,
        node: &NodeKey,
    ) -> Result<(), SyncFailure> {
        notifier
            .notify(CourierSyncStage::Delivery)
            .await
            .map_err(|e| SyncFailure::Failed(e.to_string()))?;

        // Collection acks first, then queued internet-bound parcels.
        let pending_acks = self.parcel_store.list_pending_collection_acks().await?;
        let mut items: Vec<(Vec<u8>, i64)> = pending_acks
            .iter()
            .map(|(ack, expiry)| (CargoMessage::CollectionAck(ack.clone()).serialize(), *expiry))
            .collect();

        for queued in self.parcel_store.list_internet_bound().await? {
            let serialized = match self
                .parcel_store
                .retrieve(&queued.parcel_key, ParcelDirection::TowardsInternet)
                .await?
            {
                Some(bytes) => bytes,
                None => {
                    debug!(parcel_key = %queued.parcel_key, "parcel deleted before delivery, skipping");
                    continue;
                }
            };
            match Parcel::deserialize(&serialized) {
                Ok(parcel) => {
                    items.push((CargoMessage::Parcel(parcel).serialize(), queued.expiry));
                }
                Err(e) => {
                    info!(parcel_key = %queued.parcel_key, error = %e, "skipping unparseable queued parcel");
                }
            }
        }

        let cargoes = generate_cargoes(
            items,
            public_gateway_certificate,
            &format!("https://{public_address}"),
            &node.key_pair,
            &node.certificate,
            now_unix(),
        )
        .map_err(|e| SyncFailure::Failed(e.to_string()))?;

        let (delivery_tx, delivery_rx) = mpsc::channel(16);
        let mut acks = client
            .deliver_cargo(delivery_rx)
            .await
            .map_err(|e| SyncFailure::Failed(e.to_string()))?;

        let cargo_count = cargoes.len();
        for cargo in cargoes {
            let delivery = CargoDelivery {
                cargo: cargo.serialize(),
                local_id: Uuid::new_v4().to_string(),
            };
            delivery_tx
                .send(delivery)
                .await
                .map_err(|_| SyncFailure::Failed("courier stopped accepting cargo".to_string()))?;
        }
        drop(delivery_tx);

        let mut acknowledged = 0usize;
        while let Some(local_id) = acks.recv().await {
            debug!(local_id = %local_id, "cargo delivery acknowledged");
            acknowledged += 1;
        }
        info!(
            cargoes = cargo_count,
            acknowledged, "delivery phase finished"
        );

        // The shipped acks are no longer pending.
        let shipped: Vec<_> = pending_acks.into_iter().map(|(ack, _)| ack).collect();
        self.parcel_store.delete_collection_acks(&shipped).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::notifier::parse_stage_event;
    use crate::messages::{CargoMessageSet, ParcelCollectionAck};
    use crate::security::keys::{generate_key_pair, KeyPair};
    use crate::testing::{FixedGatewayResolver, MemoryStore, MockCourier};

    struct Fixture {
        store: Arc<MemoryStore>,
        public_gateway: KeyPair,
        node: NodeKey,
    }

    async fn registered_fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());

        let public_gateway = generate_key_pair();
        let public_gateway_cert =
            Certificate::issue(public_gateway.public_key, &public_gateway, 0, i64::MAX);

        let node_key = generate_key_pair();
        let node_cert = Certificate::issue(node_key.public_key, &public_gateway, 0, i64::MAX);
        store.save_node_key(&node_key, &node_cert).await.unwrap();
        store
            .save_public_gateway_certificate(&public_gateway_cert)
            .await
            .unwrap();
        store
            .set(CONFIG_PUBLIC_GATEWAY_ADDRESS, "gw.example.com")
            .await
            .unwrap();

        let node = store.get_current_key().await.unwrap();
        Fixture {
            store,
            public_gateway,
            node,
        }
    }

    use crate::stores::{ConfigStore, KeyStore};

    fn driver(fixture: &Fixture, courier: &Arc<MockCourier>) -> CourierSyncDriver {
        CourierSyncDriver::new(
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            courier.clone(),
            Arc::new(FixedGatewayResolver::new([192, 168, 1, 1])),
        )
        .with_phase_wait(Duration::from_millis(0))
    }

    fn stages_in(buffer: &[u8]) -> Vec<String> {
        std::str::from_utf8(buffer)
            .unwrap()
            .lines()
            .filter_map(parse_stage_event)
            .collect()
    }

    /// Build an inbound cargo the way the public gateway would: signed
    /// with a cargo delivery authorization chaining to our CCA issuer and
    /// sealed to our node certificate.
    async fn inbound_cargo(fixture: &Fixture, messages: Vec<Vec<u8>>) -> Vec<u8> {
        let cca_issuer = fixture.store.get_or_create_cca_issuer().await.unwrap();
        let cda = Certificate::issue(
            fixture.public_gateway.public_key,
            &cca_issuer.key_pair,
            0,
            i64::MAX,
        );
        let cargo = Cargo::new(
            &fixture.public_gateway,
            cda,
            &fixture.node.certificate,
            fixture.node.certificate.private_address(),
            &CargoMessageSet { messages },
            now_unix() - 60,
            3600,
        )
        .unwrap();
        cargo.serialize()
    }

    fn endpoint_parcel_for(fixture: &Fixture, parcel_id: &str) -> Parcel {
        let endpoint = generate_key_pair();
        let endpoint_cert =
            Certificate::issue(endpoint.public_key, &fixture.node.key_pair, 0, i64::MAX);
        Parcel::new(
            &endpoint,
            endpoint_cert,
            vec![],
            "0123abcd",
            parcel_id,
            now_unix(),
            3600,
            b"payload".to_vec(),
        )
    }

    #[tokio::test]
    async fn test_unregistered_gateway_exits_1_before_any_stage() {
        // S7: nothing configured
        let store = Arc::new(MemoryStore::new());
        let courier = MockCourier::new(vec![]);
        let driver = CourierSyncDriver::new(
            store.clone(),
            store.clone(),
            store,
            courier.clone(),
            Arc::new(FixedGatewayResolver::new([192, 168, 1, 1])),
        );

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        let code = driver.run(&mut notifier).await;

        assert_eq!(code, EXIT_UNREGISTERED_GATEWAY);
        assert!(buffer.is_empty(), "no stage may be notified");
        assert!(courier.connected_urls().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_discovery_failure_exits_2() {
        let fixture = registered_fixture().await;
        let courier = MockCourier::new(vec![]);
        let driver = CourierSyncDriver::new(
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            courier,
            Arc::new(FixedGatewayResolver::failing()),
        );

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        assert_eq!(driver.run(&mut notifier).await, EXIT_FAILED_SYNC);
    }

    #[tokio::test]
    async fn test_stages_and_courier_url() {
        let fixture = registered_fixture().await;
        let courier = MockCourier::new(vec![]);
        let driver = driver(&fixture, &courier);

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        let code = driver.run(&mut notifier).await;

        assert_eq!(code, EXIT_OK);
        assert_eq!(stages_in(&buffer), vec!["COLLECTION", "WAIT", "DELIVERY"]);
        assert_eq!(
            courier.connected_urls(),
            vec!["https://192.168.1.1:21473".to_string()]
        );
        assert!(courier.closed());
    }

    #[tokio::test]
    async fn test_cca_is_fresh_and_openable_by_public_gateway() {
        let fixture = registered_fixture().await;
        let courier = MockCourier::new(vec![]);
        let driver = driver(&fixture, &courier);

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        assert_eq!(driver.run(&mut notifier).await, EXIT_OK);

        let cca_serialized = courier.received_cca().expect("CCA must be presented");
        let cca = CargoCollectionAuthorization::deserialize(&cca_serialized).unwrap();
        assert!(cca.verify_signature().is_ok());

        let now = now_unix();
        assert!(cca.creation_time <= now && now <= cca.expiry());
        assert_eq!(cca.recipient_address, "https://gw.example.com");

        // Only the public gateway can open the request; the CDA inside
        // names its key and our CCA issuer.
        let request = cca
            .unwrap_payload(&fixture.public_gateway.private_key)
            .unwrap();
        let cca_issuer = fixture.store.get_or_create_cca_issuer().await.unwrap();
        assert_eq!(
            request.cargo_delivery_authorization.subject_public_key,
            fixture.public_gateway.public_key
        );
        assert_eq!(
            request.cargo_delivery_authorization.issuer_public_key,
            cca_issuer.key_pair.public_key
        );
    }

    #[tokio::test]
    async fn test_collect_stores_parcels_and_applies_acks() {
        let fixture = registered_fixture().await;

        // A queued internet-bound parcel that an inbound ack will clear
        let endpoint = generate_key_pair();
        let endpoint_cert =
            Certificate::issue(endpoint.public_key, &fixture.node.key_pair, 0, i64::MAX);
        let outbound = Parcel::new(
            &endpoint,
            endpoint_cert,
            vec![],
            "https://ping.example.com",
            "out-1",
            now_unix(),
            3600,
            b"outbound".to_vec(),
        );
        fixture
            .store
            .store_internet_bound(outbound.serialize(), &outbound)
            .await
            .unwrap();

        let inbound_parcel = endpoint_parcel_for(&fixture, "in-1");
        let ack = ParcelCollectionAck {
            sender_endpoint_private_address: outbound.sender_certificate.private_address(),
            recipient_endpoint_address: outbound.recipient_address.clone(),
            parcel_id: outbound.parcel_id.clone(),
        };
        let cargo = inbound_cargo(
            &fixture,
            vec![
                CargoMessage::Parcel(inbound_parcel.clone()).serialize(),
                CargoMessage::CollectionAck(ack).serialize(),
            ],
        )
        .await;

        let courier = MockCourier::new(vec![cargo]);
        let driver = driver(&fixture, &courier);

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        assert_eq!(driver.run(&mut notifier).await, EXIT_OK);

        // The parcel landed endpoint-bound
        assert_eq!(
            fixture
                .store
                .parcel_count(ParcelDirection::FromInternetToEndpoint),
            1
        );
        // The acked internet-bound parcel is gone
        assert_eq!(fixture.store.parcel_count(ParcelDirection::TowardsInternet), 0);
    }

    #[tokio::test]
    async fn test_collect_skips_garbage_and_unauthorized_cargoes() {
        let fixture = registered_fixture().await;

        // Cargo signed by a key that does not chain to any self-issued
        // certificate of ours
        let stranger = generate_key_pair();
        let stranger_cert = Certificate::issue(stranger.public_key, &stranger, 0, i64::MAX);
        let unauthorized = Cargo::new(
            &stranger,
            stranger_cert,
            &fixture.node.certificate,
            "addr",
            &CargoMessageSet {
                messages: vec![
                    CargoMessage::Parcel(endpoint_parcel_for(&fixture, "evil")).serialize(),
                ],
            },
            now_unix() - 60,
            3600,
        )
        .unwrap();

        let valid = inbound_cargo(
            &fixture,
            vec![CargoMessage::Parcel(endpoint_parcel_for(&fixture, "good")).serialize()],
        )
        .await;

        let courier = MockCourier::new(vec![
            b"complete garbage".to_vec(),
            unauthorized.serialize(),
            valid,
        ]);
        let driver = driver(&fixture, &courier);

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        assert_eq!(driver.run(&mut notifier).await, EXIT_OK);

        // Only the authorized cargo's parcel got stored
        assert_eq!(
            fixture
                .store
                .parcel_count(ParcelDirection::FromInternetToEndpoint),
            1
        );
    }

    #[tokio::test]
    async fn test_identity_certificate_is_not_a_cargo_trust_anchor() {
        // The node's identity certificate is gateway-issued, not
        // self-issued, so a cargo chaining to it must be rejected.
        let fixture = registered_fixture().await;

        let cda = Certificate::issue(
            fixture.public_gateway.public_key,
            &fixture.node.key_pair,
            0,
            i64::MAX,
        );
        let cargo = Cargo::new(
            &fixture.public_gateway,
            cda,
            &fixture.node.certificate,
            "addr",
            &CargoMessageSet {
                messages: vec![
                    CargoMessage::Parcel(endpoint_parcel_for(&fixture, "sneaky")).serialize(),
                ],
            },
            now_unix() - 60,
            3600,
        )
        .unwrap();

        let courier = MockCourier::new(vec![cargo.serialize()]);
        let driver = driver(&fixture, &courier);

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        assert_eq!(driver.run(&mut notifier).await, EXIT_OK);

        assert_eq!(
            fixture
                .store
                .parcel_count(ParcelDirection::FromInternetToEndpoint),
            0
        );
    }

    #[tokio::test]
    async fn test_deliver_ships_acks_then_parcels_and_clears_rows() {
        let fixture = registered_fixture().await;

        // One pending collection ack (via a collected endpoint parcel)
        let collected = endpoint_parcel_for(&fixture, "collected-1");
        fixture
            .store
            .store_endpoint_bound(collected.serialize(), &collected)
            .await
            .unwrap()
            .unwrap();

        // One queued internet-bound parcel
        let endpoint = generate_key_pair();
        let endpoint_cert =
            Certificate::issue(endpoint.public_key, &fixture.node.key_pair, 0, i64::MAX);
        let outbound = Parcel::new(
            &endpoint,
            endpoint_cert,
            vec![],
            "https://pong.example.com",
            "out-9",
            now_unix(),
            3600,
            b"outbound".to_vec(),
        );
        fixture
            .store
            .store_internet_bound(outbound.serialize(), &outbound)
            .await
            .unwrap();

        let courier = MockCourier::new(vec![]);
        let driver = driver(&fixture, &courier);

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        assert_eq!(driver.run(&mut notifier).await, EXIT_OK);

        let delivered = courier.delivered();
        assert_eq!(delivered.len(), 1);

        // The public gateway can open the cargo; ack comes before parcel
        let cargo = Cargo::deserialize(&delivered[0].cargo).unwrap();
        assert_eq!(cargo.recipient_address, "https://gw.example.com");
        let message_set = cargo
            .unwrap_payload(&fixture.public_gateway.private_key)
            .unwrap();
        assert_eq!(message_set.messages.len(), 2);
        assert!(matches!(
            CargoMessage::deserialize(&message_set.messages[0]).unwrap(),
            CargoMessage::CollectionAck(ack) if ack.parcel_id == "collected-1"
        ));
        assert!(matches!(
            CargoMessage::deserialize(&message_set.messages[1]).unwrap(),
            CargoMessage::Parcel(parcel) if parcel.parcel_id == "out-9"
        ));

        // Shipped collection rows were cleared
        assert!(fixture
            .store
            .list_pending_collection_acks()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_deliver_nothing_queued_sends_no_cargo() {
        let fixture = registered_fixture().await;
        let courier = MockCourier::new(vec![]);
        let driver = driver(&fixture, &courier);

        let mut buffer = Vec::new();
        let mut notifier = StageNotifier::new(&mut buffer);
        assert_eq!(driver.run(&mut notifier).await, EXIT_OK);
        assert!(courier.delivered().is_empty());
    }
}

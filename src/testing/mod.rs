//! Test utilities
//!
//! In-process doubles for the consumed interfaces, an in-memory frame
//! transport for driving collection sessions, and handshake helpers. Used
//! by the crate's own tests; exported so embedders can test against the
//! same doubles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::constants::{CLOCK_DRIFT_TOLERANCE_MINUTES, OUTBOUND_CARGO_TTL_DAYS};
use crate::messages::handshake::{HandshakeChallenge, HandshakeResponse, NonceSignature};
use crate::messages::{now_unix, Parcel, ParcelCollectionAck};
use crate::security::certificate::Certificate;
use crate::security::keys::{generate_key_pair, KeyPair};
use crate::server::{Frame, FrameTransport, SessionError};
use crate::stores::{
    ConfigStore, InternetBoundParcel, KeyStore, NodeKey, ParcelDirection, ParcelStore, StoreError,
};

// ===== In-memory store =====

struct StoredParcel {
    parcel_key: String,
    direction: i64,
    sender_private_address: String,
    recipient_address: String,
    parcel_id: String,
    expiry: i64,
    data: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    parcels: Vec<StoredParcel>,
    collections: Vec<(ParcelCollectionAck, i64)>,
    keys: Vec<(KeyPair, Certificate)>,
    extra_certificates: Vec<Certificate>,
    current_key_serial: Option<u64>,
    cca_issuer_serial: Option<u64>,
    public_gateway_certificate: Option<Certificate>,
    config: HashMap<String, String>,
}

/// In-memory implementation of the parcel, key and config stores.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<StdMutex<Inner>>,
    endpoint_bound_notify: Arc<Notify>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Add a bare trust-anchor certificate (no private key held).
    pub fn add_certificate(&self, certificate: Certificate) {
        self.inner
            .lock()
            .unwrap()
            .extra_certificates
            .push(certificate);
    }

    /// Seed an endpoint-bound parcel directly, bypassing validation.
    /// Returns its store key.
    pub fn seed_endpoint_bound_parcel(
        &self,
        recipient_address: &str,
        parcel_id: &str,
        data: Vec<u8>,
    ) -> String {
        let parcel_key = Uuid::new_v4().to_string();
        self.inner.lock().unwrap().parcels.push(StoredParcel {
            parcel_key: parcel_key.clone(),
            direction: ParcelDirection::FromInternetToEndpoint.as_i64(),
            sender_private_address: "seeded-sender".to_string(),
            recipient_address: recipient_address.to_string(),
            parcel_id: parcel_id.to_string(),
            expiry: now_unix() + 3600,
            data,
        });
        self.endpoint_bound_notify.notify_waiters();
        parcel_key
    }

    /// Number of stored parcels in the given direction.
    pub fn parcel_count(&self, direction: ParcelDirection) -> usize {
        self.inner
            .lock()
            .unwrap()
            .parcels
            .iter()
            .filter(|p| p.direction == direction.as_i64())
            .count()
    }
}

#[async_trait]
impl ParcelStore for MemoryStore {
    async fn stream_active_bound_for_endpoints(
        &self,
        addresses: Vec<String>,
        keep_alive: bool,
    ) -> Result<mpsc::Receiver<String>, StoreError> {
        let (tx, rx) = mpsc::channel(16);
        let inner = self.inner.clone();
        let notify = self.endpoint_bound_notify.clone();

        tokio::spawn(async move {
            let mut yielded: Vec<String> = Vec::new();
            loop {
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let keys: Vec<String> = {
                    let inner = inner.lock().unwrap();
                    let now = now_unix();
                    inner
                        .parcels
                        .iter()
                        .filter(|p| {
                            p.direction == ParcelDirection::FromInternetToEndpoint.as_i64()
                                && p.expiry >= now
                                && addresses.contains(&p.recipient_address)
                        })
                        .map(|p| p.parcel_key.clone())
                        .collect()
                };

                for key in keys {
                    if yielded.contains(&key) {
                        continue;
                    }
                    if tx.send(key.clone()).await.is_err() {
                        return;
                    }
                    yielded.push(key);
                }

                if !keep_alive {
                    return;
                }
                notified.await;
            }
        });

        Ok(rx)
    }

    async fn retrieve(
        &self,
        parcel_key: &str,
        direction: ParcelDirection,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .parcels
            .iter()
            .find(|p| p.parcel_key == parcel_key && p.direction == direction.as_i64())
            .map(|p| p.data.clone()))
    }

    async fn delete(
        &self,
        parcel_key: &str,
        direction: ParcelDirection,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .parcels
            .retain(|p| !(p.parcel_key == parcel_key && p.direction == direction.as_i64()));
        Ok(())
    }

    async fn store_endpoint_bound(
        &self,
        parcel_serialized: Vec<u8>,
        parcel: &Parcel,
    ) -> Result<Option<String>, StoreError> {
        let sender = parcel.sender_certificate.private_address();
        let parcel_key = Uuid::new_v4().to_string();
        {
            let mut inner = self.inner.lock().unwrap();
            let already_collected = inner.collections.iter().any(|(ack, _)| {
                ack.sender_endpoint_private_address == sender
                    && ack.recipient_endpoint_address == parcel.recipient_address
                    && ack.parcel_id == parcel.parcel_id
            });
            if already_collected {
                return Ok(None);
            }
            inner.parcels.push(StoredParcel {
                parcel_key: parcel_key.clone(),
                direction: ParcelDirection::FromInternetToEndpoint.as_i64(),
                sender_private_address: sender.clone(),
                recipient_address: parcel.recipient_address.clone(),
                parcel_id: parcel.parcel_id.clone(),
                expiry: parcel.expiry(),
                data: parcel_serialized,
            });
            inner.collections.push((
                ParcelCollectionAck {
                    sender_endpoint_private_address: sender,
                    recipient_endpoint_address: parcel.recipient_address.clone(),
                    parcel_id: parcel.parcel_id.clone(),
                },
                parcel.expiry(),
            ));
        }
        self.endpoint_bound_notify.notify_waiters();
        Ok(Some(parcel_key))
    }

    async fn store_internet_bound(
        &self,
        parcel_serialized: Vec<u8>,
        parcel: &Parcel,
    ) -> Result<String, StoreError> {
        let parcel_key = Uuid::new_v4().to_string();
        self.inner.lock().unwrap().parcels.push(StoredParcel {
            parcel_key: parcel_key.clone(),
            direction: ParcelDirection::TowardsInternet.as_i64(),
            sender_private_address: parcel.sender_certificate.private_address(),
            recipient_address: parcel.recipient_address.clone(),
            parcel_id: parcel.parcel_id.clone(),
            expiry: parcel.expiry(),
            data: parcel_serialized,
        });
        Ok(parcel_key)
    }

    async fn list_internet_bound(&self) -> Result<Vec<InternetBoundParcel>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let now = now_unix();
        Ok(inner
            .parcels
            .iter()
            .filter(|p| p.direction == ParcelDirection::TowardsInternet.as_i64() && p.expiry >= now)
            .map(|p| InternetBoundParcel {
                parcel_key: p.parcel_key.clone(),
                expiry: p.expiry,
            })
            .collect())
    }

    async fn list_pending_collection_acks(
        &self,
    ) -> Result<Vec<(ParcelCollectionAck, i64)>, StoreError> {
        Ok(self.inner.lock().unwrap().collections.clone())
    }

    async fn delete_internet_bound_from_ack(
        &self,
        ack: &ParcelCollectionAck,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.parcels.retain(|p| {
            !(p.direction == ParcelDirection::TowardsInternet.as_i64()
                && p.sender_private_address == ack.sender_endpoint_private_address
                && p.recipient_address == ack.recipient_endpoint_address
                && p.parcel_id == ack.parcel_id)
        });
        Ok(())
    }

    async fn delete_collection_acks(
        &self,
        acks: &[ParcelCollectionAck],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.collections.retain(|(existing, _)| !acks.contains(existing));
        Ok(())
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get_current_key(&self) -> Result<NodeKey, StoreError> {
        let inner = self.inner.lock().unwrap();
        let serial = inner
            .current_key_serial
            .ok_or_else(|| StoreError::KeyNotFound("no current node key".to_string()))?;
        inner
            .keys
            .iter()
            .find(|(_, cert)| cert.serial_number == serial)
            .map(|(key_pair, certificate)| NodeKey {
                key_pair: key_pair.clone(),
                certificate: certificate.clone(),
            })
            .ok_or_else(|| StoreError::KeyNotFound(serial.to_string()))
    }

    async fn fetch_node_certificates(&self) -> Result<Vec<Certificate>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut certificates: Vec<Certificate> =
            inner.keys.iter().map(|(_, cert)| cert.clone()).collect();
        certificates.extend(inner.extra_certificates.iter().cloned());
        Ok(certificates)
    }

    async fn get_or_create_cca_issuer(&self) -> Result<NodeKey, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(serial) = inner.cca_issuer_serial {
            if let Some((key_pair, certificate)) = inner
                .keys
                .iter()
                .find(|(_, cert)| cert.serial_number == serial)
            {
                return Ok(NodeKey {
                    key_pair: key_pair.clone(),
                    certificate: certificate.clone(),
                });
            }
        }

        let now = now_unix();
        let drift = CLOCK_DRIFT_TOLERANCE_MINUTES * 60;
        let ttl = OUTBOUND_CARGO_TTL_DAYS * 24 * 3600;
        let key_pair = generate_key_pair();
        let certificate =
            Certificate::issue(key_pair.public_key, &key_pair, now - drift, now + ttl + drift);
        inner.cca_issuer_serial = Some(certificate.serial_number);
        inner.keys.push((key_pair.clone(), certificate.clone()));
        Ok(NodeKey {
            key_pair,
            certificate,
        })
    }

    async fn save_node_key(
        &self,
        key: &KeyPair,
        certificate: &Certificate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.current_key_serial = Some(certificate.serial_number);
        inner.keys.push((key.clone(), certificate.clone()));
        Ok(())
    }

    async fn save_public_gateway_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<(), StoreError> {
        self.inner.lock().unwrap().public_gateway_certificate = Some(certificate.clone());
        Ok(())
    }

    async fn get_public_gateway_certificate(&self) -> Result<Option<Certificate>, StoreError> {
        Ok(self.inner.lock().unwrap().public_gateway_certificate.clone())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().unwrap().config.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ===== In-memory frame transport =====

/// What the server side pushed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A data frame
    Frame(Frame),
    /// A close with code and reason
    Close(u16, String),
}

/// Server end of an in-memory duplex channel.
pub struct ChannelTransport {
    tx: mpsc::Sender<ClientEvent>,
    rx: mpsc::Receiver<Frame>,
}

/// Client end of an in-memory duplex channel.
pub struct ClientTransport {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<ClientEvent>,
}

impl ChannelTransport {
    /// Create a connected (server, client) pair.
    pub fn pair() -> (ChannelTransport, ClientTransport) {
        let (server_tx, client_rx) = mpsc::channel(32);
        let (client_tx, server_rx) = mpsc::channel(32);
        (
            ChannelTransport {
                tx: server_tx,
                rx: server_rx,
            },
            ClientTransport {
                tx: client_tx,
                rx: client_rx,
            },
        )
    }
}

#[async_trait]
impl FrameTransport for ChannelTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.tx
            .send(ClientEvent::Frame(frame))
            .await
            .map_err(|_| SessionError::Transport("client disconnected".to_string()))
    }

    async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let _ = self
            .tx
            .send(ClientEvent::Close(code, reason.to_string()))
            .await;
    }
}

impl ClientTransport {
    /// Send a frame to the server.
    pub async fn send_frame(&mut self, frame: Frame) {
        let _ = self.tx.send(frame).await;
    }

    /// Receive the next data frame. Panics on a close event.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        match self.rx.recv().await {
            Some(ClientEvent::Frame(frame)) => Some(frame),
            Some(ClientEvent::Close(code, reason)) => {
                panic!("unexpected close {code}: {reason}")
            }
            None => None,
        }
    }

    /// Wait for a close event with the given code; returns the reason.
    /// Data frames received in the meantime are discarded.
    pub async fn expect_close(&mut self, code: u16) -> String {
        loop {
            match self.rx.recv().await {
                Some(ClientEvent::Frame(_)) => continue,
                Some(ClientEvent::Close(actual, reason)) => {
                    assert_eq!(actual, code, "unexpected close code: {reason}");
                    return reason;
                }
                None => panic!("transport ended without a close event"),
            }
        }
    }
}

// ===== Courier doubles =====

use crate::courier::cogrpc::{
    CargoDelivery, CourierClient, CourierClientError, CourierClientFactory,
};
use crate::courier::{DefaultGatewayResolver, GatewayDiscoveryError};
use std::net::Ipv4Addr;

#[derive(Default)]
struct MockCourierState {
    connected_urls: Vec<String>,
    received_cca: Option<Vec<u8>>,
    delivered: Vec<CargoDelivery>,
    closed: bool,
}

/// In-memory courier: hands out canned cargoes and records everything it
/// receives. Acknowledges every delivered cargo by echoing its local id.
pub struct MockCourier {
    collect_cargoes: Vec<Vec<u8>>,
    state: Arc<StdMutex<MockCourierState>>,
}

impl MockCourier {
    /// A courier holding `collect_cargoes` for us.
    pub fn new(collect_cargoes: Vec<Vec<u8>>) -> Arc<MockCourier> {
        Arc::new(MockCourier {
            collect_cargoes,
            state: Arc::new(StdMutex::new(MockCourierState::default())),
        })
    }

    /// URLs clients connected to.
    pub fn connected_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().connected_urls.clone()
    }

    /// The CCA presented during collection, if any.
    pub fn received_cca(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().received_cca.clone()
    }

    /// Cargo deliveries received so far.
    pub fn delivered(&self) -> Vec<CargoDelivery> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Whether the client was closed.
    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl CourierClientFactory for MockCourier {
    async fn connect(
        &self,
        courier_url: &str,
    ) -> Result<Box<dyn CourierClient>, CourierClientError> {
        self.state
            .lock()
            .unwrap()
            .connected_urls
            .push(courier_url.to_string());
        Ok(Box::new(MockCourierClient {
            collect_cargoes: self.collect_cargoes.clone(),
            state: self.state.clone(),
        }))
    }
}

struct MockCourierClient {
    collect_cargoes: Vec<Vec<u8>>,
    state: Arc<StdMutex<MockCourierState>>,
}

#[async_trait]
impl CourierClient for MockCourierClient {
    async fn collect_cargo(
        &mut self,
        cca_serialized: Vec<u8>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, CourierClientError> {
        self.state.lock().unwrap().received_cca = Some(cca_serialized);
        let cargoes = self.collect_cargoes.clone();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for cargo in cargoes {
                if tx.send(cargo).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn deliver_cargo(
        &mut self,
        mut deliveries: mpsc::Receiver<CargoDelivery>,
    ) -> Result<mpsc::Receiver<String>, CourierClientError> {
        let state = self.state.clone();
        let (ack_tx, ack_rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                let local_id = delivery.local_id.clone();
                state.lock().unwrap().delivered.push(delivery);
                if ack_tx.send(local_id).await.is_err() {
                    return;
                }
            }
        });
        Ok(ack_rx)
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Resolver returning a fixed gateway address (or always failing).
pub struct FixedGatewayResolver {
    gateway: Option<Ipv4Addr>,
}

impl FixedGatewayResolver {
    /// Always resolves to `octets`.
    pub fn new(octets: [u8; 4]) -> FixedGatewayResolver {
        FixedGatewayResolver {
            gateway: Some(Ipv4Addr::from(octets)),
        }
    }

    /// Always fails, as on a machine with no default route.
    pub fn failing() -> FixedGatewayResolver {
        FixedGatewayResolver { gateway: None }
    }
}

#[async_trait]
impl DefaultGatewayResolver for FixedGatewayResolver {
    async fn resolve(&self) -> Result<Ipv4Addr, GatewayDiscoveryError> {
        self.gateway
            .ok_or_else(|| GatewayDiscoveryError("no default route".to_string()))
    }
}

/// Run the client side of the collection handshake: receive the challenge,
/// answer with one signature by `endpoint`.
pub async fn authenticate_endpoint(
    client: &mut ClientTransport,
    endpoint: &KeyPair,
    endpoint_certificate: &Certificate,
) {
    let challenge = match client.recv_frame().await.expect("expected challenge") {
        Frame::Binary(bytes) => HandshakeChallenge::deserialize(&bytes).unwrap(),
        other => panic!("expected binary challenge, got {:?}", other),
    };
    let signature =
        NonceSignature::sign(&challenge.nonce, endpoint, endpoint_certificate.clone());
    let response = HandshakeResponse {
        nonce_signatures: vec![signature.serialize()],
    };
    client.send_frame(Frame::Binary(response.serialize())).await;
}

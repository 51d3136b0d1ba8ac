//! SQLite-backed store
//!
//! One connection behind an async mutex serves the parcel, key and config
//! interfaces. Parcel deletes are single statements, so concurrent deletes
//! of the same key are naturally idempotent. Keep-alive parcel streams are
//! fed by a spawned task woken through a `Notify` whenever an
//! endpoint-bound parcel lands.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::constants::{
    CLOCK_DRIFT_TOLERANCE_MINUTES, CONFIG_CCA_ISSUER_KEY_SERIAL, CONFIG_NODE_KEY_SERIAL,
    OUTBOUND_CARGO_TTL_DAYS,
};
use crate::messages::{now_unix, Parcel, ParcelCollectionAck};
use crate::security::certificate::Certificate;
use crate::security::keys::{generate_key_pair, key_pair_from_bytes, KeyPair};

use super::{
    ConfigStore, InternetBoundParcel, KeyStore, NodeKey, ParcelDirection, ParcelStore, StoreError,
};

/// SQLite-backed implementation of all three store interfaces.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    endpoint_bound_notify: Arc<Notify>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<SqliteStore, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (tests and ephemeral runs).
    pub fn in_memory() -> Result<SqliteStore, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<SqliteStore, StoreError> {
        super::schema::create_all_tables(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            endpoint_bound_notify: Arc::new(Notify::new()),
        })
    }

    fn config_get(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        let value = conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn config_set(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn load_key(conn: &Connection, serial: &str) -> Result<Option<NodeKey>, StoreError> {
        let row: Option<(Vec<u8>, Vec<u8>)> = conn
            .query_row(
                "SELECT private_key, certificate FROM node_keys WHERE serial_number = ?1",
                [serial],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (private_key, certificate) = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let private_key: [u8; 32] = private_key
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupted(format!("private key for serial {serial}")))?;
        let certificate: Certificate = postcard::from_bytes(&certificate)
            .map_err(|e| StoreError::Corrupted(format!("certificate for serial {serial}: {e}")))?;

        Ok(Some(NodeKey {
            key_pair: key_pair_from_bytes(&private_key),
            certificate,
        }))
    }

    fn save_key(conn: &Connection, key: &KeyPair, certificate: &Certificate) -> Result<(), StoreError> {
        let cert_bytes = postcard::to_allocvec(certificate)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO node_keys (serial_number, private_key, certificate)
             VALUES (?1, ?2, ?3)",
            params![
                certificate.serial_number.to_string(),
                key.private_key.as_slice(),
                cert_bytes
            ],
        )?;
        Ok(())
    }

    fn query_active_endpoint_bound(
        conn: &Connection,
        addresses: &[String],
        now: i64,
    ) -> Result<Vec<String>, StoreError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = addresses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT parcel_key FROM parcels
             WHERE direction = 0 AND expiry >= ? AND recipient_address IN ({placeholders})
             ORDER BY stored_at, parcel_key"
        );

        let mut values: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Integer(now)];
        values.extend(
            addresses
                .iter()
                .map(|a| rusqlite::types::Value::Text(a.clone())),
        );

        let mut stmt = conn.prepare(&sql)?;
        let keys = stmt
            .query_map(rusqlite::params_from_iter(values), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[async_trait]
impl ParcelStore for SqliteStore {
    async fn stream_active_bound_for_endpoints(
        &self,
        addresses: Vec<String>,
        keep_alive: bool,
    ) -> Result<mpsc::Receiver<String>, StoreError> {
        let (tx, rx) = mpsc::channel(16);
        let conn = self.conn.clone();
        let notify = self.endpoint_bound_notify.clone();

        tokio::spawn(async move {
            let mut yielded: HashSet<String> = HashSet::new();
            loop {
                // Register for wakeups before querying so arrivals between
                // the query and the await are not lost.
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let keys = {
                    let conn = conn.lock().await;
                    match Self::query_active_endpoint_bound(&conn, &addresses, now_unix()) {
                        Ok(keys) => keys,
                        Err(e) => {
                            debug!(error = %e, "parcel stream query failed");
                            return;
                        }
                    }
                };

                for key in keys {
                    if yielded.contains(&key) {
                        continue;
                    }
                    if tx.send(key.clone()).await.is_err() {
                        // Receiver dropped: subscription cancelled
                        return;
                    }
                    yielded.insert(key);
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
        let conn = self.conn.lock().await;
        let data = conn
            .query_row(
                "SELECT data FROM parcels WHERE parcel_key = ?1 AND direction = ?2",
                params![parcel_key, direction.as_i64()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    async fn delete(
        &self,
        parcel_key: &str,
        direction: ParcelDirection,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM parcels WHERE parcel_key = ?1 AND direction = ?2",
            params![parcel_key, direction.as_i64()],
        )?;
        trace!(parcel_key = %parcel_key, deleted, "parcel delete");
        Ok(())
    }

    async fn store_endpoint_bound(
        &self,
        parcel_serialized: Vec<u8>,
        parcel: &Parcel,
    ) -> Result<Option<String>, StoreError> {
        let sender = parcel.sender_certificate.private_address();
        let conn = self.conn.lock().await;

        let already_collected: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM parcel_collections
             WHERE sender_private_address = ?1 AND recipient_address = ?2 AND parcel_id = ?3",
            params![sender, parcel.recipient_address, parcel.parcel_id],
            |row| row.get(0),
        )?;
        if already_collected {
            debug!(parcel_id = %parcel.parcel_id, "parcel already collected, ignoring");
            return Ok(None);
        }

        let parcel_key = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO parcels
             (parcel_key, direction, sender_private_address, recipient_address, parcel_id, expiry, data)
             VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6)",
            params![
                parcel_key,
                sender,
                parcel.recipient_address,
                parcel.parcel_id,
                parcel.expiry(),
                parcel_serialized
            ],
        )?;
        conn.execute(
            "INSERT INTO parcel_collections
             (sender_private_address, recipient_address, parcel_id, parcel_expiry)
             VALUES (?1, ?2, ?3, ?4)",
            params![sender, parcel.recipient_address, parcel.parcel_id, parcel.expiry()],
        )?;
        drop(conn);

        self.endpoint_bound_notify.notify_waiters();
        Ok(Some(parcel_key))
    }

    async fn store_internet_bound(
        &self,
        parcel_serialized: Vec<u8>,
        parcel: &Parcel,
    ) -> Result<String, StoreError> {
        let sender = parcel.sender_certificate.private_address();
        let parcel_key = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO parcels
             (parcel_key, direction, sender_private_address, recipient_address, parcel_id, expiry, data)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6)",
            params![
                parcel_key,
                sender,
                parcel.recipient_address,
                parcel.parcel_id,
                parcel.expiry(),
                parcel_serialized
            ],
        )?;
        Ok(parcel_key)
    }

    async fn list_internet_bound(&self) -> Result<Vec<InternetBoundParcel>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT parcel_key, expiry FROM parcels
             WHERE direction = 1 AND expiry >= ?1
             ORDER BY stored_at, parcel_key",
        )?;
        let parcels = stmt
            .query_map([now_unix()], |row| {
                Ok(InternetBoundParcel {
                    parcel_key: row.get(0)?,
                    expiry: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parcels)
    }

    async fn list_pending_collection_acks(
        &self,
    ) -> Result<Vec<(ParcelCollectionAck, i64)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT sender_private_address, recipient_address, parcel_id, parcel_expiry
             FROM parcel_collections ORDER BY collected_at",
        )?;
        let acks = stmt
            .query_map([], |row| {
                Ok((
                    ParcelCollectionAck {
                        sender_endpoint_private_address: row.get(0)?,
                        recipient_endpoint_address: row.get(1)?,
                        parcel_id: row.get(2)?,
                    },
                    row.get(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(acks)
    }

    async fn delete_internet_bound_from_ack(
        &self,
        ack: &ParcelCollectionAck,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM parcels
             WHERE direction = 1 AND sender_private_address = ?1
               AND recipient_address = ?2 AND parcel_id = ?3",
            params![
                ack.sender_endpoint_private_address,
                ack.recipient_endpoint_address,
                ack.parcel_id
            ],
        )?;
        trace!(parcel_id = %ack.parcel_id, deleted, "ack-driven parcel delete");
        Ok(())
    }

    async fn delete_collection_acks(
        &self,
        acks: &[ParcelCollectionAck],
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        for ack in acks {
            conn.execute(
                "DELETE FROM parcel_collections
                 WHERE sender_private_address = ?1 AND recipient_address = ?2 AND parcel_id = ?3",
                params![
                    ack.sender_endpoint_private_address,
                    ack.recipient_endpoint_address,
                    ack.parcel_id
                ],
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn get_current_key(&self) -> Result<NodeKey, StoreError> {
        let conn = self.conn.lock().await;
        let serial = Self::config_get(&conn, CONFIG_NODE_KEY_SERIAL)?
            .ok_or_else(|| StoreError::KeyNotFound("no current node key".to_string()))?;
        Self::load_key(&conn, &serial)?.ok_or(StoreError::KeyNotFound(serial))
    }

    async fn fetch_node_certificates(&self) -> Result<Vec<Certificate>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT certificate FROM node_keys ORDER BY created_at")?;
        let blobs = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        blobs
            .iter()
            .map(|blob| {
                postcard::from_bytes(blob).map_err(|e| StoreError::Corrupted(e.to_string()))
            })
            .collect()
    }

    async fn get_or_create_cca_issuer(&self) -> Result<NodeKey, StoreError> {
        let now = now_unix();
        let drift = CLOCK_DRIFT_TOLERANCE_MINUTES * 60;
        let ttl = OUTBOUND_CARGO_TTL_DAYS * 24 * 3600;

        let conn = self.conn.lock().await;

        if let Some(serial) = Self::config_get(&conn, CONFIG_CCA_ISSUER_KEY_SERIAL)? {
            if let Some(issuer) = Self::load_key(&conn, &serial)? {
                // Reissue when the certificate will not outlive a cargo
                if issuer.certificate.not_after >= now + ttl {
                    return Ok(issuer);
                }
                let certificate =
                    Certificate::issue(issuer.key_pair.public_key, &issuer.key_pair, now - drift, now + ttl + drift);
                Self::save_key(&conn, &issuer.key_pair, &certificate)?;
                Self::config_set(
                    &conn,
                    CONFIG_CCA_ISSUER_KEY_SERIAL,
                    &certificate.serial_number.to_string(),
                )?;
                return Ok(NodeKey {
                    key_pair: issuer.key_pair,
                    certificate,
                });
            }
        }

        let key_pair = generate_key_pair();
        let certificate =
            Certificate::issue(key_pair.public_key, &key_pair, now - drift, now + ttl + drift);
        Self::save_key(&conn, &key_pair, &certificate)?;
        Self::config_set(
            &conn,
            CONFIG_CCA_ISSUER_KEY_SERIAL,
            &certificate.serial_number.to_string(),
        )?;
        debug!(serial = certificate.serial_number, "created CCA issuer key");

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
        let conn = self.conn.lock().await;
        Self::save_key(&conn, key, certificate)?;
        Self::config_set(
            &conn,
            CONFIG_NODE_KEY_SERIAL,
            &certificate.serial_number.to_string(),
        )?;
        Ok(())
    }

    async fn save_public_gateway_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<(), StoreError> {
        let bytes = postcard::to_allocvec(certificate)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        let conn = self.conn.lock().await;
        Self::config_set(&conn, "public_gateway_certificate", &hex::encode(bytes))
    }

    async fn get_public_gateway_certificate(&self) -> Result<Option<Certificate>, StoreError> {
        let conn = self.conn.lock().await;
        let encoded = match Self::config_get(&conn, "public_gateway_certificate")? {
            Some(encoded) => encoded,
            None => return Ok(None),
        };
        let bytes = hex::decode(&encoded)
            .map_err(|e| StoreError::Corrupted(format!("public gateway certificate: {e}")))?;
        let certificate = postcard::from_bytes(&bytes)
            .map_err(|e| StoreError::Corrupted(format!("public gateway certificate: {e}")))?;
        Ok(Some(certificate))
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        Self::config_get(&conn, key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        Self::config_set(&conn, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Parcel;
    use crate::security::keys::generate_key_pair;
    use tokio::time::{timeout, Duration};

    fn endpoint_parcel(recipient: &str, parcel_id: &str) -> (Parcel, Vec<u8>) {
        let gateway = generate_key_pair();
        let endpoint = generate_key_pair();
        let cert = Certificate::issue(endpoint.public_key, &gateway, 0, i64::MAX);
        let parcel = Parcel::new(
            &endpoint,
            cert,
            vec![],
            recipient,
            parcel_id,
            now_unix(),
            3600,
            b"payload".to_vec(),
        );
        let serialized = parcel.serialize();
        (parcel, serialized)
    }

    #[tokio::test]
    async fn test_config_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();

        assert_eq!(store.get("public_gateway_address").await.unwrap(), None);
        store.set("public_gateway_address", "gw.example.com").await.unwrap();
        assert_eq!(
            store.get("public_gateway_address").await.unwrap(),
            Some("gw.example.com".to_string())
        );

        // Overwrite
        store.set("public_gateway_address", "other.example.com").await.unwrap();
        assert_eq!(
            store.get("public_gateway_address").await.unwrap(),
            Some("other.example.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_retrieve_delete_endpoint_bound() {
        let store = SqliteStore::in_memory().unwrap();
        let (parcel, serialized) = endpoint_parcel("recipient-a", "p1");

        let key = store
            .store_endpoint_bound(serialized.clone(), &parcel)
            .await
            .unwrap()
            .expect("first store should mint a key");

        let fetched = store
            .retrieve(&key, ParcelDirection::FromInternetToEndpoint)
            .await
            .unwrap();
        assert_eq!(fetched, Some(serialized));

        store
            .delete(&key, ParcelDirection::FromInternetToEndpoint)
            .await
            .unwrap();
        assert_eq!(
            store
                .retrieve(&key, ParcelDirection::FromInternetToEndpoint)
                .await
                .unwrap(),
            None
        );

        // Deleting again is a no-op
        store
            .delete(&key, ParcelDirection::FromInternetToEndpoint)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_endpoint_bound_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        let (parcel, serialized) = endpoint_parcel("recipient-a", "p1");

        let first = store
            .store_endpoint_bound(serialized.clone(), &parcel)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store.store_endpoint_bound(serialized, &parcel).await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_collection_recorded_on_store() {
        let store = SqliteStore::in_memory().unwrap();
        let (parcel, serialized) = endpoint_parcel("recipient-a", "p1");

        store.store_endpoint_bound(serialized, &parcel).await.unwrap();

        let acks = store.list_pending_collection_acks().await.unwrap();
        assert_eq!(acks.len(), 1);
        let (ack, expiry) = &acks[0];
        assert_eq!(ack.parcel_id, "p1");
        assert_eq!(ack.recipient_endpoint_address, "recipient-a");
        assert_eq!(
            ack.sender_endpoint_private_address,
            parcel.sender_certificate.private_address()
        );
        assert_eq!(*expiry, parcel.expiry());

        store.delete_collection_acks(&[ack.clone()]).await.unwrap();
        assert!(store.list_pending_collection_acks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_close_on_drain() {
        let store = SqliteStore::in_memory().unwrap();
        let (parcel1, bytes1) = endpoint_parcel("recipient-a", "p1");
        let (parcel2, bytes2) = endpoint_parcel("recipient-a", "p2");
        let (parcel3, bytes3) = endpoint_parcel("recipient-b", "p3");

        let k1 = store.store_endpoint_bound(bytes1, &parcel1).await.unwrap().unwrap();
        let k2 = store.store_endpoint_bound(bytes2, &parcel2).await.unwrap().unwrap();
        store.store_endpoint_bound(bytes3, &parcel3).await.unwrap().unwrap();

        let mut rx = store
            .stream_active_bound_for_endpoints(vec!["recipient-a".to_string()], false)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(k1));
        assert_eq!(rx.recv().await, Some(k2));
        // Stream ends once drained: recipient-b's parcel is not offered
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream_keep_alive_offers_new_arrivals() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (parcel1, bytes1) = endpoint_parcel("recipient-a", "p1");
        let k1 = store.store_endpoint_bound(bytes1, &parcel1).await.unwrap().unwrap();

        let mut rx = store
            .stream_active_bound_for_endpoints(vec!["recipient-a".to_string()], true)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(k1));

        // Nothing further yet
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        // A new arrival must be offered without resubscribing
        let (parcel2, bytes2) = endpoint_parcel("recipient-a", "p2");
        let k2 = store.store_endpoint_bound(bytes2, &parcel2).await.unwrap().unwrap();

        let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(received, Some(k2));
    }

    #[tokio::test]
    async fn test_internet_bound_listing_and_ack_deletion() {
        let store = SqliteStore::in_memory().unwrap();
        let (parcel, serialized) = endpoint_parcel("https://ping.example.com", "p9");

        let key = store.store_internet_bound(serialized, &parcel).await.unwrap();

        let listed = store.list_internet_bound().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].parcel_key, key);
        assert_eq!(listed[0].expiry, parcel.expiry());

        let ack = ParcelCollectionAck {
            sender_endpoint_private_address: parcel.sender_certificate.private_address(),
            recipient_endpoint_address: parcel.recipient_address.clone(),
            parcel_id: parcel.parcel_id.clone(),
        };

        store.delete_internet_bound_from_ack(&ack).await.unwrap();
        assert!(store.list_internet_bound().await.unwrap().is_empty());

        // Second deletion is a no-op, not an error
        store.delete_internet_bound_from_ack(&ack).await.unwrap();
    }

    #[tokio::test]
    async fn test_key_store_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.get_current_key().await.is_err());

        let key = generate_key_pair();
        let issuer = generate_key_pair();
        let certificate = Certificate::issue(key.public_key, &issuer, 0, i64::MAX);
        store.save_node_key(&key, &certificate).await.unwrap();

        let current = store.get_current_key().await.unwrap();
        assert_eq!(current.key_pair.public_key, key.public_key);
        assert_eq!(current.certificate, certificate);

        let certs = store.fetch_node_certificates().await.unwrap();
        assert!(certs.contains(&certificate));
    }

    #[tokio::test]
    async fn test_cca_issuer_created_once() {
        let store = SqliteStore::in_memory().unwrap();

        let first = store.get_or_create_cca_issuer().await.unwrap();
        assert!(first.certificate.is_self_issued());

        let second = store.get_or_create_cca_issuer().await.unwrap();
        assert_eq!(
            first.key_pair.public_key,
            second.key_pair.public_key
        );
        assert_eq!(first.certificate, second.certificate);
    }
}

//! Courier transport seam
//!
//! The two streaming calls of the courier exchange, behind a trait so the
//! driver can run against an in-memory courier in tests. The production
//! binding speaks WebSocket to the courier (one connection per call,
//! `/collect` and `/deliver`), accepting the self-signed certificates
//! couriers ship with.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tracing::debug;

/// Courier transport errors
#[derive(Debug)]
pub enum CourierClientError {
    /// Connecting to the courier failed
    Connect(String),
    /// A stream failed mid-exchange
    Stream(String),
}

impl std::fmt::Display for CourierClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CourierClientError::Connect(e) => write!(f, "courier connection failed: {}", e),
            CourierClientError::Stream(e) => write!(f, "courier stream failed: {}", e),
        }
    }
}

impl std::error::Error for CourierClientError {}

/// One cargo on its way to the courier, tagged with a local id the courier
/// echoes back as its acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoDelivery {
    /// The cargo's serialization
    pub cargo: Vec<u8>,
    /// Caller-chosen id, echoed by the courier
    pub local_id: String,
}

/// Client for the courier's two streaming calls.
#[async_trait]
pub trait CourierClient: Send {
    /// Present a CCA; receive the stream of cargoes the courier holds for
    /// us. The stream ends when the courier has nothing more.
    async fn collect_cargo(
        &mut self,
        cca_serialized: Vec<u8>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, CourierClientError>;

    /// Stream cargoes to the courier; receive the stream of local ids the
    /// courier acknowledges. Close the delivery sender to finish the call.
    async fn deliver_cargo(
        &mut self,
        deliveries: mpsc::Receiver<CargoDelivery>,
    ) -> Result<mpsc::Receiver<String>, CourierClientError>;

    /// Release the connection.
    async fn close(&mut self);
}

/// Connects courier clients for a given courier URL.
#[async_trait]
pub trait CourierClientFactory: Send + Sync {
    /// Connect a client to the courier at `courier_url`
    /// (`https://<ip>:<port>`).
    async fn connect(
        &self,
        courier_url: &str,
    ) -> Result<Box<dyn CourierClient>, CourierClientError>;
}

/// WebSocket-backed courier client.
///
/// Couriers are LAN devices with self-signed certificates, so certificate
/// validation is disabled for these connections.
pub struct WsCourierClient {
    ws_base_url: String,
}

impl WsCourierClient {
    /// Create a client for the courier at `courier_url`.
    pub fn new(courier_url: &str) -> WsCourierClient {
        let ws_base_url = courier_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        WsCourierClient { ws_base_url }
    }

    async fn connect_call(
        &self,
        call: &str,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        CourierClientError,
    > {
        let url = format!("{}/{call}", self.ws_base_url);
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| CourierClientError::Connect(e.to_string()))?;

        let (stream, _) = tokio_tungstenite::connect_async_tls_with_config(
            url.as_str(),
            None,
            false,
            Some(Connector::NativeTls(tls)),
        )
        .await
        .map_err(|e| CourierClientError::Connect(e.to_string()))?;
        Ok(stream)
    }
}

#[async_trait]
impl CourierClient for WsCourierClient {
    async fn collect_cargo(
        &mut self,
        cca_serialized: Vec<u8>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, CourierClientError> {
        let mut stream = self.connect_call("collect").await?;
        stream
            .send(Message::Binary(cca_serialized))
            .await
            .map_err(|e| CourierClientError::Stream(e.to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Binary(cargo)) => {
                        if tx.send(cargo).await.is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        Ok(rx)
    }

    async fn deliver_cargo(
        &mut self,
        mut deliveries: mpsc::Receiver<CargoDelivery>,
    ) -> Result<mpsc::Receiver<String>, CourierClientError> {
        let stream = self.connect_call("deliver").await?;
        let (mut sink, mut source) = stream.split();

        tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                let bytes =
                    postcard::to_allocvec(&delivery).expect("serialization should not fail");
                if sink.send(Message::Binary(bytes)).await.is_err() {
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let (ack_tx, ack_rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(local_id)) => {
                        if ack_tx.send(local_id).await.is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        Ok(ack_rx)
    }

    async fn close(&mut self) {
        // Connections are per-call; nothing held open between calls.
        debug!("courier client released");
    }
}

/// Factory producing [`WsCourierClient`]s.
#[derive(Default)]
pub struct WsCourierClientFactory;

#[async_trait]
impl CourierClientFactory for WsCourierClientFactory {
    async fn connect(
        &self,
        courier_url: &str,
    ) -> Result<Box<dyn CourierClient>, CourierClientError> {
        Ok(Box::new(WsCourierClient::new(courier_url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_derivation() {
        let client = WsCourierClient::new("https://192.168.1.1:21473");
        assert_eq!(client.ws_base_url, "wss://192.168.1.1:21473");

        let plain = WsCourierClient::new("http://192.168.1.1:21473");
        assert_eq!(plain.ws_base_url, "ws://192.168.1.1:21473");
    }

    #[test]
    fn test_cargo_delivery_roundtrip() {
        let delivery = CargoDelivery {
            cargo: b"cargo bytes".to_vec(),
            local_id: "local-1".to_string(),
        };
        let bytes = postcard::to_allocvec(&delivery).unwrap();
        let decoded: CargoDelivery = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, delivery);
    }
}

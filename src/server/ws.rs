//! WebSocket binding for the parcel collection endpoint
//!
//! Adapts an axum WebSocket into the session's frame transport and wires
//! the streaming-mode header into the session's keep-alive flag.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info, warn};

use crate::constants::{STREAMING_MODE_CLOSE_ON_COMPLETION, STREAMING_MODE_HEADER};
use crate::stores::{KeyStore, ParcelStore};

use super::session::CollectionSession;
use super::{Frame, FrameTransport, SessionError};

/// Shared state for the parcel collection endpoint.
#[derive(Clone)]
pub struct ParcelCollectionState {
    /// Parcel persistence
    pub parcel_store: Arc<dyn ParcelStore>,
    /// Key and certificate persistence
    pub key_store: Arc<dyn KeyStore>,
}

/// Build the router exposing `/v1/parcel-collection`.
pub fn router(state: ParcelCollectionState) -> Router {
    Router::new()
        .route("/v1/parcel-collection", get(ws_handler))
        .with_state(state)
}

/// Bind `addr` and serve parcel collection sessions until the task is
/// dropped.
pub async fn serve(addr: SocketAddr, state: ParcelCollectionState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "parcel collection endpoint listening");
    axum::serve(listener, router(state)).await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<ParcelCollectionState>,
) -> impl IntoResponse {
    let keep_alive = keep_alive_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, keep_alive))
}

/// Only the literal `close-upon-completion` selects close-on-drain; absence
/// or any other value keeps the session alive.
fn keep_alive_from_headers(headers: &HeaderMap) -> bool {
    headers
        .get(STREAMING_MODE_HEADER)
        .and_then(|value| value.to_str().ok())
        != Some(STREAMING_MODE_CLOSE_ON_COMPLETION)
}

async fn handle_socket(socket: WebSocket, state: ParcelCollectionState, keep_alive: bool) {
    let transport = WsTransport { socket };
    let session =
        CollectionSession::new(transport, state.parcel_store, state.key_store, keep_alive);
    match session.run().await {
        Ok(outcome) => debug!(?outcome, "collection session ended"),
        Err(e) => warn!(error = %e, "collection session failed"),
    }
}

struct WsTransport {
    socket: WebSocket,
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        let message = match frame {
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Text(text) => Message::Text(text),
        };
        self.socket
            .send(message)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Binary(bytes))) => return Some(Frame::Binary(bytes)),
                Some(Ok(Message::Text(text))) => return Some(Frame::Text(text)),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return None,
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive error");
                    return None;
                }
                None => return None,
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.socket.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "failed to send close frame");
        }
    }
}

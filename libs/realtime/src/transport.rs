//! Transport seam between the connection manager and the gateway socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RealtimeError;
use crate::events::WireEnvelope;

/// Frames buffered per direction before backpressure kicks in.
const LINK_BUFFER: usize = 256;

/// One live gateway connection. The connection manager writes envelopes into
/// `outbound` and drains `inbound`; when either side closes, the link is dead
/// and a new one must be opened.
pub struct TransportLink {
    pub outbound: mpsc::Sender<WireEnvelope>,
    pub inbound: mpsc::Receiver<WireEnvelope>,
}

/// Dialing is abstracted so tests can hand the connection manager an
/// in-memory channel pair instead of a socket.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, credential: &str) -> Result<TransportLink, RealtimeError>;
}

/// Production transport: a tokio-tungstenite websocket with the bearer
/// credential in the `Authorization` header.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, credential: &str) -> Result<TransportLink, RealtimeError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;
        tracing::debug!(url = %self.url, "gateway socket open");

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WireEnvelope>(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<WireEnvelope>(LINK_BUFFER);

        // Writer half: envelopes become text frames until the sender side of
        // the link is dropped, then the socket is closed politely.
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let frame = match serde_json::to_string(&envelope) {
                    Ok(json) => Message::Text(json.into()),
                    Err(error) => {
                        tracing::error!(%error, event = %envelope.event, "dropping unserializable envelope");
                        continue;
                    }
                };
                if ws_tx.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Reader half: text frames become envelopes. Ending this loop drops
        // `inbound_tx`, which is how the connection manager observes loss.
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    // Pings are answered by tungstenite itself.
                    Ok(_) => continue,
                };
                let envelope: WireEnvelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        tracing::warn!(%error, "unparseable gateway frame dropped");
                        continue;
                    }
                };
                if inbound_tx.send(envelope).await.is_err() {
                    break;
                }
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

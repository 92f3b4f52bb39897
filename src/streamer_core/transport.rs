//! Streaming transport seam
//!
//! The ingestor only needs "connect" and "next text frame". `WsConnector`
//! provides them over a tokio-tungstenite WebSocket; tests plug in scripted
//! connectors to drive disconnects deterministically.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection closed by peer")]
    Closed,
}

/// Opens one multiplexed connection for the configured symbol set
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MessageStream>, TransportError>;

    /// Human-readable endpoint for logging
    fn endpoint(&self) -> String;
}

/// An open connection yielding text frames
#[async_trait]
pub trait MessageStream: Send {
    /// Next text payload; `None` once the connection has ended.
    ///
    /// Must be cancel-safe: the ingestor races it against its stop signal.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the underlying transport (best effort)
    async fn close(&mut self);
}

/// WebSocket connector for a combined-stream URL
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn MessageStream>, TransportError> {
        let (ws_stream, response) = connect_async(self.url.as_str()).await?;
        log::debug!("WebSocket handshake complete: HTTP {}", response.status());
        Ok(Box::new(WsMessageStream { inner: ws_stream }))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

struct WsMessageStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl MessageStream for WsMessageStream {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // tungstenite answers pings itself on the next read/write
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::WebSocket(e))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close(None).await {
            log::debug!("WebSocket close failed: {}", e);
        }
        // Flush the close frame; the peer may already be gone
        let _ = self.inner.flush().await;
    }
}

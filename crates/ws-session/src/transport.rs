//! The raw socket abstraction. Kept separate from [`crate::session`] so
//! tests can swap in [`crate::testing::FakeTransport`] and exercise the
//! state machine without opening real sockets.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open websocket: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
}

/// A duplex text-message channel. Binary and ping/pong frames are
/// handled internally by the implementation; the session core only
/// ever sees `Text`.
#[async_trait]
pub trait Transport: Send {
    async fn connect(url: &Url) -> Result<Self, TransportError>
    where
        Self: Sized;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Returns `None` once the stream is exhausted (closed).
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

pub struct TungsteniteTransport {
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(url: &Url) -> Result<Self, TransportError> {
        let (stream, _response) = connect_async(url.as_str()).await?;
        Ok(Self { stream })
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::Connect)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => return None,
                Ok(Message::Binary(_) | Message::Frame(_)) => continue,
                Err(err) => return Some(Err(TransportError::Connect(err))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

//! The link between a connection manager and the hub.
//!
//! [`Connector`] and [`Link`] are the seams tests use to replace the
//! network; [`WsConnector`] is the production WebSocket implementation.

use std::path::Path;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::ClientError;
use crate::protocol::{ClientMessage, ServerMessage};

/// What a link yields when polled.
#[derive(Debug)]
pub enum LinkFrame {
    Message(ServerMessage),
    /// The hub closed the link. `code` is the WebSocket close code, if any.
    Closed { code: Option<u16>, reason: String },
    Error(ClientError),
}

/// One established connection to the hub.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError>;

    /// Next frame from the hub. Must be cancel-safe.
    async fn next(&mut self) -> LinkFrame;

    async fn close(&mut self);
}

/// Opens links. Returns [`ClientError::Rejected`] when the hub refuses
/// admission outright.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Link>, ClientError>;
}

pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// `url` is the hub endpoint (`ws://host:port/ws`); `root` is the
    /// directory this process displays.
    pub fn new(url: &str, root: &Path) -> Result<Self, ClientError> {
        let mut url = Url::parse(url)?;
        url.query_pairs_mut()
            .append_pair("root", &root.to_string_lossy());
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, ClientError> {
        crate::debug_event!("client", "connecting", "{}", self.url);

        match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((stream, _response)) => Ok(Box::new(WsLink { stream })),
            Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 429 => {
                Err(ClientError::Rejected)
            }
            Err(e) => Err(ClientError::Connect {
                url: self.url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WsLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = serde_json::to_string(message).map_err(|e| ClientError::Protocol(e.to_string()))?;
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn next(&mut self) -> LinkFrame {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => return LinkFrame::Message(message),
                        Err(e) => tracing::warn!("[client] ignoring unparseable message: {e}"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => LinkFrame::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_string(),
                        },
                        None => LinkFrame::Closed {
                            code: None,
                            reason: "closed by hub".to_string(),
                        },
                    };
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkFrame::Error(ClientError::Transport(e.to_string())),
                None => {
                    return LinkFrame::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

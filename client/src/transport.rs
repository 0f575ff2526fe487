//! Data-plane connection seam and message reassembly.
//!
//! A [`DataPlane`] hands out physical fragments. A logical message may span
//! several fragments; [`MessageAssembler`] joins them and only yields bytes once
//! the transport marks the end of the message.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::ClientError;

const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// One physical read from the data plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Data { bytes: Vec<u8>, last: bool },
    /// Close handshake from the engine, with its reason if any
    Close(Option<String>),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Failed(String),
    /// The engine sent a message over the configured size cap
    #[error("message too large: {0}")]
    TooLarge(String),
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Capacity(e) => TransportError::TooLarge(e.to_string()),
            other => TransportError::Failed(other.to_string()),
        }
    }
}

#[async_trait]
pub trait DataPlane: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// `None` once the connection has ended without a close frame.
    async fn next_fragment(&mut self) -> Option<Result<Fragment, TransportError>>;

    /// Tears the connection down. Never fails; errors are only logged.
    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: DataPlane + 'static;

    async fn connect(&self, url: &Url) -> Result<Self::Connection, TransportError>;
}

/// WebSocket data plane
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector {
    max_message_size: Option<usize>,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps a single reassembled message. Larger messages fail the read
    /// instead of being buffered.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    fn config(&self) -> Option<WebSocketConfig> {
        let limit = self.max_message_size?;
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(limit);
        config.max_frame_size = Some(limit);
        Some(config)
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, url: &Url) -> Result<WsConnection, TransportError> {
        let (stream, response) = connect_async_with_config(url.as_str(), self.config(), false)
            .await
            .map_err(TransportError::from)?;
        debug!(status = %response.status(), "stream connected");
        Ok(WsConnection { stream })
    }
}

#[async_trait]
impl DataPlane for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(TransportError::from)
    }

    async fn next_fragment(&mut self) -> Option<Result<Fragment, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            };

            let fragment = match message {
                Message::Text(text) => Fragment::Data {
                    bytes: text.into_bytes(),
                    last: true,
                },
                Message::Binary(bytes) => Fragment::Data { bytes, last: true },
                Message::Close(frame) => Fragment::Close(frame.map(|f| f.reason.to_string())),
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(fragment));
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_GRACE, self.stream.close(None)).await {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {}
            Ok(Err(e)) => debug!(error = %e, "stream close failed"),
            Err(_) => debug!("stream close timed out"),
        }
    }
}

/// Joins fragments into complete messages.
#[derive(Debug)]
pub struct MessageAssembler {
    buf: Vec<u8>,
    max_len: usize,
}

impl MessageAssembler {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Adds one fragment. Returns the whole message when `last` is set.
    pub fn push(&mut self, bytes: Vec<u8>, last: bool) -> Result<Option<Vec<u8>>, ClientError> {
        if self.buf.len() + bytes.len() > self.max_len {
            self.buf.clear();
            return Err(ClientError::ProtocolError(format!(
                "message exceeds {} bytes",
                self.max_len
            )));
        }

        if last && self.buf.is_empty() {
            return Ok(Some(bytes));
        }
        self.buf.extend_from_slice(&bytes);
        if !last {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.buf)))
    }

    pub fn is_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    pub(crate) fn discard(&mut self) {
        if self.is_partial() {
            warn!(bytes = self.buf.len(), "discarding incomplete message");
            self.buf.clear();
        }
    }
}

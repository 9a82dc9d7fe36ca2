//! WebSocket transport for real-time communication via relay server
//!
//! The relay forwards text frames between the tablet and the PC. Query
//! parameters of the URL (session token, our public key) are the only
//! handshake; there is no relay-level protocol on top.

use super::{CloseInfo, Connector, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;
use url::Url;

/// Close code reported when the stream ends without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// WebSocket transport connected to a relay server
pub struct WebSocketTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connected: bool,
}

impl WebSocketTransport {
    /// Connect to a relay server
    pub async fn connect(relay_url: &str) -> TransportResult<Self> {
        let (ws, _) = connect_async(relay_url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(WebSocketTransport {
            ws,
            connected: true,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: &str) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::Closed(CloseInfo::default()));
        }

        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn receive(&mut self) -> TransportResult<String> {
        if !self.connected {
            return Err(TransportError::Closed(CloseInfo::default()));
        }

        // Only `next()` is awaited here, which keeps this cancel safe.
        // Pings are answered by tungstenite on the next write.
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(text),
                    Err(_) => {
                        debug!("Dropping non UTF-8 binary frame ({} bytes)", data.len());
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    self.connected = false;
                    let info = match frame {
                        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.to_string()),
                        None => CloseInfo::default(),
                    };
                    return Err(TransportError::Closed(info));
                }
                None => {
                    self.connected = false;
                    return Err(TransportError::Closed(CloseInfo::new(ABNORMAL_CLOSURE, "")));
                }
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed)) => {
                    self.connected = false;
                    return Err(TransportError::Closed(CloseInfo::default()));
                }
                Some(Err(e)) => {
                    self.connected = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                _ => continue,
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.connected = false;
        match self.ws.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}

/// Opens [`WebSocketTransport`]s
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, url: &Url) -> TransportResult<WebSocketTransport> {
        WebSocketTransport::connect(url.as_str()).await
    }
}

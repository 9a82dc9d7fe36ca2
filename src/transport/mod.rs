//! Transport layer abstraction
//!
//! This module provides a pluggable, message-oriented transport:
//! - WebSocket connections to the relay (`websocket`)
//! - In-memory channels (for testing)
//!
//! # Design
//!
//! The transport only moves text frames and reports how the connection
//! ended. JSON, encryption and the connection state machine live in the
//! session layer. A [`Connector`] opens one transport per connection attempt;
//! it never retries.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub mod websocket;
pub use websocket::{WebSocketConnector, WebSocketTransport};

/// How a connection ended, as reported by the transport
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code, if the peer sent one
    pub code: Option<u16>,
    /// Close reason, if non-empty
    pub reason: Option<String>,
}

impl CloseInfo {
    /// Close info with a code and an optional reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        CloseInfo {
            code: Some(code),
            reason: (!reason.is_empty()).then_some(reason),
        }
    }

    /// Close info for a connection that could not be opened or broke
    pub fn failure(reason: impl Into<String>) -> Self {
        CloseInfo {
            code: None,
            reason: Some(reason.into()),
        }
    }
}

impl std::fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.reason) {
            (Some(code), Some(reason)) => write!(f, "code {code}, reason: {reason}"),
            (Some(code), None) => write!(f, "code {code}"),
            (None, Some(reason)) => write!(f, "reason: {reason}"),
            (None, None) => write!(f, "no close frame"),
        }
    }
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed ({0})")]
    Closed(CloseInfo),

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),
}

impl TransportError {
    /// Close info to surface for this error
    pub fn close_info(&self) -> CloseInfo {
        match self {
            TransportError::Closed(info) => info.clone(),
            other => CloseInfo::failure(other.to_string()),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Abstract transport trait
///
/// `receive` must be cancel safe: the session drops a pending receive when
/// the heartbeat timer fires and calls it again afterwards.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame
    async fn send(&mut self, text: &str) -> TransportResult<()>;

    /// Receive the next text frame
    ///
    /// Returns [`TransportError::Closed`] once the connection has ended.
    async fn receive(&mut self) -> TransportResult<String>;

    /// Close the transport
    async fn close(&mut self) -> TransportResult<()>;
}

/// Opens transports to relay URLs
#[async_trait]
pub trait Connector: Send + Sync {
    /// The transport this connector produces
    type Transport: Transport;

    /// Open a connection to `url`; resolves once the connection is usable
    async fn connect(&self, url: &Url) -> TransportResult<Self::Transport>;
}

/// In-memory transport for testing
///
/// Uses channels to simulate a connection between two endpoints.
pub mod memory {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::mpsc;

    enum Frame {
        Text(String),
        Close(CloseInfo),
    }

    /// Create a pair of connected in-memory transports
    pub fn create_pair() -> (MemoryTransport, MemoryTransport) {
        let (tx1, rx1) = mpsc::channel(100);
        let (tx2, rx2) = mpsc::channel(100);

        let transport1 = MemoryTransport {
            tx: tx1,
            rx: rx2,
            connected: true,
        };

        let transport2 = MemoryTransport {
            tx: tx2,
            rx: rx1,
            connected: true,
        };

        (transport1, transport2)
    }

    /// In-memory transport endpoint
    pub struct MemoryTransport {
        tx: mpsc::Sender<Frame>,
        rx: mpsc::Receiver<Frame>,
        connected: bool,
    }

    impl MemoryTransport {
        /// Close this end with a specific code and reason, as a server would
        pub async fn close_with(&mut self, info: CloseInfo) -> TransportResult<()> {
            self.connected = false;
            self.tx
                .send(Frame::Close(info))
                .await
                .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, text: &str) -> TransportResult<()> {
            if !self.connected {
                return Err(TransportError::Closed(CloseInfo::default()));
            }

            self.tx
                .send(Frame::Text(text.to_string()))
                .await
                .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
        }

        async fn receive(&mut self) -> TransportResult<String> {
            if !self.connected {
                return Err(TransportError::Closed(CloseInfo::default()));
            }

            match self.rx.recv().await {
                Some(Frame::Text(text)) => Ok(text),
                Some(Frame::Close(info)) => {
                    self.connected = false;
                    Err(TransportError::Closed(info))
                }
                None => {
                    self.connected = false;
                    Err(TransportError::Closed(CloseInfo::new(1006, "")))
                }
            }
        }

        async fn close(&mut self) -> TransportResult<()> {
            if self.connected {
                self.close_with(CloseInfo::new(1000, "")).await.ok();
            }
            self.connected = false;
            Ok(())
        }
    }

    /// Connector handing out pre-built in-memory transports
    ///
    /// Every `connect` records the URL and pops the next queued transport;
    /// with nothing queued the connection fails.
    #[derive(Clone, Default)]
    pub struct MemoryConnector {
        queued: Arc<Mutex<VecDeque<MemoryTransport>>>,
        urls: Arc<Mutex<Vec<Url>>>,
    }

    impl MemoryConnector {
        /// Create a connector with nothing queued
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a fresh pair and return the far end (the relay/PC side)
        pub fn queue_pair(&self) -> MemoryTransport {
            let (near, far) = create_pair();
            self.queued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(near);
            far
        }

        /// URLs passed to `connect`, oldest first
        pub fn urls(&self) -> Vec<Url> {
            self.urls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        type Transport = MemoryTransport;

        async fn connect(&self, url: &Url) -> TransportResult<MemoryTransport> {
            self.urls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(url.clone());

            self.queued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .ok_or_else(|| TransportError::ConnectionFailed("connection refused".to_string()))
        }
    }
}

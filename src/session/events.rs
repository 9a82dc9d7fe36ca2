//! Session events for notification and status collaborators
//!
//! The session never renders anything. It reports what happened through a
//! [`Notifier`]; a UI turns the events into toasts, a CLI into log lines.
//! Events carry the relay base URL and close info, never payloads, tokens
//! or key material.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use tracing::{error, info, warn};

use super::state::ConnectionState;
use crate::transport::CloseInfo;

/// Something a user should be told about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection moved to a new state
    StateChanged {
        /// New state
        state: ConnectionState,
        /// Relay base URL (no query, so no token)
        url: String,
        /// Set when the state is `Closed`
        close: Option<CloseInfo>,
    },
    /// The connection is open but the PC has not announced its key yet
    AwaitingKey {
        /// Relay base URL
        url: String,
    },
    /// The PC announced its key; traffic is now encrypted
    KeyEstablished {
        /// Hex public key of the PC
        peer_public_key: String,
    },
    /// The PC rotated the session token
    TokenRotated,
}

/// Severity of a rendered notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Progress information
    Info,
    /// Something worked
    Success,
    /// Something is going away
    Warning,
    /// Something broke
    Error,
}

/// A rendered, human-readable notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Text, prefixed by a local timestamp
    pub message: String,
}

impl SessionEvent {
    /// Severity and text without timestamp
    pub fn summary(&self) -> (NoticeLevel, String) {
        match self {
            SessionEvent::StateChanged { state, url, close } => match state {
                ConnectionState::Connecting => {
                    (NoticeLevel::Info, format!("Connecting to websocket {url}..."))
                }
                ConnectionState::Open => (
                    NoticeLevel::Success,
                    format!("Websocket connection to {url} successfully opened!"),
                ),
                ConnectionState::Closing => (
                    NoticeLevel::Warning,
                    format!("Closing websocket connection to {url}..."),
                ),
                ConnectionState::Closed => {
                    let mut message = format!("Websocket connection to {url} is closed.");
                    if let Some(code) = close.as_ref().and_then(|c| c.code) {
                        message.push_str(&format!("\nCode: {code}"));
                    }
                    if let Some(reason) = close.as_ref().and_then(|c| c.reason.as_deref()) {
                        message.push_str(&format!("\nReason: {reason}"));
                    }
                    (NoticeLevel::Error, message)
                }
                ConnectionState::Uninstantiated => (
                    NoticeLevel::Info,
                    format!("Websocket connection to {url} is uninstantiated."),
                ),
            },
            SessionEvent::AwaitingKey { .. } => (NoticeLevel::Info, "Awaiting box key...".to_string()),
            SessionEvent::KeyEstablished { .. } => (
                NoticeLevel::Success,
                "Secure channel established with the PC".to_string(),
            ),
            SessionEvent::TokenRotated => (
                NoticeLevel::Success,
                "Session secured with new token".to_string(),
            ),
        }
    }

    /// Render as a timestamped notice
    pub fn describe(&self) -> Notice {
        let (level, text) = self.summary();
        Notice {
            level,
            message: format!("[{}] {}", Local::now().format("%H:%M:%S"), text),
        }
    }
}

/// Receives session events
pub trait Notifier: Send + Sync {
    /// Called once per event, in order
    fn notify(&self, event: &SessionEvent);
}

/// Notifier that writes events to the `tracing` log
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &SessionEvent) {
        let (level, text) = event.summary();
        let text = text.replace('\n', " ");
        match level {
            NoticeLevel::Info | NoticeLevel::Success => info!("{}", text),
            NoticeLevel::Warning => warn!("{}", text),
            NoticeLevel::Error => error!("{}", text),
        }
    }
}

/// Notifier that keeps every event, for inspection
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the events seen so far
    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

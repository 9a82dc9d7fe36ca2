//! Connection state machine

use serde::Serialize;

/// Lifecycle of one session connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No address has been supplied yet
    #[default]
    Uninstantiated,
    /// Transport is being opened
    Connecting,
    /// Transport is usable
    Open,
    /// Transport is being shut down
    Closing,
    /// Transport is gone; only a new address reopens it
    Closed,
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// `Closed` never leads back to `Connecting` by itself: reconnecting
    /// requires [`connect`](super::SessionConnection::connect) with an
    /// address, which is the only caller passing `explicit = true`.
    pub fn can_transition(self, next: ConnectionState, explicit: bool) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Uninstantiated, Connecting) => true,
            (Connecting, Open) | (Connecting, Closed) => true,
            (Open, Closing) | (Open, Closed) => true,
            (Closing, Closed) => true,
            (Closed, Connecting) => explicit,
            _ => false,
        }
    }

    /// Whether frames can be sent
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    /// Status indicator color shown next to the connection
    pub fn indicator_color(self) -> &'static str {
        match self {
            ConnectionState::Open => "lime",
            ConnectionState::Connecting => "yellow",
            ConnectionState::Closing => "orange",
            ConnectionState::Closed | ConnectionState::Uninstantiated => "red",
        }
    }

    /// Whether the indicator should glow (anything but a healthy connection)
    pub fn indicator_glows(self) -> bool {
        !self.is_open()
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Uninstantiated => "uninstantiated",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

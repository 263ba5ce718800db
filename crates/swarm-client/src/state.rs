//! Client connection states.

use serde::Serialize;

/// Where the client is in its connection lifecycle.
///
/// `Disconnected` is terminal only after an explicit `disconnect()`; an
/// unexpected close moves to `Reconnecting` when reconnection is enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    /// No transport and no reconnection in progress.
    #[default]
    Disconnected,
    /// First handshake in flight.
    Connecting,
    /// Transport open; sends go straight to the socket.
    Connected,
    /// Waiting out a backoff delay or retrying the handshake.
    Reconnecting,
}

impl ClientState {
    /// Lowercase name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::fmt;

use ice::state::ConnectionState;

/// State of the ICE engine, shaped like `RTCIceTransportState` but
/// collapsed onto `ice::state::ConnectionState` since this crate has no
/// separate "gatherer" state to track.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum IceTransportState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl From<ConnectionState> for IceTransportState {
    fn from(s: ConnectionState) -> Self {
        match s {
            ConnectionState::New => IceTransportState::New,
            ConnectionState::Checking => IceTransportState::Checking,
            ConnectionState::Connected => IceTransportState::Connected,
            ConnectionState::Completed => IceTransportState::Completed,
            ConnectionState::Disconnected => IceTransportState::Disconnected,
            ConnectionState::Failed => IceTransportState::Failed,
            ConnectionState::Closed => IceTransportState::Closed,
            _ => IceTransportState::New,
        }
    }
}

impl fmt::Display for IceTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IceTransportState::New => "new",
            IceTransportState::Checking => "checking",
            IceTransportState::Connected => "connected",
            IceTransportState::Completed => "completed",
            IceTransportState::Disconnected => "disconnected",
            IceTransportState::Failed => "failed",
            IceTransportState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl IceTransportState {
    /// Whether the engine has produced at least one usable pair — the
    /// precondition the DTLS engine waits on before it may start its
    /// handshake.
    pub fn is_ready(&self) -> bool {
        matches!(self, IceTransportState::Connected | IceTransportState::Completed)
    }
}

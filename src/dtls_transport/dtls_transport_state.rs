use std::fmt;

/// DtlsTransportState indicates the DTLS transport establishment state,
/// collapsed from the W3C-flavored `RTCDtlsTransportState` down to the
/// states this engine actually drives through.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsTransportState {
    #[default]
    New = 0,

    /// DTLS is in the process of negotiating a secure connection and
    /// verifying the remote fingerprint.
    Connecting = 1,

    /// DTLS has completed negotiation of a secure connection and verified
    /// the remote fingerprint; SRTP keys have been installed.
    Connected = 2,

    /// The transport was closed intentionally, by a close_notify alert or
    /// by calling `close()`.
    Closed = 3,

    /// The transport failed: an error alert, a fingerprint mismatch, or a
    /// handshake timeout.
    Failed = 4,
}

impl fmt::Display for DtlsTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            DtlsTransportState::New => "new",
            DtlsTransportState::Connecting => "connecting",
            DtlsTransportState::Connected => "connected",
            DtlsTransportState::Closed => "closed",
            DtlsTransportState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dtls_transport_state_displays() {
        assert_eq!(DtlsTransportState::New.to_string(), "new");
        assert_eq!(DtlsTransportState::Connected.to_string(), "connected");
        assert_eq!(DtlsTransportState::Failed.to_string(), "failed");
    }
}

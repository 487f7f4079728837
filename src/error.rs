use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad SDP, out-of-range values, malformed candidate strings, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted before its prerequisites were satisfied
    /// (e.g. start_media before SDP/ICE/DTLS are all ready).
    #[error("not ready: {0}")]
    NotReady(String),

    /// ICE connectivity checks, the DTLS handshake, or a TURN allocation
    /// did not complete within their respective deadlines.
    #[error("timeout: {0}")]
    Timeout(String),

    /// DTLS peer certificate fingerprint mismatch, or TURN credentials
    /// were rejected by the server.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Malformed STUN/DTLS/RTP/RTCP data was observed on a path that
    /// cannot simply drop-and-count (handshake messages, SDP bodies).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A local resource (candidate, SSRC, TURN relay) could not be
    /// allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An invariant the coordinator relies on was violated. Should never
    /// be observed outside of a bug.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("ice error: {0}")]
    Ice(#[from] ice::Error),

    #[error("dtls error: {0}")]
    Dtls(#[from] dtls::Error),

    #[error("sdp error: {0}")]
    Sdp(#[from] sdp::Error),

    #[error("util error: {0}")]
    Util(#[from] util::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Error::NotReady(msg.into())
    }
}

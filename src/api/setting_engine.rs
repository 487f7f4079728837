use std::net::SocketAddr;
use std::time::Duration;

use crate::dtls_transport::dtls_role::DtlsRole;
use crate::ice_transport::{NatMode, ServerCredentials};

/// Crypto suites a session is willing to negotiate. This crate only speaks
/// DTLS-SRTP (SDES is out of scope); the mask exists so configuration reads
/// the same way an `enabled_crypto` bitmask does, and so a future SDES
/// addition has somewhere to plug in without reshaping the API.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CryptoMask {
    pub dtls_srtp: bool,
}

impl Default for CryptoMask {
    fn default() -> Self {
        CryptoMask { dtls_srtp: true }
    }
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub dtls_handshake: Duration,
    pub turn_allocation: Duration,
    pub connectivity_check: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            dtls_handshake: Duration::from_secs(30),
            turn_allocation: Duration::from_secs(10),
            connectivity_check: Duration::from_millis(500),
        }
    }
}

/// Candidate-gathering knobs, mirroring the scope of a `setting_engine::Candidates`
/// struct (minus the mDNS/NAT-1:1 options this system doesn't need).
#[derive(Debug, Default, Clone)]
pub struct Candidates {
    pub stun_server: Option<SocketAddr>,
    pub turn_server: Option<(SocketAddr, ServerCredentials, bool)>,
    pub trickle: bool,
    /// When set, only relayed candidates are ever placed in outgoing SDP.
    pub privacy_mode: bool,
}

/// Builder for session-wide configuration not expressed by the SDP
/// offer/answer itself: plain data plus `set_*` methods, consumed once by
/// `MediaSessionCoordinator::allocate`.
#[derive(Debug, Default, Clone)]
pub struct SettingEngine {
    pub(crate) nat_mode: NatMode,
    pub(crate) crypto_mask: CryptoMask,
    pub(crate) timeouts: Timeouts,
    pub(crate) candidates: Candidates,
    pub(crate) answering_dtls_role: Option<DtlsRole>,
    pub(crate) early_dtls: bool,
    pub(crate) has_video: bool,
}

impl SettingEngine {
    pub fn new() -> Self {
        SettingEngine::default()
    }

    pub fn set_nat_mode(&mut self, mode: NatMode) -> &mut Self {
        self.nat_mode = mode;
        self
    }

    pub fn set_crypto_mask(&mut self, mask: CryptoMask) -> &mut Self {
        self.crypto_mask = mask;
        self
    }

    pub fn set_timeouts(&mut self, timeouts: Timeouts) -> &mut Self {
        self.timeouts = timeouts;
        self
    }

    pub fn set_stun_server(&mut self, addr: SocketAddr) -> &mut Self {
        self.candidates.stun_server = Some(addr);
        self
    }

    pub fn set_turn_server(&mut self, addr: SocketAddr, credentials: ServerCredentials, secure: bool) -> &mut Self {
        self.candidates.turn_server = Some((addr, credentials, secure));
        self
    }

    pub fn set_trickle(&mut self, trickle: bool) -> &mut Self {
        self.candidates.trickle = trickle;
        self
    }

    /// Suppress host candidates so only relayed ones appear in
    /// outgoing SDP.
    pub fn set_privacy_mode(&mut self, on: bool) -> &mut Self {
        self.candidates.privacy_mode = on;
        self
    }

    /// Allow the DTLS handshake to begin on the first peer datagram,
    /// before ICE nomination formally completes.
    pub fn set_early_dtls(&mut self, on: bool) -> &mut Self {
        self.early_dtls = on;
        self
    }

    /// Overrides the DTLS role this session answers with when the offer
    /// was `actpass` (default `active`, per RFC 5763 §5).
    pub fn set_answering_dtls_role(&mut self, role: DtlsRole) -> &mut Self {
        self.answering_dtls_role = Some(role);
        self
    }

    pub fn set_video_enabled(&mut self, on: bool) -> &mut Self {
        self.has_video = on;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let se = SettingEngine::new();
        assert_eq!(se.nat_mode, NatMode::None);
        assert!(se.crypto_mask.dtls_srtp);
        assert!(!se.early_dtls);
        assert!(!se.candidates.privacy_mode);
    }

    #[test]
    fn builder_methods_chain() {
        let mut se = SettingEngine::new();
        se.set_nat_mode(NatMode::IceLite)
            .set_early_dtls(true)
            .set_privacy_mode(true)
            .set_video_enabled(true);
        assert_eq!(se.nat_mode, NatMode::IceLite);
        assert!(se.early_dtls);
        assert!(se.candidates.privacy_mode);
        assert!(se.has_video);
    }
}

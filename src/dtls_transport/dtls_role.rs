use std::fmt;

/// The SDP `a=setup` value for this endpoint (RFC 4145 §4, RFC 5763 §5).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum DtlsRole {
    /// Will send the ClientHello once ICE nominates a pair, or immediately
    /// if the peer is known to be `passive`.
    #[default]
    Actpass,
    Active,
    Passive,
}

/// The default role an offerer proposes, per RFC 5763 §5.
pub const DEFAULT_DTLS_ROLE_OFFER: DtlsRole = DtlsRole::Actpass;
/// The default role an answerer resolves to when the offer was `actpass`.
pub const DEFAULT_DTLS_ROLE_ANSWER: DtlsRole = DtlsRole::Active;

impl DtlsRole {
    /// RFC 5763 §5 answer rule: active if the offer was actpass or passive,
    /// passive if the offer was active.
    pub fn answer_to(offered: DtlsRole) -> DtlsRole {
        match offered {
            DtlsRole::Actpass | DtlsRole::Passive => DtlsRole::Active,
            DtlsRole::Active => DtlsRole::Passive,
        }
    }

    /// Whether this role initiates the handshake (sends ClientHello) once
    /// ICE has nominated a pair.
    pub fn is_client(&self) -> bool {
        matches!(self, DtlsRole::Active | DtlsRole::Actpass)
    }
}

impl fmt::Display for DtlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DtlsRole::Actpass => "actpass",
            DtlsRole::Active => "active",
            DtlsRole::Passive => "passive",
        };
        write!(f, "{s}")
    }
}

impl From<&str> for DtlsRole {
    fn from(raw: &str) -> Self {
        match raw {
            "active" => DtlsRole::Active,
            "passive" => DtlsRole::Passive,
            _ => DtlsRole::Actpass,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn answer_to_follows_rfc5763_setup_rules() {
        assert_eq!(DtlsRole::answer_to(DtlsRole::Actpass), DtlsRole::Active);
        assert_eq!(DtlsRole::answer_to(DtlsRole::Passive), DtlsRole::Active);
        assert_eq!(DtlsRole::answer_to(DtlsRole::Active), DtlsRole::Passive);
    }

    #[test]
    fn is_client_matches_initiator_roles() {
        assert!(DtlsRole::Active.is_client());
        assert!(DtlsRole::Actpass.is_client());
        assert!(!DtlsRole::Passive.is_client());
    }
}

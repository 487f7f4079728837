use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Specifies the hash function algorithm and certificate fingerprint as
/// described in RFC 4572, carried on the SDP `a=fingerprint` line.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    /// Always `"sha-256"` for certificates generated by this crate; kept as
    /// a string (rather than a closed enum) because a remote peer may
    /// advertise any hash function name from the IANA registry.
    pub algorithm: String,
    /// Lowercase, colon-separated hex string, e.g. `"de:ad:be:ef:..."`.
    pub value: String,
}

impl DtlsFingerprint {
    pub fn sha256(der_certificate: &[u8]) -> Self {
        let digest = Sha256::digest(der_certificate);
        let value = digest
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":");
        DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value,
        }
    }

    /// The peer certificate's fingerprint must equal the one carried in
    /// the remote SDP; comparison is case-insensitive.
    pub fn matches(&self, other: &DtlsFingerprint) -> bool {
        self.algorithm.eq_ignore_ascii_case(&other.algorithm)
            && self.value.eq_ignore_ascii_case(&other.value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sha256_fingerprint_is_deterministic_and_colon_separated() {
        let der = b"not a real certificate, just bytes";
        let a = DtlsFingerprint::sha256(der);
        let b = DtlsFingerprint::sha256(der);
        assert_eq!(a, b);
        assert_eq!(a.algorithm, "sha-256");
        assert_eq!(a.value.split(':').count(), 32);
    }

    #[test]
    fn matches_is_case_insensitive() {
        let a = DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "AB:CD".into(),
        };
        let b = DtlsFingerprint {
            algorithm: "SHA-256".into(),
            value: "ab:cd".into(),
        };
        assert!(a.matches(&b));
    }

    #[test]
    fn mismatch_is_detected() {
        let a = DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "AB:CD".into(),
        };
        let b = DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "EF:01".into(),
        };
        assert!(!a.matches(&b));
    }
}

//! SRTP key export, per RFC 5764 and the DTLS-SRTP exporter label used
//! throughout this system: `"EXTRACTOR-dtls_srtp"`. Grounded directly on
//! `srtp::config::Config::extract_session_keys_from_dtls`, reimplemented
//! here because that type's fields are private to the `srtp` crate and
//! this engine needs to own the derived material long enough to log
//! `dtls_estab_ms` before installing it.

use crate::error::{Error, Result};

pub(crate) const EXPORTER_LABEL: &str = "EXTRACTOR-dtls_srtp";

/// AES128_CM_HMAC_SHA1_80 key/salt lengths — the only profile this engine
/// offers in its DTLS `use_srtp` extension.
const KEY_LEN: usize = 16;
const SALT_LEN: usize = 14;

/// The four pieces of keying material the exporter produces, split by
/// direction before being handed to the SRTP/SRTCP contexts.
#[derive(Clone)]
pub struct SrtpKeyingMaterial {
    pub local_master_key: Vec<u8>,
    pub local_master_salt: Vec<u8>,
    pub remote_master_key: Vec<u8>,
    pub remote_master_salt: Vec<u8>,
}

impl SrtpKeyingMaterial {
    /// `exported` must be exactly `2*KEY_LEN + 2*SALT_LEN` bytes, the TLS
    /// exporter output for label [`EXPORTER_LABEL`]. Layout per RFC 5764:
    /// client_write_key | server_write_key | client_write_salt | server_write_salt.
    pub fn from_exported(exported: &[u8], is_client: bool) -> Result<Self> {
        let want = 2 * KEY_LEN + 2 * SALT_LEN;
        if exported.len() != want {
            return Err(Error::ProtocolError(format!(
                "dtls-srtp exporter produced {} bytes, expected {want}",
                exported.len()
            )));
        }

        let mut offset = 0;
        let client_write_key = exported[offset..offset + KEY_LEN].to_vec();
        offset += KEY_LEN;
        let server_write_key = exported[offset..offset + KEY_LEN].to_vec();
        offset += KEY_LEN;
        let client_write_salt = exported[offset..offset + SALT_LEN].to_vec();
        offset += SALT_LEN;
        let server_write_salt = exported[offset..offset + SALT_LEN].to_vec();

        Ok(if is_client {
            SrtpKeyingMaterial {
                local_master_key: client_write_key,
                local_master_salt: client_write_salt,
                remote_master_key: server_write_key,
                remote_master_salt: server_write_salt,
            }
        } else {
            SrtpKeyingMaterial {
                local_master_key: server_write_key,
                local_master_salt: server_write_salt,
                remote_master_key: client_write_key,
                remote_master_salt: client_write_salt,
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn material(n: u8) -> Vec<u8> {
        (0..(2 * KEY_LEN + 2 * SALT_LEN) as u8)
            .map(|i| i.wrapping_add(n))
            .collect()
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(SrtpKeyingMaterial::from_exported(&[0u8; 4], true).is_err());
    }

    #[test]
    fn client_and_server_see_swapped_local_remote() {
        let exported = material(0);
        let client = SrtpKeyingMaterial::from_exported(&exported, true).unwrap();
        let server = SrtpKeyingMaterial::from_exported(&exported, false).unwrap();

        assert_eq!(client.local_master_key, server.remote_master_key);
        assert_eq!(client.remote_master_key, server.local_master_key);
        assert_eq!(client.local_master_salt, server.remote_master_salt);
        assert_eq!(client.remote_master_salt, server.local_master_salt);
    }
}

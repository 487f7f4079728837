//! SRTP protect/unprotect, wrapping two one-way `srtp::context::Context`s
//! (the crate's own contexts are single-direction, per its own doc comment)
//! built from the keying material the DTLS engine derives.

use srtp::context::Context;
use srtp::protection_profile::PROTECTION_PROFILE_AES128CM_HMAC_SHA1_80;

use crate::dtls_transport::SrtpKeyingMaterial;
use crate::error::{Error, Result};

pub struct SrtpSession {
    encrypt: Context,
    decrypt: Context,
}

impl SrtpSession {
    pub fn new(keys: &SrtpKeyingMaterial) -> Result<Self> {
        let profile = PROTECTION_PROFILE_AES128CM_HMAC_SHA1_80;
        let encrypt = Context::new(&keys.local_master_key, &keys.local_master_salt, profile, None, None)
            .map_err(|e| Error::ProtocolError(format!("srtp encrypt context: {e}")))?;
        let decrypt = Context::new(&keys.remote_master_key, &keys.remote_master_salt, profile, None, None)
            .map_err(|e| Error::ProtocolError(format!("srtp decrypt context: {e}")))?;
        Ok(SrtpSession { encrypt, decrypt })
    }

    pub fn protect_rtp(&mut self, plaintext: &[u8]) -> Result<bytes::Bytes> {
        self.encrypt
            .encrypt_rtp(plaintext)
            .map_err(|e| Error::ProtocolError(format!("srtp protect: {e}")))
    }

    pub fn unprotect_rtp(&mut self, encrypted: &[u8]) -> Result<bytes::Bytes> {
        self.decrypt
            .decrypt_rtp(encrypted)
            .map_err(|e| Error::ProtocolError(format!("srtp unprotect: {e}")))
    }

    pub fn protect_rtcp(&mut self, plaintext: &[u8]) -> Result<bytes::Bytes> {
        self.encrypt
            .encrypt_rtcp(plaintext)
            .map_err(|e| Error::ProtocolError(format!("srtcp protect: {e}")))
    }

    pub fn unprotect_rtcp(&mut self, encrypted: &[u8]) -> Result<bytes::Bytes> {
        self.decrypt
            .decrypt_rtcp(encrypted)
            .map_err(|e| Error::ProtocolError(format!("srtcp unprotect: {e}")))
    }
}

//! A participant's keypair and, once signed, its credentials.

use openssl::pkey::{PKey, Public};

use certchat_core::types::is_valid_name;
use certchat_core::{CertChatError, CertChatResult};
use certchat_crypto::{generate_key_pair, Certificate, CertificateEncoder, KeyPair};

#[derive(Debug, Clone)]
pub struct Identity {
    nickname: String,
    keys: KeyPair,
}

impl Identity {
    /// Fresh RSA keypair of `bits` for `nickname`.
    pub fn generate(nickname: &str, bits: u32) -> CertChatResult<Self> {
        if !is_valid_name(nickname) {
            return Err(CertChatError::InvalidName(nickname.to_string()));
        }
        let keys = generate_key_pair(bits).map_err(|e| CertChatError::Crypto(e.to_string()))?;
        Ok(Self {
            nickname: nickname.to_string(),
            keys,
        })
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Unsigned certificate binding the nickname to our public key.
    pub fn signing_request(&self) -> CertChatResult<Certificate> {
        let der = self
            .keys
            .public_key_der()
            .map_err(|e| CertChatError::Crypto(e.to_string()))?;
        Ok(Certificate::unsigned(self.nickname.clone(), der))
    }
}

/// What the CA handed back: our signed certificate and its own public key.
#[derive(Debug, Clone)]
pub struct Credentials {
    certificate: Certificate,
    encoded: String,
    ca_public_key: PKey<Public>,
}

impl Credentials {
    pub fn new(certificate: Certificate, ca_public_key: PKey<Public>) -> CertChatResult<Self> {
        let encoded = CertificateEncoder.encode(&certificate)?;
        Ok(Self {
            certificate,
            encoded,
            ca_public_key,
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Envelope text presented at login.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn ca_public_key(&self) -> &PKey<Public> {
        &self.ca_public_key
    }
}

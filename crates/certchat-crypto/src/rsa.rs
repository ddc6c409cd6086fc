//! RSA primitives: key generation, PKCS#1 v1.5 encryption in both directions

use anyhow::{anyhow, Result};
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};

/// An RSA keypair. The private half never leaves this struct unencoded.
#[derive(Clone)]
pub struct KeyPair {
    private: PKey<Private>,
    public: PKey<Public>,
}

impl KeyPair {
    pub fn from_private(private: PKey<Private>) -> Result<Self> {
        let der = private
            .public_key_to_der()
            .map_err(|e| anyhow!("extracting public key: {e}"))?;
        let public = public_key_from_der(&der)?;
        Ok(Self { private, public })
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private
    }

    pub fn public_key(&self) -> &PKey<Public> {
        &self.public
    }

    /// DER-encoded SubjectPublicKeyInfo
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        public_key_to_der(&self.public)
    }

    /// PKCS#8 PEM encoding of the private key
    pub fn private_key_pem(&self) -> Result<Vec<u8>> {
        self.private
            .private_key_to_pem_pkcs8()
            .map_err(|e| anyhow!("encoding private key: {e}"))
    }

    pub fn from_private_pem(pem: &[u8]) -> Result<Self> {
        let private =
            PKey::private_key_from_pem(pem).map_err(|e| anyhow!("parsing private key PEM: {e}"))?;
        if private.rsa().is_err() {
            anyhow::bail!("private key is not an RSA key");
        }
        Self::from_private(private)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.private.bits())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh RSA keypair of `bits` modulus size.
pub fn generate_key_pair(bits: u32) -> Result<KeyPair> {
    let rsa = Rsa::generate(bits).map_err(|e| anyhow!("RSA key generation failed: {e}"))?;
    let private = PKey::from_rsa(rsa).map_err(|e| anyhow!("wrapping RSA key: {e}"))?;
    KeyPair::from_private(private)
}

pub fn public_key_to_der(key: &PKey<Public>) -> Result<Vec<u8>> {
    key.public_key_to_der()
        .map_err(|e| anyhow!("encoding public key: {e}"))
}

pub fn public_key_from_der(der: &[u8]) -> Result<PKey<Public>> {
    PKey::public_key_from_der(der).map_err(|e| anyhow!("parsing public key DER: {e}"))
}

/// PEM SubjectPublicKeyInfo, as written next to the CA private key.
pub fn public_key_to_pem(key: &PKey<Public>) -> Result<Vec<u8>> {
    key.public_key_to_pem()
        .map_err(|e| anyhow!("encoding public key PEM: {e}"))
}

pub fn public_key_from_pem(pem: &[u8]) -> Result<PKey<Public>> {
    PKey::public_key_from_pem(pem).map_err(|e| anyhow!("parsing public key PEM: {e}"))
}

/// Encrypt `data` with the private key (the signing direction).
pub fn private_encrypt(data: &[u8], key: &PKey<Private>) -> Result<Vec<u8>> {
    let rsa = key.rsa().map_err(|e| anyhow!("not an RSA private key: {e}"))?;
    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa
        .private_encrypt(data, &mut out, Padding::PKCS1)
        .map_err(|e| anyhow!("RSA private encryption failed: {e}"))?;
    out.truncate(len);
    Ok(out)
}

/// Decrypt data produced by [`private_encrypt`] with the matching public key.
pub fn public_decrypt(data: &[u8], key: &PKey<Public>) -> Result<Vec<u8>> {
    let rsa = key.rsa().map_err(|e| anyhow!("not an RSA public key: {e}"))?;
    if data.len() != rsa.size() as usize {
        anyhow::bail!(
            "RSA input has wrong length: {} bytes (expected {})",
            data.len(),
            rsa.size()
        );
    }
    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa
        .public_decrypt(data, &mut out, Padding::PKCS1)
        .map_err(|e| anyhow!("RSA public decryption failed: {e}"))?;
    out.truncate(len);
    Ok(out)
}

/// Encrypt `data` for the holder of the private key.
pub fn public_encrypt(data: &[u8], key: &PKey<Public>) -> Result<Vec<u8>> {
    let rsa = key.rsa().map_err(|e| anyhow!("not an RSA public key: {e}"))?;
    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa
        .public_encrypt(data, &mut out, Padding::PKCS1)
        .map_err(|e| anyhow!("RSA public encryption failed: {e}"))?;
    out.truncate(len);
    Ok(out)
}

/// Decrypt data produced by [`public_encrypt`].
pub fn private_decrypt(data: &[u8], key: &PKey<Private>) -> Result<Vec<u8>> {
    let rsa = key.rsa().map_err(|e| anyhow!("not an RSA private key: {e}"))?;
    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa
        .private_decrypt(data, &mut out, Padding::PKCS1)
        .map_err(|e| anyhow!("RSA private decryption failed: {e}"))?;
    out.truncate(len);
    Ok(out)
}

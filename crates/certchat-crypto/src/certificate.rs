//! Certificate record
//!
//! A certificate is either *unsigned* (subject + public key only) or *signed*
//! (serial number, issuer, emission date and signature all present). The CA
//! turns the first into the second exactly once; there is no public mutator.

use serde::{Deserialize, Serialize};

use certchat_core::{CertChatError, CertChatResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(default)]
    serial_number: Option<u64>,
    subject: String,
    #[serde(default)]
    issuer: Option<String>,
    /// DER SubjectPublicKeyInfo of the subject's RSA key
    #[serde(with = "certchat_core::b64")]
    public_key: Vec<u8>,
    /// Unix timestamp in milliseconds
    #[serde(default)]
    emission_date: Option<u64>,
    #[serde(default, with = "certchat_core::b64::option")]
    signature: Option<Vec<u8>>,
}

impl Certificate {
    /// A fresh certificate as built by a client before signing.
    pub fn unsigned(subject: impl Into<String>, public_key_der: Vec<u8>) -> Self {
        Self {
            serial_number: None,
            subject: subject.into(),
            issuer: None,
            public_key: public_key_der,
            emission_date: None,
            signature: None,
        }
    }

    /// Copy of `request` with the CA-assigned fields filled in, not yet signed.
    pub(crate) fn issued_from(
        request: &Certificate,
        serial_number: u64,
        issuer: &str,
        emission_date: u64,
    ) -> Self {
        Self {
            serial_number: Some(serial_number),
            subject: request.subject.clone(),
            issuer: Some(issuer.to_string()),
            public_key: request.public_key.clone(),
            emission_date: Some(emission_date),
            signature: None,
        }
    }

    pub(crate) fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn serial_number(&self) -> Option<u64> {
        self.serial_number
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn emission_date(&self) -> Option<u64> {
        self.emission_date
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn is_signed(&self) -> bool {
        self.serial_number.is_some()
            && self.issuer.is_some()
            && self.emission_date.is_some()
            && self.signature.is_some()
    }

    pub fn is_unsigned(&self) -> bool {
        self.serial_number.is_none()
            && self.issuer.is_none()
            && self.emission_date.is_none()
            && self.signature.is_none()
    }

    /// Reject records that are neither fully unsigned nor fully signed.
    pub fn check_state(&self) -> CertChatResult<()> {
        if self.subject.is_empty() {
            return Err(CertChatError::DecodeFailure("empty subject".into()));
        }
        if self.is_signed() || self.is_unsigned() {
            Ok(())
        } else {
            Err(CertChatError::DecodeFailure(
                "certificate is partially signed".into(),
            ))
        }
    }

    /// Bytes covered by the signature.
    ///
    /// Order is fixed: serial, issuer, subject, public key, emission date.
    /// Changing it invalidates every certificate already issued.
    ///
    /// Fields are joined without separators, so a signature does not pin
    /// where one field ends: serial `42` with issuer `CA` digests the same as
    /// serial `4` with issuer `2CA`. [`CertificateAuthority::verify`] also
    /// checks the issuer name for that reason.
    ///
    /// [`CertificateAuthority::verify`]: crate::CertificateAuthority::verify
    pub fn canonical_fields(&self) -> Vec<u8> {
        let serial = self.serial_number.map(|s| s.to_string()).unwrap_or_default();
        let issuer = self.issuer.as_deref().unwrap_or_default();
        let date = self.emission_date.map(|d| d.to_string()).unwrap_or_default();

        let mut out = Vec::with_capacity(
            serial.len() + issuer.len() + self.subject.len() + self.public_key.len() + date.len(),
        );
        out.extend_from_slice(serial.as_bytes());
        out.extend_from_slice(issuer.as_bytes());
        out.extend_from_slice(self.subject.as_bytes());
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(date.as_bytes());
        out
    }

    #[cfg(test)]
    pub(crate) fn signature_mut(&mut self) -> Option<&mut Vec<u8>> {
        self.signature.as_mut()
    }

    #[cfg(test)]
    pub(crate) fn set_subject(&mut self, subject: &str) {
        self.subject = subject.to_string();
    }

    #[cfg(test)]
    pub(crate) fn set_serial_number(&mut self, serial: u64) {
        self.serial_number = Some(serial);
    }

    #[cfg(test)]
    pub(crate) fn public_key_mut(&mut self) -> &mut Vec<u8> {
        &mut self.public_key
    }

    #[cfg(test)]
    pub(crate) fn set_emission_date(&mut self, date: u64) {
        self.emission_date = Some(date);
    }

    #[cfg(test)]
    pub(crate) fn set_issuer(&mut self, issuer: &str) {
        self.issuer = Some(issuer.to_string());
    }

    #[cfg(test)]
    pub(crate) fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = Some(signature);
    }
}

//! Certificate Authority: issuance and signature verification

use openssl::pkey::{PKey, Public};
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tracing::debug;

use certchat_core::{CertChatError, CertChatResult};

use crate::certificate::Certificate;
use crate::digest::digest;
use crate::rsa::{self, KeyPair};
use crate::serial::SerialNumberGenerator;

/// Signing half of the CA: identity, keypair and the serial counter.
#[derive(Debug)]
pub struct CertificateAuthority {
    issuer: String,
    keys: KeyPair,
    public_key_der: Vec<u8>,
    serials: SerialNumberGenerator,
}

impl CertificateAuthority {
    pub fn new(
        issuer: impl Into<String>,
        keys: KeyPair,
        serials: SerialNumberGenerator,
    ) -> CertChatResult<Self> {
        let public_key_der = keys
            .public_key_der()
            .map_err(|e| CertChatError::Crypto(e.to_string()))?;
        Ok(Self {
            issuer: issuer.into(),
            keys,
            public_key_der,
            serials,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn public_key(&self) -> &PKey<Public> {
        self.keys.public_key()
    }

    /// DER SubjectPublicKeyInfo, as sent in KEY_MESSAGE replies
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Issue a signed certificate for the subject and key of `request`.
    ///
    /// Consumes exactly one serial number. On failure nothing is returned,
    /// so a caller never observes a partially signed certificate.
    pub fn sign(&self, request: &Certificate) -> CertChatResult<Certificate> {
        let serial = self.serials.next();
        let issued = Certificate::issued_from(request, serial, &self.issuer, now_millis());

        let fingerprint = digest(&issued.canonical_fields());
        let signature = rsa::private_encrypt(&fingerprint, self.keys.private_key())
            .map_err(|e| CertChatError::Crypto(e.to_string()))?;

        debug!(subject = %issued.subject(), serial, "certificate signed");
        Ok(issued.with_signature(signature))
    }

    /// Whether `certificate` was issued by this CA: its signature verifies
    /// under this key and its issuer is this CA's name.
    pub fn verify(&self, certificate: &Certificate) -> CertChatResult<()> {
        verify_certificate(certificate, self.keys.public_key())?;
        if certificate.issuer() != Some(self.issuer.as_str()) {
            return Err(CertChatError::SignatureMismatch);
        }
        Ok(())
    }
}

/// Check that `certificate.signature` decrypts, under `ca_public_key`, to the
/// digest of the certificate's canonical fields.
pub fn verify_certificate(
    certificate: &Certificate,
    ca_public_key: &PKey<Public>,
) -> CertChatResult<()> {
    if !certificate.is_signed() {
        return Err(CertChatError::SignatureMismatch);
    }
    let signature = certificate
        .signature()
        .ok_or(CertChatError::SignatureMismatch)?;

    let expected = digest(&certificate.canonical_fields());
    let recovered = rsa::public_decrypt(signature, ca_public_key)
        .map_err(|_| CertChatError::SignatureMismatch)?;

    if recovered.len() == expected.len() && bool::from(recovered.as_slice().ct_eq(expected.as_slice())) {
        Ok(())
    } else {
        Err(CertChatError::SignatureMismatch)
    }
}

/// [`verify_certificate`] with the CA key given as DER bytes.
pub fn verify_certificate_der(certificate: &Certificate, ca_public_key_der: &[u8]) -> CertChatResult<()> {
    let key = rsa::public_key_from_der(ca_public_key_der)
        .map_err(|e| CertChatError::Crypto(e.to_string()))?;
    verify_certificate(certificate, &key)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::CertificateEncoder;
    use crate::rsa::generate_key_pair;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn test_ca() -> CertificateAuthority {
        CertificateAuthority::new(
            "CA",
            generate_key_pair(1024).unwrap(),
            SerialNumberGenerator::starting_after(100),
        )
        .unwrap()
    }

    fn request(subject: &str) -> Certificate {
        let subject_keys = generate_key_pair(1024).unwrap();
        Certificate::unsigned(subject, subject_keys.public_key_der().unwrap())
    }

    #[test]
    fn test_sign_fills_ca_fields() {
        let ca = test_ca();
        let req = request("alice");
        let cert = ca.sign(&req).unwrap();

        assert!(cert.is_signed());
        assert_eq!(cert.subject(), "alice");
        assert_eq!(cert.issuer(), Some("CA"));
        assert_eq!(cert.public_key(), req.public_key());
        assert_eq!(cert.serial_number(), Some(101));
        assert!(cert.emission_date().unwrap() > 0);
    }

    #[test]
    fn test_signed_certificate_verifies() {
        let ca = test_ca();
        let cert = ca.sign(&request("alice")).unwrap();
        assert!(ca.verify(&cert).is_ok());
        assert!(verify_certificate_der(&cert, ca.public_key_der()).is_ok());
    }

    #[test]
    fn test_verification_survives_encoding() {
        let ca = test_ca();
        let cert = ca.sign(&request("alice")).unwrap();
        let text = CertificateEncoder.encode(&cert).unwrap();
        let decoded = CertificateEncoder.decode(&text).unwrap();
        assert!(ca.verify(&decoded).is_ok());
    }

    #[test]
    fn test_other_ca_rejects() {
        let ca = test_ca();
        let other = test_ca();
        let cert = ca.sign(&request("alice")).unwrap();
        assert!(matches!(
            other.verify(&cert),
            Err(CertChatError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_same_key_under_another_name_is_not_this_ca() {
        let ca = test_ca();
        let pem = ca.keys.private_key_pem().unwrap();
        let renamed = CertificateAuthority::new(
            "Lab CA",
            KeyPair::from_private_pem(&pem).unwrap(),
            SerialNumberGenerator::new(),
        )
        .unwrap();

        let cert = renamed.sign(&request("alice")).unwrap();
        assert!(verify_certificate(&cert, ca.public_key()).is_ok());
        assert!(renamed.verify(&cert).is_ok());
        assert!(matches!(ca.verify(&cert), Err(CertChatError::SignatureMismatch)));
    }

    #[test]
    fn test_unsigned_never_verifies() {
        let ca = test_ca();
        assert!(matches!(
            ca.verify(&request("alice")),
            Err(CertChatError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_zeroed_signature_fails() {
        let ca = test_ca();
        let mut cert = ca.sign(&request("alice")).unwrap();
        cert.set_signature(vec![0u8; 1024]);
        assert!(ca.verify(&cert).is_err());
    }

    #[test]
    fn test_flipped_signature_byte_fails() {
        let ca = test_ca();
        let cert = ca.sign(&request("alice")).unwrap();
        let len = cert.signature().unwrap().len();

        for i in [0, len / 2, len - 1] {
            let mut tampered = cert.clone();
            if let Some(sig) = tampered.signature_mut() {
                sig[i] ^= 0x01;
            }
            assert!(ca.verify(&tampered).is_err(), "flip at byte {i} must fail");
        }
    }

    #[test]
    fn test_changed_canonical_field_fails() {
        let ca = test_ca();
        let cert = ca.sign(&request("alice")).unwrap();

        let mut subject = cert.clone();
        subject.set_subject("alicf");
        assert!(ca.verify(&subject).is_err());

        let mut serial = cert.clone();
        serial.set_serial_number(cert.serial_number().unwrap() + 1);
        assert!(ca.verify(&serial).is_err());

        let mut issuer = cert.clone();
        issuer.set_issuer("DA");
        assert!(ca.verify(&issuer).is_err());

        let mut date = cert.clone();
        date.set_emission_date(cert.emission_date().unwrap() ^ 1);
        assert!(ca.verify(&date).is_err());

        let mut key = cert.clone();
        let last = key.public_key_mut().len() - 1;
        key.public_key_mut()[last] ^= 0x01;
        assert!(ca.verify(&key).is_err());
    }

    #[test]
    fn test_one_serial_per_signing_under_concurrency() {
        let ca = Arc::new(test_ca());
        let req = Arc::new(request("alice"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ca = ca.clone();
                let req = req.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .map(|_| ca.sign(&req).unwrap().serial_number().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let serials: HashSet<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(serials.len(), 20);
        assert_eq!(serials.iter().min(), Some(&101));
        assert_eq!(serials.iter().max(), Some(&120));
    }
}

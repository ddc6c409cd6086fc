//! Textual certificate envelope
//!
//! ```text
//! -----BEGIN CUSTOM CERTIFICATE-----
//! <base64 of the JSON-serialized certificate>
//! -----END CUSTOM CERTIFICATE-----
//! ```

use certchat_core::{b64, CertChatError, CertChatResult};

use crate::certificate::Certificate;

pub const HEADER: &str = "-----BEGIN CUSTOM CERTIFICATE-----";
pub const FOOTER: &str = "-----END CUSTOM CERTIFICATE-----";

/// Reversible text encoding of a [`Certificate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateEncoder;

impl CertificateEncoder {
    pub fn encode(&self, certificate: &Certificate) -> CertChatResult<String> {
        let json = serde_json::to_vec(certificate)
            .map_err(|e| CertChatError::Protocol(format!("serializing certificate: {e}")))?;
        Ok(format!("{HEADER}\n{}\n{FOOTER}", b64::encode(&json)))
    }

    pub fn decode(&self, text: &str) -> CertChatResult<Certificate> {
        let start = text.find(HEADER).ok_or(CertChatError::MalformedEnvelope)?;
        let body_start = start + HEADER.len();
        let end = text[body_start..]
            .find(FOOTER)
            .map(|i| body_start + i)
            .ok_or(CertChatError::MalformedEnvelope)?;

        // tolerate line-wrapped payloads
        let payload: String = text[body_start..end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if payload.is_empty() {
            return Err(CertChatError::DecodeFailure("empty payload".into()));
        }

        let json = b64::decode(&payload)
            .map_err(|e| CertChatError::DecodeFailure(format!("base64: {e}")))?;
        let certificate: Certificate = serde_json::from_slice(&json)
            .map_err(|e| CertChatError::DecodeFailure(format!("certificate fields: {e}")))?;
        certificate.check_state()?;
        Ok(certificate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signed_sample() -> Certificate {
        let request = Certificate::unsigned("alice", vec![0x30, 0x82, 0x01, 0x22]);
        Certificate::issued_from(&request, 123_456, "CA", 1_717_000_000_000)
            .with_signature(vec![0x5A; 256])
    }

    #[test]
    fn envelope_layout() {
        let text = CertificateEncoder.encode(&signed_sample()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[2], FOOTER);
        assert!(!text.contains(','), "envelope must be safe to comma-join");
    }

    #[test]
    fn roundtrip_signed_and_unsigned() {
        let encoder = CertificateEncoder;
        let signed = signed_sample();
        assert_eq!(encoder.decode(&encoder.encode(&signed).unwrap()).unwrap(), signed);

        let unsigned = Certificate::unsigned("bob", vec![1, 2, 3]);
        assert_eq!(
            encoder.decode(&encoder.encode(&unsigned).unwrap()).unwrap(),
            unsigned
        );
    }

    #[test]
    fn missing_markers_is_malformed() {
        let text = CertificateEncoder.encode(&signed_sample()).unwrap();
        let no_header = text.replace(HEADER, "");
        let no_footer = text.replace(FOOTER, "");

        assert!(matches!(
            CertificateEncoder.decode(&no_header),
            Err(CertChatError::MalformedEnvelope)
        ));
        assert!(matches!(
            CertificateEncoder.decode(&no_footer),
            Err(CertChatError::MalformedEnvelope)
        ));
        assert!(matches!(
            CertificateEncoder.decode("alice"),
            Err(CertChatError::MalformedEnvelope)
        ));
    }

    #[test]
    fn corrupt_base64_is_decode_failure() {
        let text = format!("{HEADER}\n!!!not base64!!!\n{FOOTER}");
        assert!(matches!(
            CertificateEncoder.decode(&text),
            Err(CertChatError::DecodeFailure(_))
        ));
    }

    #[test]
    fn truncated_fields_is_decode_failure() {
        let json = br#"{"subject":"alice"}"#;
        let text = format!("{HEADER}\n{}\n{FOOTER}", b64::encode(json));
        assert!(matches!(
            CertificateEncoder.decode(&text),
            Err(CertChatError::DecodeFailure(_))
        ));
    }

    #[test]
    fn wrapped_payload_is_accepted() {
        let text = CertificateEncoder.encode(&signed_sample()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let body = lines[1];
        let (a, b) = body.split_at(body.len() / 2);
        let wrapped = format!("{HEADER}\n{a}\n{b}\n{FOOTER}\n");
        assert_eq!(CertificateEncoder.decode(&wrapped).unwrap(), signed_sample());
    }

    fn arb_certificate() -> impl Strategy<Value = Certificate> {
        (
            "[A-Za-z0-9_]{1,32}",
            proptest::collection::vec(any::<u8>(), 1..=300),
            proptest::option::of((
                1u64..=crate::MAX_SERIAL,
                "[ -~]{0,24}",
                any::<u64>(),
                proptest::collection::vec(any::<u8>(), 0..=256),
            )),
        )
            .prop_map(|(subject, key, signed)| {
                let request = Certificate::unsigned(subject, key);
                match signed {
                    None => request,
                    Some((serial, issuer, date, sig)) => {
                        Certificate::issued_from(&request, serial, &issuer, date).with_signature(sig)
                    }
                }
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(cert in arb_certificate()) {
            let encoder = CertificateEncoder;
            let text = encoder.encode(&cert).unwrap();
            prop_assert_eq!(encoder.decode(&text).unwrap(), cert);
        }
    }
}

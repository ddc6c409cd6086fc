//! Local view of peers whose certificates verified under the CA key.

use std::collections::BTreeMap;

use openssl::pkey::{PKey, Public};
use tracing::{debug, warn};

use certchat_core::types::RECIPIENT_SEPARATOR;
use certchat_core::{CertChatError, CertChatResult};
use certchat_crypto::{verify_certificate, Certificate, CertificateEncoder};

#[derive(Debug)]
pub struct PeerDirectory {
    ca_public_key: PKey<Public>,
    own_name: String,
    peers: BTreeMap<String, Certificate>,
}

impl PeerDirectory {
    pub fn new(ca_public_key: PKey<Public>, own_name: impl Into<String>) -> Self {
        Self {
            ca_public_key,
            own_name: own_name.into(),
            peers: BTreeMap::new(),
        }
    }

    /// Decode and verify an announced certificate; on success the peer joins
    /// the view (replacing any earlier certificate for the same subject).
    ///
    /// A certificate that fails verification leaves the view untouched.
    pub fn admit(&mut self, encoded: &str) -> CertChatResult<&Certificate> {
        let certificate = CertificateEncoder.decode(encoded)?;
        verify_certificate(&certificate, &self.ca_public_key)?;

        let name = certificate.subject().to_string();
        if name == self.own_name {
            return Err(CertChatError::DuplicateName(name));
        }
        debug!(peer = %name, serial = certificate.serial_number().unwrap_or_default(), "peer trusted");
        self.peers.insert(name.clone(), certificate);
        self.peers
            .get(&name)
            .ok_or(CertChatError::NotFound(name))
    }

    /// Admit every certificate of a `LOGGED_USERS` payload.
    ///
    /// Returns the admitted names and the reasons for each rejection.
    pub fn admit_roster(&mut self, payload: &str) -> (Vec<String>, Vec<CertChatError>) {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        for entry in payload.split(RECIPIENT_SEPARATOR) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match self.admit(entry) {
                Ok(cert) => admitted.push(cert.subject().to_string()),
                Err(e) => {
                    warn!("discarding roster entry: {e}");
                    rejected.push(e);
                }
            }
        }
        (admitted, rejected)
    }

    pub fn remove(&mut self, name: &str) -> Option<Certificate> {
        self.peers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Certificate> {
        self.peers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    /// Trusted peer names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.peers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

//! Client side of the CA service.

use openssl::pkey::{PKey, Public};
use tokio::net::ToSocketAddrs;
use tracing::{debug, info};

use certchat_core::pending::{pending_token, PendingStore};
use certchat_core::types::VALID;
use certchat_core::{CertChatError, Message, MessageType};
use certchat_crypto::rsa::public_key_from_der;
use certchat_crypto::{verify_certificate, CertificateEncoder};

use crate::error::{ClientError, ClientResult};
use crate::identity::{Credentials, Identity};
use crate::link::Link;

/// Recipient named on requests; the CA answers whatever it is called.
const CA_RECIPIENT: &str = "CA";

#[derive(Debug)]
pub struct CaClient {
    link: Link,
}

impl CaClient {
    pub async fn connect(addr: impl ToSocketAddrs, max_frame_bytes: usize) -> ClientResult<Self> {
        Ok(Self {
            link: Link::connect(addr, max_frame_bytes).await?,
        })
    }

    /// Have the CA sign `identity`'s certificate.
    ///
    /// The unsigned certificate is deposited in `store` under
    /// `<nickname>.pem` and only that token travels in the request. The
    /// returned certificate is checked against the CA key that came with it
    /// and against our own subject and public key.
    pub async fn sign(
        &mut self,
        identity: &Identity,
        store: &dyn PendingStore,
    ) -> ClientResult<Credentials> {
        let request = identity.signing_request()?;
        let token = pending_token(identity.nickname());
        store.deposit(&token, &CertificateEncoder.encode(&request)?)?;

        self.link
            .send(&Message::to(
                MessageType::SignCertificate,
                token.as_str(),
                identity.nickname(),
                CA_RECIPIENT,
            ))
            .await?;

        let reply = self.link.recv().await?;
        let certificate = match reply.kind {
            MessageType::SignCertificate => CertificateEncoder.decode(&reply.text())?,
            MessageType::Error => return Err(ClientError::Rejected(reply.text())),
            other => return Err(ClientError::UnexpectedReply(other)),
        };
        let ca_public_key = self.expect_key().await?;

        if certificate.subject() != identity.nickname() || certificate.public_key() != request.public_key() {
            return Err(CertChatError::SignatureMismatch.into());
        }
        verify_certificate(&certificate, &ca_public_key)?;

        info!(
            subject = %certificate.subject(),
            serial = certificate.serial_number().unwrap_or_default(),
            "certificate signed by CA"
        );
        Ok(Credentials::new(certificate, ca_public_key)?)
    }

    /// Ask the CA whether `encoded` carries its signature.
    pub async fn validate(&mut self, encoded: &str, sender: &str) -> ClientResult<bool> {
        self.link
            .send(&Message::to(
                MessageType::CertificateValidation,
                encoded,
                sender,
                CA_RECIPIENT,
            ))
            .await?;
        let reply = self.link.recv().await?;
        match reply.kind {
            MessageType::CertificateValidation => Ok(reply.text() == VALID),
            MessageType::Error => Err(ClientError::Rejected(reply.text())),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Fetch the CA public key without a signing request.
    pub async fn public_key(&mut self, sender: &str) -> ClientResult<PKey<Public>> {
        self.link
            .send(&Message::to(MessageType::KeyMessage, "", sender, CA_RECIPIENT))
            .await?;
        self.expect_key().await
    }

    async fn expect_key(&mut self) -> ClientResult<PKey<Public>> {
        let reply = self.link.recv().await?;
        match reply.kind {
            MessageType::KeyMessage => {
                debug!(bytes = reply.payload.len(), "CA public key received");
                public_key_from_der(&reply.payload)
                    .map_err(|e| ClientError::Core(CertChatError::Crypto(e.to_string())))
            }
            MessageType::Error => Err(ClientError::Rejected(reply.text())),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }
}

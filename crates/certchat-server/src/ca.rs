//! CA service: turns deposited signing requests into signed certificates.
//!
//! A session loops `AwaitingRequest -> Signing -> Replied -> AwaitingRequest`
//! until the peer disconnects, a frame cannot be read, or shutdown fires.
//! Request-level failures become `ERROR` replies and never end the session.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use certchat_core::pending::PendingStore;
use certchat_core::types::{INVALID, VALID};
use certchat_core::wire::{read_message, write_message};
use certchat_core::{CertChatResult, Message, MessageType};
use certchat_crypto::{CertificateAuthority, CertificateEncoder};

use crate::listener;
use crate::metrics::ServerMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaSessionState {
    AwaitingRequest,
    Signing,
    Replied,
    Closed,
}

pub struct CaService {
    authority: Arc<CertificateAuthority>,
    pending: Arc<dyn PendingStore>,
    metrics: ServerMetrics,
    max_frame_bytes: usize,
    encoder: CertificateEncoder,
}

impl CaService {
    pub fn new(
        authority: Arc<CertificateAuthority>,
        pending: Arc<dyn PendingStore>,
        metrics: ServerMetrics,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            authority,
            pending,
            metrics,
            max_frame_bytes,
            encoder: CertificateEncoder,
        }
    }

    pub fn authority(&self) -> &CertificateAuthority {
        &self.authority
    }

    /// Replies to one request, in the order they must be written.
    pub fn handle(&self, request: &Message) -> Vec<Message> {
        let issuer = self.authority.issuer();
        match request.kind {
            MessageType::SignCertificate => match self.sign_request(request) {
                Ok(replies) => {
                    self.metrics.certificates_issued.inc();
                    replies
                }
                Err(e) => {
                    self.metrics.signing_failures.inc();
                    warn!(token = %request.text(), "signing request failed: {e}");
                    vec![Message::error(e.reply_text(), issuer, &request.sender)]
                }
            },
            MessageType::CertificateValidation => vec![self.validate(request)],
            MessageType::KeyMessage => vec![self.key_reply(&request.sender)],
            other => {
                debug!(kind = ?other, "unsupported request on CA service");
                let e = certchat_core::CertChatError::UnsupportedRequest(other);
                vec![Message::error(e.reply_text(), issuer, &request.sender)]
            }
        }
    }

    fn sign_request(&self, request: &Message) -> CertChatResult<Vec<Message>> {
        let token = request.text();
        let encoded = self.pending.take(token.trim())?;
        let unsigned = self.encoder.decode(&encoded)?;
        let signed = self.authority.sign(&unsigned)?;
        let reply = self.encoder.encode(&signed)?;

        info!(
            subject = %signed.subject(),
            serial = signed.serial_number().unwrap_or_default(),
            "certificate issued"
        );
        let subject = signed.subject();
        Ok(vec![
            Message::to(
                MessageType::SignCertificate,
                reply,
                self.authority.issuer(),
                subject,
            ),
            self.key_reply(subject),
        ])
    }

    fn validate(&self, request: &Message) -> Message {
        let issuer = self.authority.issuer();
        let verdict = self
            .encoder
            .decode(&request.text())
            .and_then(|cert| self.authority.verify(&cert).map(|()| cert));
        match verdict {
            Ok(cert) => {
                debug!(subject = %cert.subject(), "certificate validated");
                Message::to(
                    MessageType::CertificateValidation,
                    VALID,
                    issuer,
                    &request.sender,
                )
            }
            Err(e) if e.is_decode_error() => {
                Message::error(e.reply_text(), issuer, &request.sender)
            }
            Err(_) => Message::to(
                MessageType::CertificateValidation,
                INVALID,
                issuer,
                &request.sender,
            ),
        }
    }

    fn key_reply(&self, recipient: &str) -> Message {
        Message::to(
            MessageType::KeyMessage,
            self.authority.public_key_der(),
            self.authority.issuer(),
            recipient,
        )
    }

    /// Run one CA session to completion.
    pub async fn serve_connection(self: Arc<Self>, stream: TcpStream, shutdown: CancellationToken) {
        let _guard = self.metrics.session("ca");
        let (mut reader, mut writer) = stream.into_split();
        let mut state = CaSessionState::AwaitingRequest;

        while state != CaSessionState::Closed {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = read_message(&mut reader, self.max_frame_bytes) => next,
            };
            let request = match next {
                Ok(Some(m)) => m,
                Ok(None) => {
                    debug!("peer closed CA connection");
                    break;
                }
                Err(e) => {
                    warn!("CA session read failed: {e}");
                    break;
                }
            };

            state = CaSessionState::Signing;
            trace!(?state, kind = ?request.kind, "request received");
            for reply in self.handle(&request) {
                if let Err(e) = write_message(&mut writer, &reply, self.max_frame_bytes).await {
                    warn!("CA session write failed: {e}");
                    state = CaSessionState::Closed;
                    break;
                }
            }
            if state != CaSessionState::Closed {
                state = CaSessionState::Replied;
                trace!(?state, "replies written");
                state = CaSessionState::AwaitingRequest;
            }
        }
    }

    /// Accept CA connections until `shutdown` fires.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let service = self.clone();
        let token = shutdown.clone();
        listener::serve(listener, "ca", shutdown, move |stream, _peer| {
            service.clone().serve_connection(stream, token.child_token())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certchat_core::pending::{pending_token, MemoryPendingStore};
    use certchat_crypto::{generate_key_pair, Certificate, SerialNumberGenerator};

    fn service() -> (CaService, Arc<MemoryPendingStore>) {
        let keys = generate_key_pair(1024).unwrap();
        let authority =
            CertificateAuthority::new("CA", keys, SerialNumberGenerator::starting_after(41))
                .unwrap();
        let pending = Arc::new(MemoryPendingStore::new());
        let service = CaService::new(
            Arc::new(authority),
            pending.clone(),
            ServerMetrics::default(),
            certchat_core::wire::DEFAULT_MAX_FRAME_BYTES,
        );
        (service, pending)
    }

    fn deposit(pending: &MemoryPendingStore, name: &str) -> Certificate {
        let keys = generate_key_pair(1024).unwrap();
        let request = Certificate::unsigned(name, keys.public_key_der().unwrap());
        let encoded = CertificateEncoder.encode(&request).unwrap();
        pending.deposit(&pending_token(name), &encoded).unwrap();
        request
    }

    fn sign_message(name: &str) -> Message {
        Message::to(MessageType::SignCertificate, pending_token(name), name, "CA")
    }

    #[test]
    fn signing_replies_with_certificate_then_key() {
        let (service, pending) = service();
        let request = deposit(&pending, "alice");

        let replies = service.handle(&sign_message("alice"));
        assert_eq!(replies.len(), 2);

        let cert_reply = &replies[0];
        assert_eq!(cert_reply.kind, MessageType::SignCertificate);
        assert_eq!(cert_reply.sender, "CA");
        assert_eq!(cert_reply.recipients, vec!["alice".to_string()]);
        let signed = CertificateEncoder.decode(&cert_reply.text()).unwrap();
        assert_eq!(signed.subject(), "alice");
        assert_eq!(signed.public_key(), request.public_key());
        assert_eq!(signed.serial_number(), Some(42));
        assert_eq!(signed.issuer(), Some("CA"));

        let key_reply = &replies[1];
        assert_eq!(key_reply.kind, MessageType::KeyMessage);
        assert_eq!(key_reply.payload, service.authority().public_key_der());
        certchat_crypto::verify_certificate_der(&signed, &key_reply.payload).unwrap();

        assert!(pending.is_empty());
        assert_eq!(service.metrics.certificates_issued.get(), 1);
    }

    #[test]
    fn missing_pending_certificate_is_error_reply() {
        let (service, _pending) = service();
        let replies = service.handle(&sign_message("ghost"));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, MessageType::Error);
        assert_eq!(replies[0].text(), "Not found: ghost.pem");
        assert_eq!(service.metrics.signing_failures.get(), 1);
    }

    #[test]
    fn corrupt_pending_certificate_is_error_reply() {
        let (service, pending) = service();
        pending.deposit("mallory.pem", "not a certificate").unwrap();
        let replies = service.handle(&sign_message("mallory"));
        assert_eq!(replies[0].kind, MessageType::Error);
        assert_eq!(replies[0].text(), "Invalid Certificate");
    }

    #[test]
    fn each_signing_consumes_one_serial() {
        let (service, pending) = service();
        let mut serials = Vec::new();
        for name in ["a", "b", "c"] {
            deposit(&pending, name);
            let replies = service.handle(&sign_message(name));
            let cert = CertificateEncoder.decode(&replies[0].text()).unwrap();
            serials.push(cert.serial_number().unwrap());
        }
        assert_eq!(serials, vec![42, 43, 44]);
    }

    #[test]
    fn validation_reports_valid_and_invalid() {
        let (service, pending) = service();
        deposit(&pending, "alice");
        let signed_text = service.handle(&sign_message("alice"))[0].text();

        let ask = |payload: String| {
            service.handle(&Message::to(
                MessageType::CertificateValidation,
                payload,
                "alice",
                "CA",
            ))
        };
        assert_eq!(ask(signed_text.clone())[0].text(), VALID);

        let unsigned = CertificateEncoder
            .encode(&Certificate::unsigned("eve", vec![1, 2, 3]))
            .unwrap();
        let reply = ask(unsigned);
        assert_eq!(reply[0].kind, MessageType::CertificateValidation);
        assert_eq!(reply[0].text(), INVALID);

        let reply = ask("garbage".into());
        assert_eq!(reply[0].kind, MessageType::Error);
        assert_eq!(reply[0].text(), "Invalid Certificate");
    }

    #[test]
    fn key_request_and_unsupported_request() {
        let (service, _pending) = service();
        let key = service.handle(&Message::to(MessageType::KeyMessage, "", "bob", "CA"));
        assert_eq!(key[0].payload, service.authority().public_key_der());
        assert_eq!(key[0].recipients, vec!["bob".to_string()]);

        let other = service.handle(&Message::to(MessageType::Login, "", "bob", "CA"));
        assert_eq!(other[0].kind, MessageType::Error);
        assert!(other[0].text().starts_with("Unsupported request"));
    }

    #[tokio::test]
    async fn session_answers_requests_until_peer_closes() {
        let (service, pending) = service();
        deposit(&pending, "alice");
        let service = Arc::new(service);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(service.clone().run(listener, shutdown.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut rd, mut wr) = stream.into_split();
        let max = certchat_core::wire::DEFAULT_MAX_FRAME_BYTES;

        write_message(&mut wr, &sign_message("alice"), max).await.unwrap();
        let first = read_message(&mut rd, max).await.unwrap().unwrap();
        let second = read_message(&mut rd, max).await.unwrap().unwrap();
        assert_eq!(first.kind, MessageType::SignCertificate);
        assert_eq!(second.kind, MessageType::KeyMessage);

        // Same connection, next request.
        write_message(&mut wr, &sign_message("alice"), max).await.unwrap();
        let again = read_message(&mut rd, max).await.unwrap().unwrap();
        assert_eq!(again.kind, MessageType::Error);

        shutdown.cancel();
        server.await.unwrap();
    }
}

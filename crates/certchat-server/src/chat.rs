//! Chat relay sessions.
//!
//! Each connection runs a reader loop (this session) and a writer task that
//! drains the connection's outbox. Replies, routed messages and presence
//! broadcasts all go through the outbox, so frames to one connection never
//! interleave and arrive in the order they were queued.
//!
//! Session states: `Connected -> Registered -> LoggedIn -> Closed`.

use std::sync::Arc;

use openssl::pkey::{PKey, Public};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certchat_core::types::{RECIPIENT_SEPARATOR, SERVER_SENDER, SUCCESS};
use certchat_core::wire::{read_message, write_message};
use certchat_core::{CertChatError, CertChatResult, Message, MessageType};
use certchat_crypto::{verify_certificate, CertificateEncoder};

use crate::listener;
use crate::metrics::ServerMetrics;
use crate::registry::{Outbox, Peers, Registry, User};

/// Smallest outbox: a login queues two replies inside the registry lock.
const MIN_OUTBOUND_QUEUE: usize = 4;

pub struct ChatService {
    registry: Arc<Registry>,
    ca_public_key: Option<PKey<Public>>,
    metrics: ServerMetrics,
    outbound_queue: usize,
    max_frame_bytes: usize,
    encoder: CertificateEncoder,
}

impl ChatService {
    pub fn new(
        registry: Arc<Registry>,
        metrics: ServerMetrics,
        outbound_queue: usize,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            registry,
            ca_public_key: None,
            metrics,
            outbound_queue: outbound_queue.max(MIN_OUTBOUND_QUEUE),
            max_frame_bytes,
            encoder: CertificateEncoder,
        }
    }

    /// Reject login certificates that do not carry this CA's signature.
    pub fn with_ca_public_key(mut self, key: PKey<Public>) -> Self {
        self.ca_public_key = Some(key);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start a session whose replies go to `outbox`.
    pub fn session(self: &Arc<Self>, outbox: Outbox) -> ChatSession {
        ChatSession {
            service: self.clone(),
            outbox,
            state: SessionState::Connected,
        }
    }

    /// Run one chat connection to completion.
    pub async fn serve_connection(self: Arc<Self>, stream: TcpStream, shutdown: CancellationToken) {
        let _guard = self.metrics.session("chat");
        let (mut reader, writer) = stream.into_split();
        let (outbox, inbox) = mpsc::channel(self.outbound_queue);
        let writer_task = tokio::spawn(drain_outbox(
            writer,
            inbox,
            self.max_frame_bytes,
            shutdown.clone(),
        ));

        let mut session = self.session(outbox);
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = read_message(&mut reader, self.max_frame_bytes) => next,
            };
            match next {
                Ok(Some(message)) => {
                    if let Flow::Close = session.dispatch(message).await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("peer closed chat connection");
                    break;
                }
                Err(e) => {
                    warn!("chat session read failed: {e}");
                    break;
                }
            }
        }

        session.close().await;
        // Last local sender gone: the writer flushes what is queued and exits.
        drop(session);
        if let Err(e) = writer_task.await {
            warn!("chat writer task failed: {e}");
        }
    }

    /// Accept chat connections until `shutdown` fires.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let service = self.clone();
        let token = shutdown.clone();
        listener::serve(listener, "chat", shutdown, move |stream, _peer| {
            service.clone().serve_connection(stream, token.child_token())
        })
        .await
    }
}

async fn drain_outbox(
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::Receiver<Message>,
    max_frame_bytes: usize,
    connection: CancellationToken,
) {
    while let Some(message) = inbox.recv().await {
        if let Err(e) = write_message(&mut writer, &message, max_frame_bytes).await {
            warn!("chat session write failed: {e}");
            connection.cancel();
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered(String),
    LoggedIn(String),
    Closed,
}

impl SessionState {
    fn name(&self) -> Option<&str> {
        match self {
            SessionState::Registered(n) | SessionState::LoggedIn(n) => Some(n),
            SessionState::Connected | SessionState::Closed => None,
        }
    }
}

/// Whether the connection stays open after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct ChatSession {
    service: Arc<ChatService>,
    outbox: Outbox,
    state: SessionState,
}

impl ChatSession {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Handle one inbound message. Failures are answered with `ERROR`.
    pub async fn dispatch(&mut self, message: Message) -> Flow {
        let reply_to = message.sender.clone();
        let result = match message.kind {
            MessageType::Register => self.register(&message).await,
            MessageType::Login => self.login(&message).await,
            MessageType::UserMessage => self.route(message).await,
            MessageType::Logout => self.logout(&message).await,
            other => Err(CertChatError::UnsupportedRequest(other)),
        };
        match result {
            Ok(flow) => flow,
            Err(e) => {
                debug!(state = ?self.state, "request rejected: {e}");
                self.reply(Message::error(e.reply_text(), SERVER_SENDER, reply_to))
                    .await;
                Flow::Continue
            }
        }
    }

    async fn register(&mut self, message: &Message) -> CertChatResult<Flow> {
        let name = message.text().trim().to_string();
        if let Some(current) = self.state.name() {
            return Err(CertChatError::DuplicateName(current.to_string()));
        }
        self.service.registry.register(&name)?;
        info!(user = %name, "name registered");
        self.state = SessionState::Registered(name);
        self.reply(Message::to(
            MessageType::Register,
            SUCCESS,
            SERVER_SENDER,
            &message.sender,
        ))
        .await;
        Ok(Flow::Continue)
    }

    async fn login(&mut self, message: &Message) -> CertChatResult<Flow> {
        let service = self.service.clone();
        let encoded = message.text().trim().to_string();
        let certificate = service.encoder.decode(&encoded)?;
        let checked = match &service.ca_public_key {
            Some(key) => verify_certificate(&certificate, key),
            None if certificate.is_signed() => Ok(()),
            None => Err(CertChatError::SignatureMismatch),
        };
        if let Err(e) = checked {
            service.metrics.login_failures.inc();
            return Err(e);
        }

        let subject = certificate.subject().to_string();
        // Only the connection that registered the subject may log it in, so a
        // reservation cannot be taken over by whoever else holds the certificate.
        match &self.state {
            SessionState::Registered(name) if *name == subject => {}
            SessionState::LoggedIn(name) => {
                service.metrics.login_failures.inc();
                return Err(CertChatError::DuplicateName(name.clone()));
            }
            _ => {
                service.metrics.login_failures.inc();
                return Err(CertChatError::NotRegistered(subject));
            }
        }

        let user = User {
            name: subject.clone(),
            outbox: self.outbox.clone(),
            certificate: encoded.clone(),
        };
        let reply_to = message.sender.clone();
        let outbox = self.outbox.clone();
        let greeted = service.registry.login(user, |roster| {
            let joined = roster.join(&RECIPIENT_SEPARATOR.to_string());
            for reply in [
                Message::to(MessageType::Login, SUCCESS, SERVER_SENDER, &reply_to),
                Message::to(MessageType::LoggedUsers, joined, SERVER_SENDER, &reply_to),
            ] {
                outbox
                    .try_send(reply)
                    .map_err(|e| CertChatError::Protocol(format!("outbox unavailable: {e}")))?;
            }
            Ok(())
        });
        let peers = match greeted {
            Ok(peers) => peers,
            Err(e) => {
                service.metrics.login_failures.inc();
                return Err(e);
            }
        };

        service.metrics.logins.inc();
        info!(user = %subject, peers = peers.len(), "user logged in");
        self.state = SessionState::LoggedIn(subject.clone());
        broadcast(
            &peers,
            MessageType::UserLogin,
            encoded.as_bytes(),
            &subject,
            &service.metrics,
        );
        Ok(Flow::Continue)
    }

    async fn route(&mut self, message: Message) -> CertChatResult<Flow> {
        match &self.state {
            SessionState::LoggedIn(name) if *name == message.sender => {}
            _ => return Err(CertChatError::NotLoggedIn),
        }

        let names = message.recipient_names();
        let (found, missing) = self
            .service
            .registry
            .resolve(names.iter().map(String::as_str));

        let metrics = &self.service.metrics;
        for name in missing {
            metrics.messages_dropped.inc();
            debug!(from = %message.sender, to = %name, "recipient not logged in, message dropped");
        }
        for (name, outbox) in found {
            match outbox.try_send(message.clone()) {
                Ok(()) => {
                    metrics.messages_routed.inc();
                }
                Err(e) => {
                    metrics.messages_dropped.inc();
                    debug!(to = %name, "message dropped: {}", drop_reason(&e));
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn logout(&mut self, message: &Message) -> CertChatResult<Flow> {
        let name = message.text().trim().to_string();
        if self.state.name() != Some(name.as_str()) {
            return Err(CertChatError::NotLoggedIn);
        }
        self.leave().await;
        info!(user = %name, "user logged out");
        Ok(Flow::Close)
    }

    /// Release whatever this session holds in the registry.
    ///
    /// Called on explicit logout and on disconnect; a second call is a no-op.
    pub async fn close(&mut self) {
        if let Some(name) = self.state.name() {
            debug!(user = %name, "releasing session");
        }
        self.leave().await;
    }

    async fn leave(&mut self) {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::LoggedIn(name) => {
                if let Some(peers) = self.service.registry.logout(&name) {
                    broadcast(
                        &peers,
                        MessageType::UserLogout,
                        name.as_bytes(),
                        &name,
                        &self.service.metrics,
                    );
                }
            }
            SessionState::Registered(name) => {
                self.service.registry.release(&name);
            }
            SessionState::Connected | SessionState::Closed => {}
        }
    }

    async fn reply(&self, message: Message) {
        if self.outbox.send(message).await.is_err() {
            debug!("reply dropped: connection writer gone");
        }
    }
}

/// Best-effort delivery of one presence message to each peer.
///
/// Never waits on a peer: a full or closed outbox loses the message.
fn broadcast(
    peers: &Peers,
    kind: MessageType,
    payload: &[u8],
    sender: &str,
    metrics: &ServerMetrics,
) {
    for (name, outbox) in peers {
        let message = Message::to(kind, payload, sender, name);
        if let Err(e) = outbox.try_send(message) {
            metrics.messages_dropped.inc();
            debug!(to = %name, kind = ?kind, "broadcast skipped: {}", drop_reason(&e));
        }
    }
}

fn drop_reason<T>(err: &TrySendError<T>) -> &'static str {
    match err {
        TrySendError::Full(_) => "recipient outbox full",
        TrySendError::Closed(_) => "recipient connection closing",
    }
}

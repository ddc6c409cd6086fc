//! Client side of the chat service.

use tokio::net::ToSocketAddrs;
use tracing::{debug, info, warn};

use certchat_core::types::{SERVER_SENDER, SUCCESS};
use certchat_core::{Message, MessageType};

use crate::error::{ClientError, ClientResult};
use crate::identity::Credentials;
use crate::link::Link;
use crate::recipients::{parse_line, Outgoing};
use crate::trust::PeerDirectory;

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A directed message. `trusted` is false when the sender is not (or no
    /// longer) in the local peer view.
    Message {
        from: String,
        body: String,
        trusted: bool,
    },
    /// A peer's certificate verified and it joined the local view.
    PeerJoined(String),
    PeerLeft(String),
    /// An announced certificate failed verification and was discarded.
    PeerRejected { reason: String },
    ServerError(String),
}

#[derive(Debug)]
pub struct ChatClient {
    link: Link,
    name: Option<String>,
    peers: Option<PeerDirectory>,
}

impl ChatClient {
    pub async fn connect(addr: impl ToSocketAddrs, max_frame_bytes: usize) -> ClientResult<Self> {
        Ok(Self {
            link: Link::connect(addr, max_frame_bytes).await?,
            name: None,
            peers: None,
        })
    }

    /// Logged-in name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn peers(&self) -> Option<&PeerDirectory> {
        self.peers.as_ref()
    }

    /// Reserve `name` on the server.
    pub async fn register(&mut self, name: &str) -> ClientResult<()> {
        self.link
            .send(&Message::to(MessageType::Register, name, name, SERVER_SENDER))
            .await?;
        let reply = self.link.recv().await?;
        match reply.kind {
            MessageType::Register if reply.text() == SUCCESS => Ok(()),
            MessageType::Error => Err(ClientError::Rejected(reply.text())),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Present our signed certificate.
    ///
    /// On success the `LOGGED_USERS` roster is verified entry by entry; the
    /// returned events say who was admitted and what was discarded.
    pub async fn login(&mut self, credentials: &Credentials) -> ClientResult<Vec<ClientEvent>> {
        let name = credentials.certificate().subject().to_string();
        self.link
            .send(&Message::to(
                MessageType::Login,
                credentials.encoded(),
                name.as_str(),
                SERVER_SENDER,
            ))
            .await?;

        let reply = self.link.recv().await?;
        match reply.kind {
            MessageType::Login if reply.text() == SUCCESS => {}
            MessageType::Error => return Err(ClientError::Rejected(reply.text())),
            other => return Err(ClientError::UnexpectedReply(other)),
        }
        let roster = self.link.recv().await?;
        if roster.kind != MessageType::LoggedUsers {
            return Err(ClientError::UnexpectedReply(roster.kind));
        }

        let mut peers = PeerDirectory::new(credentials.ca_public_key().clone(), name.as_str());
        let (admitted, rejected) = peers.admit_roster(&roster.text());
        info!(user = %name, peers = admitted.len(), rejected = rejected.len(), "logged in");

        self.name = Some(name);
        self.peers = Some(peers);
        Ok(admitted
            .into_iter()
            .map(ClientEvent::PeerJoined)
            .chain(rejected.into_iter().map(|e| ClientEvent::PeerRejected {
                reason: e.to_string(),
            }))
            .collect())
    }

    /// Parse `line` for `@name` recipients and send the rest as the body.
    ///
    /// Nothing is sent when the line names no recipient.
    pub async fn send_line(&mut self, line: &str) -> ClientResult<Outgoing> {
        let name = self.name.clone().ok_or(ClientError::NotLoggedIn)?;
        let outgoing = parse_line(line)?;
        self.link
            .send(&Message::new(
                MessageType::UserMessage,
                outgoing.body.as_str(),
                name,
                outgoing.recipients.clone(),
            ))
            .await?;
        Ok(outgoing)
    }

    /// Wait for the next event. `None` once the server closed the connection.
    pub async fn next_event(&mut self) -> ClientResult<Option<ClientEvent>> {
        loop {
            let Some(message) = self.link.next().await? else {
                return Ok(None);
            };
            if let Some(event) = self.interpret(message) {
                return Ok(Some(event));
            }
        }
    }

    fn interpret(&mut self, message: Message) -> Option<ClientEvent> {
        match message.kind {
            MessageType::UserMessage => {
                let trusted = self
                    .peers
                    .as_ref()
                    .is_some_and(|p| p.contains(&message.sender));
                Some(ClientEvent::Message {
                    body: message.text(),
                    from: message.sender,
                    trusted,
                })
            }
            MessageType::UserLogin => {
                let peers = self.peers.as_mut()?;
                match peers.admit(&message.text()) {
                    Ok(cert) => Some(ClientEvent::PeerJoined(cert.subject().to_string())),
                    Err(e) => {
                        warn!(announced_by = %message.sender, "discarding peer announcement: {e}");
                        Some(ClientEvent::PeerRejected {
                            reason: e.to_string(),
                        })
                    }
                }
            }
            MessageType::UserLogout => {
                let name = message.text();
                self.peers.as_mut()?.remove(&name)?;
                Some(ClientEvent::PeerLeft(name))
            }
            MessageType::Error => Some(ClientEvent::ServerError(message.text())),
            other => {
                debug!(kind = ?other, "ignoring unexpected message");
                None
            }
        }
    }

    /// Leave the chat. The server closes the connection afterwards.
    pub async fn logout(mut self) -> ClientResult<()> {
        let name = self.name.take().ok_or(ClientError::NotLoggedIn)?;
        self.link
            .send(&Message::to(MessageType::Logout, name.as_str(), name.as_str(), SERVER_SENDER))
            .await?;
        self.link.shutdown().await
    }
}

use serde::{Deserialize, Serialize};

/// Separator between names when several recipients share one field.
pub const RECIPIENT_SEPARATOR: char = ',';

/// Sender name used on replies produced by the chat service.
pub const SERVER_SENDER: &str = "Server";

/// Payload of a successful REGISTER / LOGIN reply.
pub const SUCCESS: &str = "Success";

/// `CERTIFICATE_VALIDATION` verdicts.
pub const VALID: &str = "Valid";
pub const INVALID: &str = "Invalid";

/// Longest accepted user name
pub const MAX_NAME_LEN: usize = 32;

/// Names are 1..=32 characters of `[A-Za-z0-9_]`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Wire discriminator carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Directed chat message between users
    UserMessage,
    /// Ask the CA whether a certificate carries its signature
    CertificateValidation,
    /// Request (token) or reply (signed certificate) of a CA signing
    SignCertificate,
    /// Reserve a name on the chat service
    Register,
    /// Present a signed certificate to the chat service
    Login,
    /// Leave the chat service
    Logout,
    /// Failure reply; payload is the reason
    Error,
    /// Encoded certificates of every other logged-in user
    LoggedUsers,
    /// Presence broadcast: a user logged in (payload = encoded certificate)
    UserLogin,
    /// Presence broadcast: a user left (payload = name)
    UserLogout,
    /// CA public key (payload = DER SubjectPublicKeyInfo)
    KeyMessage,
}

/// Envelope exchanged in both directions on the CA and chat connections.
///
/// Immutable once built; sessions construct a fresh value per reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageType,
    #[serde(with = "crate::b64")]
    pub payload: Vec<u8>,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl Message {
    pub fn new(
        kind: MessageType,
        payload: impl Into<Vec<u8>>,
        sender: impl Into<String>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            kind,
            payload: payload.into(),
            sender: sender.into(),
            recipients,
        }
    }

    /// Message addressed to a single recipient.
    pub fn to(
        kind: MessageType,
        payload: impl Into<Vec<u8>>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self::new(kind, payload, sender, vec![recipient.into()])
    }

    /// `ERROR` reply carrying `reason`.
    pub fn error(reason: impl Into<String>, sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self::to(MessageType::Error, reason.into().into_bytes(), sender, recipient)
    }

    /// Payload interpreted as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Individual recipient names, in order, without duplicates.
    ///
    /// Every entry of `recipients` may itself be a separator-joined list.
    pub fn recipient_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in &self.recipients {
            for name in entry.split(RECIPIENT_SEPARATOR) {
                let name = name.trim();
                if !name.is_empty() && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }
}

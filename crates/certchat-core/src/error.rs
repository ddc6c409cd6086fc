use thiserror::Error;

use crate::types::MessageType;

pub type CertChatResult<T> = Result<T, CertChatError>;

#[derive(Debug, Error)]
pub enum CertChatError {
    #[error("malformed certificate envelope: missing header or footer")]
    MalformedEnvelope,

    #[error("certificate decode failure: {0}")]
    DecodeFailure(String),

    #[error("pending certificate not found: {0}")]
    NotFound(String),

    #[error("name already taken: {0}")]
    DuplicateName(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("certificate signature does not verify")]
    SignatureMismatch,

    #[error("name is not registered: {0}")]
    NotRegistered(String),

    #[error("session is not logged in")]
    NotLoggedIn,

    #[error("unsupported request: {0:?}")]
    UnsupportedRequest(MessageType),

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CertChatError {
    /// Reason text carried by the `ERROR` reply for this failure.
    pub fn reply_text(&self) -> String {
        match self {
            CertChatError::DuplicateName(_)
            | CertChatError::NotRegistered(_)
            | CertChatError::NotLoggedIn => "Failed".into(),
            CertChatError::MalformedEnvelope
            | CertChatError::DecodeFailure(_)
            | CertChatError::SignatureMismatch => "Invalid Certificate".into(),
            CertChatError::InvalidName(_) => "Invalid name".into(),
            CertChatError::NotFound(token) => format!("Not found: {token}"),
            CertChatError::UnsupportedRequest(kind) => format!("Unsupported request: {kind:?}"),
            other => other.to_string(),
        }
    }

    /// Certificate text that could not be turned back into a certificate.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            CertChatError::MalformedEnvelope | CertChatError::DecodeFailure(_)
        )
    }
}

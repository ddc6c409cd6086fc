use thiserror::Error;

use certchat_core::{CertChatError, MessageType};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("message has no @recipient")]
    NoRecipients,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("server refused: {0}")]
    Rejected(String),

    #[error("unexpected {0:?} reply")]
    UnexpectedReply(MessageType),

    #[error("connection closed by peer")]
    Closed,

    #[error(transparent)]
    Core(#[from] CertChatError),
}

pub mod b64;
pub mod config;
pub mod error;
pub mod pending;
pub mod types;
pub mod wire;

pub use error::{CertChatError, CertChatResult};
pub use types::{Message, MessageType};

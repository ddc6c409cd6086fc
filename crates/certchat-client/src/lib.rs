//! certchat-client: everything a chat participant needs.
//!
//! 1. [`Identity::generate`] a keypair for a nickname.
//! 2. [`CaClient::sign`] deposits the unsigned certificate and returns
//!    [`Credentials`]: the signed certificate plus the CA public key.
//! 3. [`ChatClient`] registers, logs in with those credentials and turns
//!    inbound traffic into [`ClientEvent`]s. Peer announcements are admitted
//!    into the [`PeerDirectory`] only if they verify under the CA key.

pub mod ca_client;
pub mod chat_client;
pub mod error;
pub mod identity;
mod link;
pub mod recipients;
pub mod trust;

pub use ca_client::CaClient;
pub use chat_client::{ChatClient, ClientEvent};
pub use error::{ClientError, ClientResult};
pub use identity::{Credentials, Identity};
pub use recipients::{parse_line, Outgoing};
pub use trust::PeerDirectory;

//! certchat-server: the two network services of a certchat deployment.
//!
//! - [`ca`]: one session per connection; takes a deposited signing request,
//!   issues the certificate and replies with it plus the CA public key.
//! - [`chat`]: one session per connection over a shared [`registry::Registry`];
//!   register, certificate-gated login, directed routing, presence broadcast.
//!
//! Both services run behind [`listener::serve`], a single accept loop that
//! spawns a task per connection and stops on cancellation.

pub mod ca;
pub mod chat;
pub mod listener;
pub mod metrics;
pub mod registry;

pub use ca::CaService;
pub use chat::ChatService;
pub use metrics::ServerMetrics;
pub use registry::Registry;

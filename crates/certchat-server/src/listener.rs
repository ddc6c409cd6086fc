//! Accept loop shared by the CA and chat services.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

/// Accept connections on `listener` until `shutdown` fires, spawning
/// `handle(stream, peer)` as its own task for each one.
///
/// The loop itself never reads from a connection. Accept errors are logged
/// and the loop keeps going.
pub async fn serve<F, Fut>(
    listener: TcpListener,
    service: &'static str,
    shutdown: CancellationToken,
    handle: F,
) where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(service, addr = %addr, "listening");
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(service, "accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let span = tracing::info_span!("session", service, peer = %peer);
                    tokio::spawn(handle(stream, peer).instrument(span));
                }
                Err(e) => warn!(service, "accept failed: {e}"),
            }
        }
    }
}

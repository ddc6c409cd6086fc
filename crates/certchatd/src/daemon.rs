//! Daemon lifecycle: CA key, listeners, metrics endpoint, signal-driven shutdown

use anyhow::{Context, Result};
use openssl::pkey::{PKey, Public};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certchat_core::config::{CaConfig, CertChatConfig};
use certchat_core::pending::DirPendingStore;
use certchat_crypto::rsa::{generate_key_pair, public_key_from_pem, public_key_to_pem};
use certchat_crypto::{CertificateAuthority, KeyPair, SerialNumberGenerator};
use certchat_server::{CaService, ChatService, Registry, ServerMetrics};

use crate::metrics::HealthState;
use crate::Mode;

pub async fn run(config: CertChatConfig, mode: Mode) -> Result<()> {
    info!("daemon starting");
    let shutdown = CancellationToken::new();

    // ── Metrics ──────────────────────────────────────────────────────────
    let mut prom = prometheus_client::registry::Registry::default();
    let metrics = ServerMetrics::new(&mut prom);
    let ready = Arc::new(AtomicBool::new(false));

    let metrics_task = config.daemon.metrics_addr.clone().map(|addr| {
        let state = HealthState {
            registry: Arc::new(prom),
            ready: ready.clone(),
        };
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state, token).await {
                error!("metrics server failed: {e}");
            }
        })
    });

    let mut services = Vec::new();

    // ── CA ───────────────────────────────────────────────────────────────
    let authority = if mode.runs_ca() {
        let authority = Arc::new(load_or_generate_authority(&config.ca)?);
        let pending = DirPendingStore::open(&config.ca.pending_dir).with_context(|| {
            format!("opening pending dir {}", config.ca.pending_dir.display())
        })?;
        info!(pending_dir = %pending.dir().display(), issuer = %authority.issuer(), "CA ready");

        let listener = TcpListener::bind(&config.ca.listen)
            .await
            .with_context(|| format!("CA bind {}", config.ca.listen))?;
        let service = Arc::new(CaService::new(
            authority.clone(),
            Arc::new(pending),
            metrics.clone(),
            config.wire.max_frame_bytes,
        ));
        services.push(tokio::spawn(service.run(listener, shutdown.clone())));
        Some(authority)
    } else {
        None
    };

    // ── Chat relay ───────────────────────────────────────────────────────
    if mode.runs_chat() {
        let ca_key = relay_ca_key(authority.as_deref(), config.chat.ca_public_key.as_deref())?;
        let service = ChatService::new(
            Arc::new(Registry::new()),
            metrics.clone(),
            config.chat.outbound_queue,
            config.wire.max_frame_bytes,
        )
        .with_ca_public_key(ca_key);

        let listener = TcpListener::bind(&config.chat.listen)
            .await
            .with_context(|| format!("chat bind {}", config.chat.listen))?;
        services.push(tokio::spawn(Arc::new(service).run(listener, shutdown.clone())));
    }

    ready.store(true, Ordering::Release);
    notify_ready();

    wait_for_signal().await?;
    shutdown.cancel();

    for service in services {
        if let Err(e) = service.await {
            warn!("service task ended abnormally: {e}");
        }
    }
    if let Some(task) = metrics_task {
        let _ = task.await;
    }

    info!("daemon exiting cleanly");
    Ok(())
}

/// Load the CA key from `key_file`, or generate one (and save it there when
/// a path is configured).
pub fn load_or_generate_authority(config: &CaConfig) -> Result<CertificateAuthority> {
    let keys = match &config.key_file {
        Some(path) if path.exists() => {
            let pem = std::fs::read(path)
                .with_context(|| format!("reading CA key {}", path.display()))?;
            let keys = KeyPair::from_private_pem(&pem)
                .with_context(|| format!("parsing CA key {}", path.display()))?;
            info!(path = %path.display(), "CA key loaded");
            keys
        }
        Some(path) => {
            let keys = generate_key_pair(config.key_bits)?;
            save_key(path, &keys)?;
            info!(path = %path.display(), bits = config.key_bits, "CA key generated and saved");
            keys
        }
        None => {
            warn!(bits = config.key_bits, "no ca.key_file configured: CA key is ephemeral");
            generate_key_pair(config.key_bits)?
        }
    };

    Ok(CertificateAuthority::new(
        config.issuer.clone(),
        keys,
        SerialNumberGenerator::new(),
    )?)
}

/// Key the relay checks login certificates against: the in-process CA's,
/// otherwise the PEM at `chat.ca_public_key`.
fn relay_ca_key(
    authority: Option<&CertificateAuthority>,
    path: Option<&Path>,
) -> Result<PKey<Public>> {
    if let Some(authority) = authority {
        return Ok(authority.public_key().clone());
    }
    let Some(path) = path else {
        anyhow::bail!("chat mode needs chat.ca_public_key to verify login certificates");
    };
    let pem = std::fs::read(path)
        .with_context(|| format!("reading CA public key {}", path.display()))?;
    let key = public_key_from_pem(&pem)
        .with_context(|| format!("parsing CA public key {}", path.display()))?;
    info!(path = %path.display(), "login certificates verified against CA key");
    Ok(key)
}

/// Private key at `path` (mode 0600), public key beside it as `<stem>.pub.pem`.
fn save_key(path: &Path, keys: &KeyPair) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("creating CA key {}", path.display()))?;
    file.write_all(&keys.private_key_pem()?)?;

    let public_path = path.with_extension("pub.pem");
    std::fs::write(&public_path, public_key_to_pem(keys.public_key())?)
        .with_context(|| format!("writing CA public key {}", public_path.display()))?;
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}

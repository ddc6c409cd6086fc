//! certchatd: certificate authority and chat relay daemon
//!
//! Usage:
//!   certchatd [--config /etc/certchat/config.toml] [--mode all|ca|chat]
//!
//! Modes:
//!   all   - CA and chat relay in one process; the relay trusts the in-process CA [default]
//!   ca    - CA signing service only
//!   chat  - chat relay only (set chat.ca_public_key to verify logins)

mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::Path;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "certchatd", version, about = "certchat CA and chat relay daemon")]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "CERTCHAT_CONFIG",
        default_value = "/etc/certchat/config.toml"
    )]
    config: PathBuf,

    /// Which services to run
    #[arg(long, default_value = "all")]
    mode: Mode,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long, env = "CERTCHAT_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides config
    #[arg(long, env = "CERTCHAT_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum Mode {
    /// CA and chat relay
    All,
    /// CA signing service only
    Ca,
    /// Chat relay only
    Chat,
}

impl Mode {
    pub fn runs_ca(self) -> bool {
        matches!(self, Mode::All | Mode::Ca)
    }

    pub fn runs_chat(self) -> bool {
        matches!(self, Mode::All | Mode::Chat)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first: it supplies the logging defaults the flags override.
    let config = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.daemon.log_format));
    init_logging(&level, format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?cli.mode,
        config = %cli.config.display(),
        "certchatd starting"
    );

    daemon::run(config, cli.mode).await
}

fn load_config(path: &Path) -> Result<certchat_core::config::CertChatConfig> {
    if !path.exists() {
        // Logging is not up yet; the warning goes to stderr directly.
        eprintln!("config file not found: {}  (using defaults)", path.display());
        return Ok(certchat_core::config::CertChatConfig::default());
    }
    Ok(certchat_core::config::CertChatConfig::load(path)?)
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

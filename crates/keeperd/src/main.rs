//! keeperd: Keeper secret vault daemon
//!
//! Usage:
//!   keeperd [--config /etc/keeper/keeper.toml] [--listen 0.0.0.0:28000]

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use keeper_core::config::KeeperConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "keeperd", version, about = "Keeper secret vault daemon")]
struct Cli {
    /// Path to keeper.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "KEEPER_CONFIG",
        default_value = "/etc/keeper/keeper.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "KEEPER_LOG")]
    log: Option<String>,

    /// Log format; overrides daemon.log_format
    #[arg(long, env = "KEEPER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// gRPC listen address; overrides daemon.listen
    #[arg(long, env = "KEEPER_LISTEN")]
    listen: Option<String>,

    /// sqlx database URL; overrides storage.database_url
    #[arg(long, env = "KEEPER_DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is read before logging exists so it can pick the log level.
    let (mut config, found) = load_config(&cli.config).await?;
    if let Some(listen) = cli.listen.clone() {
        config.daemon.listen = listen;
    }
    if let Some(url) = cli.database_url.clone() {
        config.storage.database_url = url;
    }

    let level = cli.log.clone().unwrap_or_else(|| config.daemon.log_level.clone());
    let format = match cli.log_format.clone() {
        Some(format) => format,
        None if config.daemon.log_format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "keeperd starting"
    );
    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    keeperd::daemon::run(config).await
}

/// Returns the parsed config and whether the file existed.
async fn load_config(path: &Path) -> Result<(KeeperConfig, bool)> {
    if !path.exists() {
        return Ok((KeeperConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = KeeperConfig::from_toml(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok((config, true))
}

fn init_logging(level: &str, format: &LogFormat) {
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

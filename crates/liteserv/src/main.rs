//! LiteServ supervisor
//!
//! Starts one LiteServ, keeps it running until Ctrl-C, then stops it.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use testkit_common::ServerSpec;
use testkit_liteserv::{Capabilities, HarnessConfig, TestServerFactory};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "liteserv-supervisor")]
#[command(about = "Download, start and supervise a LiteServ test server")]
#[command(version)]
struct Cli {
    /// Harness configuration file
    #[arg(short, long, default_value = "liteserv.toml")]
    config: PathBuf,

    /// Target platform (local_macos, local_dotnet, android, ios, windows_remote)
    #[arg(short, long)]
    platform: String,

    /// `<version>-<build>` to run, e.g. 1.3.1-6
    #[arg(short = 'v', long)]
    version_build: String,

    /// Host the server listens on
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port the server listens on
    #[arg(long, default_value = "59840")]
    port: u16,

    /// Storage engine (SQLite, SQLCipher, ForestDB, ForestDB+Encryption)
    #[arg(short, long, default_value = "SQLite")]
    storage_engine: String,

    /// Serve the management endpoint over TLS
    #[arg(long)]
    ssl: bool,

    /// Server log file. Defaults to a timestamped file under the results directory.
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("LiteServ supervisor v{}", env!("CARGO_PKG_VERSION"));

    let config = HarnessConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let log_path = cli.log.clone().unwrap_or_else(|| {
        config.results_dir.join("logs").join(format!(
            "{}-{}-{}.txt",
            cli.platform,
            cli.version_build,
            chrono::Utc::now().format("%Y-%m-%d-%H-%M-%S")
        ))
    });

    let spec = ServerSpec::new(&cli.platform, &cli.version_build, &cli.host, cli.port)
        .with_storage_engine(&cli.storage_engine)
        .with_ssl(cli.ssl);

    let capabilities = Capabilities::from_config(&config)?;
    let factory = TestServerFactory::new(config, capabilities);
    let mut supervisor = factory.supervisor(&spec)?;

    let url = supervisor.start(&log_path).await?;
    info!("LiteServ running at {} (log: {})", url, log_path.display());
    info!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    if let Err(e) = supervisor.stop().await {
        error!("Failed to stop LiteServ: {}", e);
        return Err(e.into());
    }

    info!("Supervisor shutdown complete");
    Ok(())
}

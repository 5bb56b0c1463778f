use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use throttler::config::Config;
use throttler::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

#[derive(Debug, Parser)]
#[command(name = "throttler", version, about = "Demo server behind the request throttling middleware")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "THROTTLER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address
    #[arg(long, env = "THROTTLER_BIND_ADDR")]
    bind_addr: Option<SocketAddr>,

    /// Override the request threshold (-1 for unlimited)
    #[arg(long, env = "THROTTLER_THRESHOLD", allow_negative_numbers = true)]
    threshold: Option<i64>,

    /// Override the log level
    #[arg(long, env = "THROTTLER_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("throttler={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting throttler demo server");
    tracing::info!(
        "Configuration: bind_addr={}, threshold={}, overrides={}",
        config.bind_addr,
        config.threshold,
        config.range_overrides.len()
    );

    let server = Server::new(config).context("Failed to create server")?;
    server.run().await.context("Server error")?;

    Ok(())
}

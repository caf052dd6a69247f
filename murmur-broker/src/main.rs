use anyhow::Context;
use clap::Parser;
use murmur_broker::config::parse_peer_list;
use murmur_broker::{Broker, BrokerConfig};
use murmur_core::telemetry::{init_logging, LogFormat};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "murmur-broker")]
#[command(about = "Replicated topic pub/sub broker")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host this broker is known by
    #[arg(long)]
    host: Option<String>,

    /// Listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Cluster member as host:port; repeat or comma-separate
    #[arg(long = "peer", value_delimiter = ',')]
    peers: Vec<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<BrokerConfig> {
        let mut config = match &self.config {
            Some(path) => BrokerConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => BrokerConfig::default(),
        };
        config.apply_env()?;

        if let Some(host) = self.host {
            config.node.host = host;
        }
        if let Some(port) = self.port {
            config.node.port = port;
        }
        if !self.peers.is_empty() {
            config.cluster.peers = parse_peer_list(&self.peers.join(","))?;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.log_json {
            config.logging.format = LogFormat::Json;
        }
        config.validate_config()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.logging)?;

    let handle = Broker::new(config)?.start().await?;
    info!(identity = %handle.identity(), address = %handle.local_addr(), "murmur broker running");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    handle.shutdown().await;
    Ok(())
}

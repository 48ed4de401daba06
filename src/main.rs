use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gridcast::client::DispatchClient;
use gridcast::config::RegistryConfig;
use gridcast::directory::StaticDirectory;
use gridcast::node::{shutdown_token, RegistryNode};
use gridcast::registry::ServiceRegistry;
use gridcast::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "gridcast")]
#[command(about = "A distributed service registry and job dispatcher")]
struct Args {
    /// Base URL under which this node is reachable
    #[arg(long, default_value = "http://localhost:8080")]
    host_url: String,

    /// Port for the status dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Registry properties, repeatable (format: "key=value")
    /// Example: --set dispatch.interval=2000 --set heartbeat.interval=30
    #[arg(long = "set", value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

fn parse_properties(pairs: &[String]) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => {
                properties.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                tracing::warn!(property = %pair, "Invalid property, expected key=value");
            }
        }
    }
    properties
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut properties = parse_properties(&args.properties);
    properties
        .entry(gridcast::config::OPT_HOST_URL.to_string())
        .or_insert_with(|| args.host_url.clone());
    let config = RegistryConfig::from_properties(&properties);

    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(port) => Some(format!("0.0.0.0:{port}").parse()?),
        None => None,
    };

    tracing::info!(
        host_url = %config.host_url,
        dashboard_addr = ?dashboard_addr,
        "Starting gridcast node"
    );

    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(StaticDirectory::new());
    let registry = Arc::new(ServiceRegistry::new(store, directory, config));

    let shutdown = shutdown_token();
    let node = RegistryNode::start(
        registry,
        DispatchClient::new(),
        dashboard_addr,
        shutdown.clone(),
    )
    .await?;

    shutdown.cancelled().await;
    node.shutdown().await?;

    Ok(())
}

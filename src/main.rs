use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use rpc_transport::config::{load_config, TransportConfig};
use rpc_transport::lifecycle::{shutdown_listeners, shutdown_signal, start_listeners};
use rpc_transport::observability::{logging, metrics};
use rpc_transport::rpc::EchoHandler;

#[derive(Parser)]
#[command(name = "rpc-transport")]
#[command(about = "RPC transport listeners with an echo handler", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rpc-transport starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listeners = start_listeners(&config, Arc::new(EchoHandler)).await?;
    for listener in &listeners {
        let meta = listener.metadata();
        tracing::info!(protocol = %meta.protocol, endpoint = %meta.endpoint, "Listening");
    }

    shutdown_signal().await;
    shutdown_listeners(&listeners).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

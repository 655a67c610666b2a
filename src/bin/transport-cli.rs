use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use rpc_transport::config::ClientConfig;
use rpc_transport::{Sender, Target, TransportRegistry};

#[derive(Parser)]
#[command(name = "transport-cli")]
#[command(about = "Send RPC calls and notifications to a transport listener", long_about = None)]
struct Cli {
    /// Listener endpoint, e.g. http://localhost:8080 or ws://localhost:8090/ws
    #[arg(short, long, default_value = "http://localhost:8080")]
    endpoint: String,

    /// Seconds to wait for a response.
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Connect attempts before giving up (WebSocket only).
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a REQUEST and print the response envelope
    Call {
        service: String,
        method: String,
        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,
    },
    /// Send a NOTIFY
    Notify {
        service: String,
        method: String,
        #[arg(default_value = "{}")]
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut client = ClientConfig::default();
    client.reconnect.max_attempts = cli.attempts;
    client.request_timeout_secs = cli.timeout;

    let registry = TransportRegistry::with_defaults(&client);
    let target = Target::from_endpoint(&cli.endpoint)?;
    let sender = Sender::new(&registry, target, Duration::from_secs(cli.timeout))?;
    sender.start().await?;

    let outcome = match cli.command {
        Commands::Call {
            service,
            method,
            payload,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            sender.call(&service, &method, payload).await.map(|response| {
                println!("{}", serde_json::to_string_pretty(&response.payload).unwrap_or_default());
            })
        }
        Commands::Notify {
            service,
            method,
            payload,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            sender.notify(&service, &method, payload).await.map(|()| println!("sent"))
        }
    };

    sender.stop().await;
    outcome?;
    Ok(())
}

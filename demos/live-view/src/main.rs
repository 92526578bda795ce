//! Device live-view demo.
//!
//! Run with:
//!   cargo run -p live-view -- console --api-key KEY --instance-id ID
//!   cargo run -p live-view -- tap
//!
//! Endpoints and topics default from `FLEET_*` environment variables;
//! flags override them. Logs go to stderr.

mod console;
mod tap;

use clap::{Parser, Subcommand};
use fleet_live_core::LiveViewConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "live-view", version, about = "Device live views")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Attach this terminal to a device console (Ctrl+] detaches)
    Console {
        /// Console WebSocket URL
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        instance_id: Option<String>,
    },
    /// Simulate fare-card taps against a validator
    Tap {
        /// Broker URL (ws://, wss://, mqtt:// or tcp://)
        #[arg(long)]
        broker: Option<String>,
        #[arg(long)]
        request_topic: Option<String>,
        #[arg(long)]
        response_topic: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = LiveViewConfig::from_env()?;

    match cli.command {
        Commands::Console {
            url,
            api_key,
            instance_id,
        } => {
            override_with(&mut config.console.url, url);
            override_with(&mut config.console.api_key, api_key);
            override_with(&mut config.console.instance_id, instance_id);
            config.validate()?;
            console::run(&config).await
        }
        Commands::Tap {
            broker,
            request_topic,
            response_topic,
        } => {
            override_with(&mut config.broker.url, broker);
            override_with(&mut config.tap.request_topic, request_topic);
            override_with(&mut config.tap.response_topic, response_topic);
            config.validate()?;
            tap::run(&config).await
        }
    }
}

fn override_with(field: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *field = value;
    }
}

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod codec;
mod config;
mod error;
mod fetch;
mod guard;
mod proxy;
mod resolve;
mod rewrite;

use config::Config;
use guard::ConfigBlockList;
use proxy::ProxyGateway;

#[derive(Parser, Debug)]
#[command(name = "unblock-gateway")]
#[command(about = "Web-content unblocking gateway with stealth fetch fallback")]
struct Args {
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    #[arg(short, long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).await?;

    if args.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    info!("Starting unblock gateway");

    // The block list is owned by the excluded admin subsystem; here it is the
    // config-backed stand-in, injected as a read-only predicate.
    let block_list = Arc::new(ConfigBlockList::new(&config.gateway.blocked_hosts));

    let config = Arc::new(config);
    let gateway = Arc::new(ProxyGateway::new(config.clone(), block_list)?);

    let host = config.server.host.clone();
    let port = config.server.port;

    let server_task = {
        let gateway = gateway.clone();
        let server_config = config.server.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway.start(&server_config).await {
                error!("Server error: {}", e);
            }
        })
    };

    info!("Gateway listening on {}:{}", host, port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = server_task => {
            error!("Server task exited unexpectedly");
        }
    }

    info!("Gateway shutdown complete");
    Ok(())
}

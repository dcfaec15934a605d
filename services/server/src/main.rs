mod config;
mod intake;
mod media;
mod routes;
mod state;

use crate::config::Config;
use crate::state::AppState;
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Relays phone calls to a realtime speech model")]
struct Cli {
    /// Address to listen on, overriding BIND_ADDRESS
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    let bind_address = args.bind.unwrap_or(config.bind_address);
    if config.public_host.is_none() {
        tracing::warn!("PUBLIC_HOST not set, stream URLs will use the request Host header");
    }

    let state = AppState::new(config);
    let app = routes::router(state);

    tracing::info!("callbridge listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;

    // CLI --bind overrides config file
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    let core = parley_core::AppState::new(Duration::from_secs(config.gateway.ring_timeout_secs));
    let gateway = parley_ws::GatewayState::new(
        core,
        parley_ws::RateLimits::new(
            config.gateway.messages_per_minute,
            config.gateway.typing_per_minute,
        ),
        config.gateway.max_connections,
        config.server.shared_secret.clone(),
    );
    gateway.limits.spawn_maintenance();

    let app = parley_ws::gateway_router().with_state(gateway);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind = %config.server.bind_address,
        max_connections = config.gateway.max_connections,
        ring_timeout_secs = config.gateway.ring_timeout_secs,
        auth = config.server.shared_secret.is_some(),
        "relay listening"
    );

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down (ctrl-c)...");
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

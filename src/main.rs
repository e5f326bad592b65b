// Dockside - HTTP server entry point

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use dockside::storage::ConfigService;
use dockside::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to read .env: {}", e);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockside=info")),
        )
        .init();

    let config = ConfigService::new()
        .context("failed to load configuration")?
        .get_config_clone();
    let bind_address = config.server.bind_address.clone();
    let state = AppState::from_config(config).context("failed to initialise services")?;

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "dockside listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("ctrl-c handler unavailable");
            }
        })
        .await
        .context("server error")?;

    tracing::info!("dockside stopped");
    Ok(())
}

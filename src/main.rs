use std::net::SocketAddr;

use anyhow::Result;
use payment_ledger::{AppState, Config, init_pool, init_router};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    if config.webhook_secret().is_none() {
        warn!(
            degraded_trust = true,
            "STRIPE_WEBHOOK_SECRET is not set, webhook deliveries will not be verified"
        );
    }
    if config.stripe_secret_key.is_none() {
        warn!("STRIPE_SECRET_KEY is not set");
    }

    let pool = init_pool(&config).await?;

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;

    let app = init_router(AppState { pool, config });

    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

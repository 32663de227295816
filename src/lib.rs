//! Payment-event commission and earnings-ledger engine.
//!
//! Payment processor webhooks come in through [`api::init_router`], get
//! authenticated and classified, and are turned into earning records, domain
//! records and affiliate commissions inside one database transaction.

pub mod api;
pub mod commission;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod referral;
pub mod responses;
pub mod settlement;
pub mod signature;
pub mod types;

use anyhow::Context;
use anyhow::Result;
pub use api::{AppState, init_router};
pub use config::Config;
pub use handlers::Outcome;
use sqlx::{PgPool, migrate::Migrator, postgres::PgPoolOptions};

/// Schema for every table the engine writes.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Initializes the database pool and brings the schema up to date.
pub async fn init_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

//! Memberly Background Worker
//!
//! Handles scheduled jobs:
//! - Liveness heartbeat (every 5 minutes)
//! - Webhook event ledger retention cleanup (daily at 3:00 AM UTC)

use std::sync::Arc;
use std::time::Duration;

use memberly_billing::{BillingConfig, EventLedger, PostgresStore};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Memberly Worker");

    let pool = create_db_pool().await?;

    let store = PostgresStore::new(pool);
    store.migrate().await?;
    info!("Database migrations applied");

    let config = BillingConfig::from_env()?;
    let retention_days = config.event_retention_days;
    let ledger = Arc::new(EventLedger::new(Arc::new(store)));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async {
                info!("Worker heartbeat");
            })
        })?)
        .await?;

    // Job 2: Cleanup old webhook event records (daily at 3:00 AM UTC)
    let cleanup_ledger = ledger.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let ledger = cleanup_ledger.clone();
            Box::pin(async move {
                info!(
                    retention_days = retention_days,
                    "Running webhook event retention cleanup"
                );
                match ledger.cleanup(retention_days).await {
                    Ok(removed) => {
                        info!(removed = removed, "Webhook event retention cleanup complete");
                    }
                    Err(e) => {
                        error!(error = %e, "Webhook event retention cleanup failed");
                    }
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    info!("Worker started with 2 scheduled jobs");

    // Keep the worker alive
    loop {
        tokio::time::sleep(Duration::from_secs(300)).await;
    }
}

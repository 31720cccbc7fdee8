use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::{
    api::handlers::AppState,
    campaigns::repository::CampaignRepository,
    config::Config,
    error::AppResult,
    ledger::repository::LedgerRepository,
    payments::{HorizonServer, PaymentBuilder, PaymentCycle},
    reconcile::ReconciliationEngine,
    settlement::{
        SettlementEngine, SettlementFrequency, SettlementScheduleConfig, SettlementScheduler,
    },
    staging::StagingRepository,
};

pub async fn initialize_app_state(config: Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url).await?;

    // Stores
    let campaigns = Arc::new(CampaignRepository::new(pool.clone()));
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let staging = Arc::new(StagingRepository::new(pool.clone()));

    // External payment network
    let gateway = Arc::new(HorizonServer::new(
        config.horizon_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?);
    info!("✅ Horizon gateway initialized: {}", config.horizon_url);

    // One in-flight payment cycle at a time; the builder and the reconciler
    // share this lock.
    let cycle = Arc::new(PaymentCycle::new());

    let settlement = Arc::new(SettlementEngine::new(campaigns.clone(), ledger.clone()));

    let builder = Arc::new(PaymentBuilder::new(
        config.operator_public_key.clone(),
        config.network_passphrase.clone(),
        config.transaction_timeout_secs,
        campaigns.clone(),
        staging.clone(),
        gateway.clone(),
        cycle.clone(),
    ));

    let reconciler = Arc::new(ReconciliationEngine::new(
        config.operator_public_key.clone(),
        campaigns.clone(),
        ledger.clone(),
        staging.clone(),
        cycle.clone(),
    ));
    info!("✅ Settlement, builder and reconciliation engines initialized");

    // Settle whatever expired while the process was down.
    match settlement.settle_expired_campaigns().await {
        Ok(summary) => info!(
            "✅ Startup settlement sweep: {} settled, {} failed",
            summary.settled.len(),
            summary.failures.len()
        ),
        Err(e) => error!("❌ Startup settlement sweep failed: {:?}", e),
    }

    // Keep settling on a schedule from here on.
    let frequency = match config.settlement_frequency.as_str() {
        "hourly" => SettlementFrequency::Hourly,
        _ => SettlementFrequency::Daily,
    };
    let scheduler = SettlementScheduler::new(
        SettlementScheduleConfig {
            frequency,
            execution_hour: config.settlement_hour,
        },
        settlement.clone(),
    );
    scheduler.start();
    info!(
        "✅ Settlement scheduler started ({} at {:02}:00 UTC)",
        config.settlement_frequency, config.settlement_hour
    );

    Ok(AppState {
        config: Arc::new(config),
        campaigns,
        ledger,
        settlement,
        builder,
        reconciler,
        gateway,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<SqlitePool> {
    info!("📊 Connecting to database...");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}

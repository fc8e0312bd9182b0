use std::sync::Arc;

use bop_payment_engine::{
    lock::DistributedLock,
    processors::UnconfiguredProcessors,
    OrderFlowApi,
    PaymentReconciler,
    SqliteDatabase,
    StockApi,
};
use bop_payment_server::{
    cli::handle_command_line_args,
    config::ServerConfig,
    errors::ServerError,
    hooks::{logging_hooks, start_event_handlers},
    workers::{start_worker, ReconciliationJob, ReservationCleanupJob},
};
use dotenvy::dotenv;
use log::*;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    if handle_command_line_args() {
        return;
    }
    let config = ServerConfig::from_env_or_default();

    info!("🚀️ Starting payment server instance {}", config.instance_id);
    match run_server(config).await {
        Ok(_) => println!("Bye!"),
        Err(e) => eprintln!("{e}"),
    }
}

async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(config.database_url.reveal(), config.db_max_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::MigrationError(e.to_string()))?;
    let producers = start_event_handlers(logging_hooks()).await;
    // Processor integrations are not wired in yet, so only manual payments can settle
    let api = OrderFlowApi::new(db.clone(), Arc::new(UnconfiguredProcessors), producers);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler_lock = DistributedLock::new(db.clone(), "reconciler", &config.instance_id, config.lock_ttl);
    let reconciler = ReconciliationJob::new(PaymentReconciler::new(api));
    let reconciler = start_worker(reconciler, reconciler_lock, config.reconcile_interval, shutdown_rx.clone());

    let cleanup_lock = DistributedLock::new(db.clone(), "reservation-cleanup", &config.instance_id, config.lock_ttl);
    let cleanup = ReservationCleanupJob::new(StockApi::new(db.clone()));
    let cleanup = start_worker(cleanup, cleanup_lock, config.stock_refresh_interval, shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("🚀️ Shutting down");
    if shutdown_tx.send(true).is_err() {
        warn!("🚀️ The workers had already stopped");
    }
    for worker in [reconciler, cleanup] {
        if let Err(e) = worker.await {
            error!("🚀️ A worker did not stop cleanly: {e}");
        }
    }
    Ok(())
}

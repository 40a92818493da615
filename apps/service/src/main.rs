mod config;
mod database;
mod error;
mod monitoring;
mod notify;
mod pool;
mod reporting;
mod routes;

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use config::Config;
use database::{LibsqlStore, Store};
use error::EngineError;
use logger::init_tracing;
use monitoring::{AlertEngine, AlertPolicy, CycleScheduler, ProbeExecutor, Reconciler};
use notify::Notifier;
use routes::OpsState;

#[derive(Debug, Parser)]
#[command(name = "qawaq-service", about = "AMI equipment monitoring and alerting engine")]
struct Cli {
    /// Path to the TOML config file (defaults to
    /// $XDG_CONFIG_HOME/qawaq/config.toml)
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    Config(#[from] config::Error),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Setup(#[from] anyhow::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;

    let database = libsql::Builder::new_local(&config.database.path)
        .build()
        .await
        .map_err(EngineError::from)?;
    let conn = database.connect().map_err(EngineError::from)?;
    database::initialize_database(&conn).await?;

    let pool = pool::build_pool(database, config.probe.pool_size.max(4))?;
    let store: Arc<dyn Store> = Arc::new(LibsqlStore::new(pool));

    let executor = Arc::new(ProbeExecutor::new(&config.probe)?);
    let notifier: Arc<dyn Notifier> = Arc::from(notify::from_config(&config.notifier)?);
    let policy = AlertPolicy::from_config(&config.alerts, &config.notifier);
    let alerts = AlertEngine::new(store.clone(), notifier, policy);
    let reconciler = Reconciler::new(store.clone());

    let scheduler = Arc::new(CycleScheduler::new(
        store.clone(),
        executor,
        reconciler,
        alerts,
        &config.scheduler,
    ));

    // Trigger queue of one: a second manual trigger while one is
    // queued gets a 409 from the route instead of piling up.
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status_rx = scheduler.subscribe();

    let scheduler_task = tokio::spawn(scheduler.clone().run(trigger_rx, shutdown_rx));

    let state =
        web::Data::new(OpsState { status: status_rx, trigger: trigger_tx, store: store.clone() });

    tracing::info!(
        bind = %config.http.bind,
        port = config.http.port,
        probe_interval_seconds = config.scheduler.probe_interval_seconds,
        alert_interval_seconds = config.scheduler.alert_interval_seconds,
        "qawaq monitoring engine starting"
    );

    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind((config.http.bind.as_str(), config.http.port))?
        .run()
        .await?;

    // Ops server received a stop signal; stop the scheduler too. Any
    // in-flight probes are abandoned, nothing partial is committed.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;

    Ok(())
}

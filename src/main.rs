use portal_lib::{
    cache::TicketCache,
    cli::parse_args,
    config::Config,
    db::build_db_pool,
    notify::NotificationGateway,
    psa_client::PsaClient,
    queue::{JobQueue, JobSink},
    server::monitoring::{WorkerMetrics, WORKER_METRICS},
    server::setup_server,
    state::AppState,
    technicians::TechnicianRefresher,
    ticket_service::store::PgTicketStore,
    ticket_service::{TicketService, CACHE_TTL, RECENT_WRITE_GUARD},
    worker::pool::WorkerPool,
};

use diesel::{pg::PgConnection, Connection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use prometheus_client::registry::Registry;
use std::error::Error;
use std::sync::Arc;

use dotenv::dotenv;
use log::{debug, error, info};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Gracefully shuts down the application when a SIGTERM or SIGINT signal is received.
async fn handle_shutdown_signals(state: Arc<AppState>) {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("Failed to register SIGTERM signal handler");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("Failed to register SIGINT signal handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down.");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down.");
        }
    }

    state.shutdown_token.cancel();
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn run_initial_migrations(
    connection: &mut impl MigrationHarness<diesel::pg::Pg>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    connection.run_pending_migrations(MIGRATIONS)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    info!("Starting portal backend");
    dotenv().ok();

    let config = Config::from_env().expect("Config incorrectly specified");
    env_logger::init();
    let args = parse_args();
    debug!("Config loaded");

    let mut temp_conn = PgConnection::establish(&config.db_url)
        .expect("Could not connect to Postgres for migrations");
    run_initial_migrations(&mut temp_conn).expect("Migrations failed");

    let pool = build_db_pool(&config.db_url)
        .await
        .expect("Could not initialize DB pool!");

    let mut registry = Registry::default();
    let metrics = WorkerMetrics::register(&mut registry);
    WORKER_METRICS
        .set(metrics)
        .unwrap_or_else(|_| panic!("Worker metrics registered twice"));

    let gateway = Arc::new(NotificationGateway::new());
    let state = Arc::new(AppState::new(
        pool.clone(),
        registry,
        CancellationToken::new(),
        gateway.clone(),
    ));
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(state.clone()));

    let server_handle = setup_server(state.clone(), config.bind_addr).await;

    let queue = Arc::new(
        JobQueue::new(&config.redis_url, "portal-jobs")
            .await
            .expect("Could not initialize job queue!"),
    );
    let recovered = queue
        .recover_stalled()
        .await
        .expect("Could not recover stalled jobs!");
    if recovered > 0 {
        info!("Requeued {recovered} jobs stranded by a previous shutdown");
    }
    let psa = Arc::new(
        PsaClient::new(config.psa_api_url.clone(), config.psa_credentials.clone())
            .expect("Could not initialize PSA client!"),
    );
    let store = Arc::new(PgTicketStore::new(pool.clone()));

    let service = Arc::new(TicketService::new(
        psa.clone(),
        store.clone(),
        TicketCache::new(CACHE_TTL, RECENT_WRITE_GUARD),
        queue.clone() as Arc<dyn JobSink>,
    ));

    let n_workers = args.workers.unwrap_or(config.n_workers);
    info!("Starting {n_workers} job workers");
    let worker_pool = WorkerPool::new(
        n_workers,
        service.clone(),
        queue.clone(),
        gateway.clone(),
        state.shutdown_token.clone(),
    );

    let refresher_handle = if !args.no_technician_refresh {
        let refresher = TechnicianRefresher::new(psa.clone(), store.clone());
        Some(tokio::spawn(
            refresher.run_periodic(state.shutdown_token.clone()),
        ))
    } else {
        info!("Skipping technician refresh");
        None
    };

    if let Err(e) = worker_pool.wait_for_completion().await {
        error!("Worker pool shut down with errors: {e}");
    }
    if let Some(handle) = refresher_handle {
        let _ = handle.await;
    }
    let _ = server_handle.await;
    let _ = shutdown_handle.await;
    info!("Shutdown complete");
}

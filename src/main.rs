use axum::serve;
use dotenvy::dotenv;
use qrtrace::config::Config;
use qrtrace::dao::PgStore;
use qrtrace::memory::MemoryStore;
use qrtrace::recorder::create_reconcile_job;
use qrtrace::store::QrStore;
use qrtrace::{create_router, AppState};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_cron_scheduler::JobScheduler;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_TRACING_LEVEL: &str = "qrtrace=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    _ = dotenv();
    configure_tracing();
    let config = Config::from_env().expect("Invalid configuration");
    let store = create_store(&config).await;
    if let Some(cron_expression) = &config.reconcile_cron {
        configure_scheduler(cron_expression, store.clone()).await;
    }
    let listener = create_listener(&config.server_address).await;
    let router = create_router(AppState::new(store, config));
    serve(listener, router)
        .await
        .expect("Server failed to start");
}

fn configure_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or(DEFAULT_TRACING_LEVEL.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn create_store(config: &Config) -> Arc<dyn QrStore> {
    match &config.database_url {
        Some(database_url) => {
            let db_connection_pool =
                create_db_connection_pool(database_url, config.database_max_connections).await;
            Arc::new(PgStore::new(db_connection_pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping QR codes in memory");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn create_db_connection_pool(database_url: &str, max_connections: u32) -> Pool<Postgres> {
    let db_connection_pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .expect("Creating database connection pool failed");
    sqlx::migrate!()
        .run(&db_connection_pool)
        .await
        .expect("Running database migrations failed");
    db_connection_pool
}

async fn configure_scheduler(cron_expression: &str, store: Arc<dyn QrStore>) {
    let scheduler = JobScheduler::new()
        .await
        .expect("Creating scheduler failed");
    scheduler
        .add(create_reconcile_job(cron_expression, store))
        .await
        .expect("Adding reconcile job to scheduler failed");
    scheduler.start().await.expect("Starting scheduler failed");
    tracing::info!("Scan count reconciliation scheduled: {}", cron_expression);
}

async fn create_listener(server_address: &str) -> TcpListener {
    let listener = TcpListener::bind(&server_address)
        .await
        .expect("Creating tcp listener failed");
    tracing::info!("Listening on address: {}", server_address);
    listener
}

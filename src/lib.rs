pub mod analytics;
pub mod auth;
pub mod config;
pub mod dao;
pub mod error;
pub mod extract;
pub mod memory;
pub mod model;
pub mod recorder;
pub mod resolver;
pub mod routes;
pub mod store;
pub mod utils;

use auth::identify;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use config::Config;
use recorder::ScanRecorder;
use routes::{
    create_qr_code, delete_qr_code, get_qr_code, get_qr_stats, health, list_qr_codes, list_scans,
    redirect, update_qr_code,
};
use std::sync::Arc;
use store::QrStore;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QrStore>,
    pub recorder: ScanRecorder,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn QrStore>, config: Config) -> Self {
        Self {
            recorder: ScanRecorder::new(store.clone(), config.recording_timeout_ms),
            store,
            config: Arc::new(config),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/qr", get(list_qr_codes).post(create_qr_code))
        .route(
            "/qr/:id",
            get(get_qr_code).patch(update_qr_code).delete(delete_qr_code),
        )
        .route("/qr/:id/stats", get(get_qr_stats))
        .route("/qr/:id/scans", get(list_scans))
        .route_layer(from_fn_with_state(state.clone(), identify));
    Router::new()
        .route("/r/:code", get(redirect))
        .route("/health", get(health))
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

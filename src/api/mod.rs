//! HTTP API using Axum
//!
//! A thin dispatcher over the engine, exposing the three core operations
//! plus run inspection and retention:
//! - `POST /api/v1/reports` - ingest a free-text symptom report
//! - `POST /api/v1/process` - run the clustering pipeline
//! - `GET  /api/v1/latest` - latest run as map-ready GeoJSON
//! - `GET  /api/v1/predictions` - latest run's forecasts as GeoJSON
//! - `GET  /api/v1/runs` - recent run records
//! - `POST /api/v1/retention` - purge old runs

pub mod envelope;
pub mod handlers;

pub use handlers::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Create the application router with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    // CORS configuration (permissive; the map frontend runs elsewhere)
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/reports", post(handlers::create_report))
        .route("/process", post(handlers::process_clusters))
        .route("/latest", get(handlers::latest_data))
        .route("/predictions", get(handlers::latest_predictions))
        .route("/runs", get(handlers::list_runs))
        .route("/retention", post(handlers::run_retention))
        .with_state(state)
}

//! Request handlers
//!
//! Thin dispatchers over the core: each handler validates input, invokes one
//! engine operation, and wraps the outcome in the response envelope. All
//! pipeline and store failures become structured error responses; nothing
//! here panics.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::geojson_out;
use crate::ingest::{complete_report, EmbeddingProvider, ReportStore, SymptomInference};
use crate::pipeline::ClusterPipeline;
use crate::storage::RunStore;

/// Shared handler state: the pipeline plus the collaborator handles the
/// report endpoint needs.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ClusterPipeline>,
    pub store: Arc<RunStore>,
    pub reports: Arc<dyn ReportStore>,
    pub inference: Arc<dyn SymptomInference>,
    pub embedding: Arc<dyn EmbeddingProvider>,
    /// Runs kept by the retention endpoint.
    pub retention_runs: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub text: String,
    pub lat: f64,
    pub lon: f64,
}

/// `POST /api/v1/reports`: infer symptoms, embed, persist, return the
/// completed report.
pub async fn create_report(
    State(state): State<AppState>,
    Json(request): Json<CreateReportRequest>,
) -> Response {
    if request.text.trim().is_empty() {
        return ApiErrorResponse::invalid_report("text must not be empty");
    }

    let inferred = match state.inference.infer(&request.text).await {
        Ok(inferred) => inferred,
        Err(e) => {
            error!(error = %e, "Symptom inference failed");
            return ApiErrorResponse::collaborator_unavailable(
                "failed to infer symptoms and cause",
            );
        }
    };

    // The embedding is computed over a normalized summary of the inference
    // output rather than the raw text, so reports phrased differently but
    // inferred identically embed identically.
    let summary = summarize(&inferred.symptoms, &inferred.cause);
    let embedding = match state.embedding.embed(&summary).await {
        Ok(embedding) => embedding,
        Err(e) => {
            error!(error = %e, "Embedding generation failed");
            return ApiErrorResponse::collaborator_unavailable("failed to generate embedding");
        }
    };

    let report = match complete_report(request.lat, request.lon, inferred.symptoms, embedding) {
        Ok(report) => report,
        Err(e) => return ApiErrorResponse::invalid_report(e.to_string()),
    };

    match state.reports.save(report).await {
        Ok(stored) => {
            info!(report_id = stored.id, "Report ingested");
            ApiResponse::ok(stored)
        }
        Err(e) => {
            error!(error = %e, "Report store write failed");
            ApiErrorResponse::store_error("failed to store report")
        }
    }
}

/// Deterministic one-line summary of an inference result.
fn summarize(symptoms: &std::collections::BTreeMap<String, u8>, cause: &str) -> String {
    let names: Vec<&str> = symptoms.keys().map(String::as_str).collect();
    format!("symptoms: {}; cause: {cause}", names.join(", "))
}

/// `POST /api/v1/process`: run the full pipeline and persist a run.
pub async fn process_clusters(State(state): State<AppState>) -> Response {
    match state.pipeline.process().await {
        Ok(summary) => {
            info!(run_id = summary.run_id, "Clustering run complete");
            ApiResponse::ok(summary)
        }
        Err(e) => {
            error!(error = %e, "Clustering run failed");
            ApiErrorResponse::run_failed(e.to_string())
        }
    }
}

/// `GET /api/v1/latest`: latest run's snapshots as GeoJSON with the window
/// bounds of the newest window.
pub async fn latest_data(State(state): State<AppState>) -> Response {
    let windows = match state.store.get_latest() {
        Ok(windows) => windows,
        Err(e) => {
            error!(error = %e, "Failed to read latest run");
            return ApiErrorResponse::store_error(e.to_string());
        }
    };

    if windows.is_empty() {
        return ApiResponse::ok(json!({
            "time_window_start": null,
            "time_window_end": null,
            "geojson": null,
        }));
    }

    let collection = geojson_out::snapshots_to_feature_collection(&windows);
    ApiResponse::ok(json!({
        "time_window_start": windows[0].time_window_start.to_rfc3339(),
        "time_window_end": windows[0].time_window_end.to_rfc3339(),
        "geojson": collection,
    }))
}

/// `GET /api/v1/predictions`: latest run's forecasts as GeoJSON.
pub async fn latest_predictions(State(state): State<AppState>) -> Response {
    match state.store.get_latest_predictions() {
        Ok(predictions) => {
            ApiResponse::ok(geojson_out::predictions_to_feature_collection(&predictions))
        }
        Err(e) => {
            error!(error = %e, "Failed to read predictions");
            ApiErrorResponse::store_error(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<usize>,
}

/// `GET /api/v1/runs?limit=n`: recent run records, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Response {
    match state.store.list_runs(query.limit.unwrap_or(10)) {
        Ok(runs) => ApiResponse::ok(runs),
        Err(e) => {
            error!(error = %e, "Failed to list runs");
            ApiErrorResponse::store_error(e.to_string())
        }
    }
}

/// `POST /api/v1/retention`: purge all but the configured number of runs.
pub async fn run_retention(State(state): State<AppState>) -> Response {
    match state.store.retain(state.retention_runs) {
        Ok(purged) => {
            info!(purged, keep = state.retention_runs, "Retention complete");
            ApiResponse::ok(json!({ "purged": purged, "kept": state.retention_runs }))
        }
        Err(e) => {
            error!(error = %e, "Retention failed");
            ApiErrorResponse::store_error(e.to_string())
        }
    }
}

/// `GET /health`: liveness probe.
pub async fn health() -> Response {
    ApiResponse::ok(json!({ "status": "ok" }))
}

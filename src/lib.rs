//! Epiwatch: outbreak clustering and forecasting
//!
//! Ingests free-text symptom reports tagged with location and time, groups
//! them into spatio-semantic clusters, tracks cluster identity across
//! recomputations, snapshots cluster state per time window, forecasts the
//! near future, and serves map-ready polygons over HTTP.
//!
//! ## Architecture
//!
//! - **Clustering**: feature assembly, DBSCAN under a composite
//!   spatial+semantic metric, temporal splitting
//! - **Identity**: persistent cluster ids matched across runs by report
//!   overlap
//! - **Snapshots**: per-window aggregation of cluster state
//! - **Forecast**: per-cluster VAR extrapolation with graceful fallback
//! - **Storage**: versioned run persistence with retention
//! - **API**: thin axum dispatcher over the core operations

pub mod api;
pub mod clustering;
pub mod config;
pub mod forecast;
pub mod geojson_out;
pub mod geometry;
pub mod identity;
pub mod ingest;
pub mod pipeline;
pub mod snapshots;
pub mod storage;
pub mod types;

// Re-export the types most callers need
pub use config::{AppConfig, EngineConfig};
pub use pipeline::ClusterPipeline;
pub use storage::{RunStore, StoreError};
pub use types::{
    ClusterReportsMap, ClusterSnapshot, IdentityMap, PredictedSnapshot, Report, RunRecord,
    RunStatus, RunSummary, TimedeltaSnapshot, EMBEDDING_DIM, NOISE_LABEL,
};

//! Spatio-semantic clustering
//!
//! Three stages, run in order by the pipeline:
//! 1. [`features`] - per-report feature vectors (scaled coordinates +
//!    range-balanced embedding)
//! 2. [`dbscan`] - density clustering under the composite
//!    spatial+semantic metric
//! 3. [`temporal`] - splitting of time-discontinuous clusters

pub mod dbscan;
pub mod features;
pub mod temporal;

pub use dbscan::{cluster_reports, DbscanParams};
pub use features::{build_features, CoordScaler, FeatureSet};
pub use temporal::split_clusters_through_time;

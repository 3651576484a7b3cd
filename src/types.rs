//! Shared data structures for the outbreak clustering pipeline
//!
//! This module defines the core types flowing through the engine:
//! - Report: a single geolocated symptom observation with its embedding
//! - Cluster labels and persistent cluster identifiers
//! - ClusterSnapshot / TimedeltaSnapshot: per-window cluster state
//! - PredictedSnapshot: forecast output
//! - RunRecord: versioned record of one pipeline execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Reports
// ============================================================================

/// Dimension of the semantic embedding produced by the external model.
pub const EMBEDDING_DIM: usize = 768;

/// Sentinel cluster label for noise (unclustered) reports.
pub const NOISE_LABEL: i64 = -1;

/// A single user-submitted symptom observation.
///
/// Reports are produced outside the engine (inference + embedding
/// collaborators) and are immutable once ingested. `utm_x`/`utm_y` are
/// equal-area projected coordinates in meters, filled at the ingest boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Symptom name -> intensity (1..=3).
    pub symptoms: BTreeMap<String, u8>,
    /// Fixed-dimension semantic embedding (see [`EMBEDDING_DIM`]).
    pub embedding: Vec<f64>,
    pub utm_x: f64,
    pub utm_y: f64,
}

impl Report {
    /// Whether the embedding has the expected dimension and only finite
    /// entries. Reports failing this check are skipped at the ingest
    /// boundary, never clustered.
    pub fn has_valid_embedding(&self) -> bool {
        self.embedding.len() == EMBEDDING_DIM && self.embedding.iter().all(|v| v.is_finite())
    }

    /// Sum of all symptom intensities, the per-report contribution to a
    /// window's intensity series.
    pub fn total_intensity(&self) -> f64 {
        self.symptoms.values().map(|&v| f64::from(v)).sum()
    }
}

// ============================================================================
// Cluster identity
// ============================================================================

/// Per-run mapping from run-local labels to persistent cluster ids.
///
/// Invariant: every non-noise label appearing in the run has an entry;
/// noise has none.
pub type IdentityMap = BTreeMap<i64, String>;

/// Mapping from persistent cluster id to the member report ids of a run.
/// Consumed by identity matching on the *next* run.
pub type ClusterReportsMap = BTreeMap<String, Vec<i64>>;

// ============================================================================
// Snapshots
// ============================================================================

/// The state of one cluster in one time window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSnapshot {
    pub cluster_id: String,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    /// Geographic centroid of member reports, `[lat, lon]`.
    pub centroid: [f64; 2],
    /// Arithmetic mean of member embeddings.
    pub avg_embedding: Vec<f64>,
    /// Member report ids in group order.
    pub report_ids: Vec<i64>,
    /// Intersection of member symptom-name sets.
    pub common_symptoms: BTreeSet<String>,
    /// Member reports, retained so the geometry surface can rebuild the
    /// cluster hull without a second report-store round trip.
    pub reports: Vec<Report>,
}

impl ClusterSnapshot {
    pub fn report_count(&self) -> usize {
        self.report_ids.len()
    }

    /// Mean over member reports of their summed symptom intensities.
    pub fn mean_intensity(&self) -> f64 {
        if self.reports.is_empty() {
            return 0.0;
        }
        let total: f64 = self.reports.iter().map(Report::total_intensity).sum();
        total / self.reports.len() as f64
    }
}

/// All cluster snapshots sharing one time window.
///
/// Contract: every enclosed snapshot has the same window bounds and the
/// same timedelta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimedeltaSnapshot {
    pub timedelta_days: i64,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    pub snapshots: Vec<ClusterSnapshot>,
}

/// A forecast snapshot one or more windows past the last observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictedSnapshot {
    pub cluster_id: String,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    /// `[lat, lon]`, extrapolated.
    pub centroid: [f64; 2],
    /// Carried over from the last observation, not extrapolated.
    pub avg_embedding: Vec<f64>,
    /// Carried over from the last observation.
    pub common_symptoms: BTreeSet<String>,
    /// Forecast member count, clamped at 0.
    pub report_count: u32,
    /// Forecast mean intensity, clamped at 0.
    pub intensity: f64,
}

// ============================================================================
// Runs
// ============================================================================

/// Lifecycle status of a clustering run. Readers ignore anything that is
/// not `Completed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Versioned record of one pipeline execution. Immutable after write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: u64,
    pub created_at: DateTime<Utc>,
    pub total_reports: usize,
    pub total_clusters: usize,
    pub eps_meters: f64,
    pub min_samples: usize,
    pub max_time_gap_days: i64,
    /// Additional parameters recorded for provenance (identity map, window
    /// width, forecast settings).
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub status: RunStatus,
}

/// Summary returned to the caller after a successful `process` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub total_reports: usize,
    pub total_clusters: usize,
    pub skipped_reports: usize,
    pub snapshot_windows: usize,
    pub predictions: usize,
}

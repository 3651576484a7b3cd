//! Snapshot forecasting
//!
//! Per cluster, the observed snapshot series is regularized onto a daily
//! grid, interpolated, and extrapolated one or more windows ahead with a
//! small VAR model. Clusters with too little history fall back to repeating
//! their last observation; a failed fit skips only that cluster.

pub mod var;

use chrono::Duration;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::{ClusterSnapshot, PredictedSnapshot};
use var::fit_var;

/// Columns of the forecast frame, in order: report count, latitude,
/// longitude, intensity.
const SERIES_DIM: usize = 4;

/// Forecast settings.
#[derive(Debug, Clone, Copy)]
pub struct ForecastParams {
    /// Future windows to emit per cluster.
    pub steps: usize,
    /// VAR lag cap.
    pub max_lags: usize,
    /// Minimum prepared-frame rows before the model is attempted.
    pub min_observations: usize,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            steps: 1,
            max_lags: 1,
            min_observations: 5,
        }
    }
}

/// One cluster's series regularized onto a contiguous daily grid.
struct PreparedSeries {
    /// Grid origin (the cluster's first observed window start).
    first: chrono::DateTime<chrono::Utc>,
    /// `[report_count, lat, lon, intensity]` per grid day.
    rows: Vec<Vec<f64>>,
    /// Carried forward, not extrapolated.
    last_embedding: Vec<f64>,
    last_symptoms: std::collections::BTreeSet<String>,
}

/// Forecast future snapshots for every cluster present in `snapshots`.
pub fn predict_future_snapshots(
    snapshots: &[ClusterSnapshot],
    params: &ForecastParams,
) -> Vec<PredictedSnapshot> {
    let mut by_cluster: BTreeMap<&str, Vec<&ClusterSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        by_cluster
            .entry(snapshot.cluster_id.as_str())
            .or_default()
            .push(snapshot);
    }

    let mut predictions = Vec::new();
    for (cluster_id, observed) in by_cluster {
        let series = prepare_series(&observed);

        if series.rows.len() < params.min_observations {
            debug!(
                cluster_id,
                observations = series.rows.len(),
                required = params.min_observations,
                "Too few observations for a model fit, repeating last observation"
            );
            predictions.extend(fallback_predictions(cluster_id, &series, params.steps));
            continue;
        }

        match fit_var(&series.rows, params.max_lags) {
            Ok(fit) => {
                let forecast = fit.forecast(&series.rows, params.steps);
                predictions.extend(forecast.into_iter().enumerate().map(|(i, row)| {
                    prediction_from_row(cluster_id, &series, series.rows.len() + i, &row)
                }));
            }
            Err(e) => {
                warn!(cluster_id, error = %e, "Model fit failed, skipping cluster forecast");
            }
        }
    }
    predictions
}

/// Regularize one cluster's observed snapshots onto a daily grid from its
/// first to its last window, linearly interpolating the numeric columns and
/// forward-filling the embedding and symptom set.
fn prepare_series(observed: &[&ClusterSnapshot]) -> PreparedSeries {
    // Grid index by rounded day offset from the first window; when two
    // windows land on the same grid day the later one wins.
    let first = observed
        .iter()
        .map(|s| s.time_window_start)
        .min()
        .unwrap_or_default();

    let mut known: BTreeMap<i64, &ClusterSnapshot> = BTreeMap::new();
    for &snapshot in observed {
        let offset = (snapshot.time_window_start - first).num_seconds() as f64 / 86_400.0;
        known.insert(offset.round() as i64, snapshot);
    }

    let days: Vec<i64> = known.keys().copied().collect();
    let last_day = days.last().copied().unwrap_or(0);

    let row_of = |s: &ClusterSnapshot| {
        vec![
            s.report_count() as f64,
            s.centroid[0],
            s.centroid[1],
            s.mean_intensity(),
        ]
    };

    let mut rows = Vec::with_capacity(last_day as usize + 1);
    for day in 0..=last_day {
        if let Some(&snapshot) = known.get(&day) {
            rows.push(row_of(snapshot));
            continue;
        }
        // Interior gap: linearly interpolate between the bracketing
        // observations. The grid is bounded by observed days, so both
        // brackets always exist.
        let before = days.iter().rev().find(|&&d| d < day).copied().unwrap_or(0);
        let after = days.iter().find(|&&d| d > day).copied().unwrap_or(last_day);
        let t = (day - before) as f64 / (after - before) as f64;
        let a = row_of(known[&before]);
        let b = row_of(known[&after]);
        rows.push(
            (0..SERIES_DIM)
                .map(|j| a[j] + t * (b[j] - a[j]))
                .collect(),
        );
    }

    let last_observed = known[&last_day];
    PreparedSeries {
        first,
        rows,
        last_embedding: last_observed.avg_embedding.clone(),
        last_symptoms: last_observed.common_symptoms.clone(),
    }
}

/// Build a prediction from a forecast row at the given grid index.
fn prediction_from_row(
    cluster_id: &str,
    series: &PreparedSeries,
    grid_index: usize,
    row: &[f64],
) -> PredictedSnapshot {
    let start = series.first + Duration::days(grid_index as i64);
    PredictedSnapshot {
        cluster_id: cluster_id.to_string(),
        time_window_start: start,
        time_window_end: start + Duration::days(1),
        centroid: [row[1], row[2]],
        avg_embedding: series.last_embedding.clone(),
        common_symptoms: series.last_symptoms.clone(),
        report_count: row[0].max(0.0).round() as u32,
        intensity: row[3].max(0.0),
    }
}

/// Emit `steps` copies of the last observed row, one day apart.
fn fallback_predictions(
    cluster_id: &str,
    series: &PreparedSeries,
    steps: usize,
) -> Vec<PredictedSnapshot> {
    let Some(last_row) = series.rows.last() else {
        return Vec::new();
    };
    (0..steps)
        .map(|i| prediction_from_row(cluster_id, series, series.rows.len() + i, last_row))
        .collect()
}

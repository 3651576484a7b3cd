//! Clustering pipeline
//!
//! The orchestrator behind `ProcessClusters`: fetch reports, build features,
//! cluster, split temporally, resolve persistent identities, snapshot,
//! forecast, persist. The pipeline is sequential within one invocation;
//! suspension points are the I/O boundaries (report fetch, identity load,
//! run write). Recoverable problems are absorbed where they occur (a
//! malformed report is skipped, a failed forecast drops one cluster) while
//! anything that would corrupt a run surfaces as an error before the store
//! is touched.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clustering::{build_features, cluster_reports, split_clusters_through_time, DbscanParams};
use crate::config::EngineConfig;
use crate::forecast::{predict_future_snapshots, ForecastParams};
use crate::identity::IdentityManager;
use crate::ingest::ReportStore;
use crate::snapshots::compute_snapshots;
use crate::storage::{RunParams, RunStore};
use crate::types::{ClusterReportsMap, Report, RunSummary, NOISE_LABEL};

/// Full clustering pipeline with its injected collaborators.
pub struct ClusterPipeline {
    reports: Arc<dyn ReportStore>,
    store: Arc<RunStore>,
    config: EngineConfig,
}

impl ClusterPipeline {
    pub fn new(reports: Arc<dyn ReportStore>, store: Arc<RunStore>, config: EngineConfig) -> Self {
        Self {
            reports,
            store,
            config,
        }
    }

    /// Run the pipeline over all current reports and persist a run.
    pub async fn process(&self) -> Result<RunSummary> {
        let fetched = self
            .reports
            .fetch_all()
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .context("fetching reports")?;

        let (valid, skipped) = partition_valid(fetched);
        info!(
            reports = valid.len(),
            skipped,
            "Starting clustering run"
        );

        let labels = if valid.is_empty() {
            Vec::new()
        } else {
            let feature_set = build_features(&valid);
            let labels = cluster_reports(
                &feature_set,
                &DbscanParams {
                    eps_meters: self.config.eps_meters,
                    min_samples: self.config.min_samples,
                },
            );
            split_clusters_through_time(&labels, &valid, self.config.max_time_gap_days)
        };

        let mut identity_manager = IdentityManager::from_store(&self.store);
        let identity_map = identity_manager.assign(&labels, &valid);

        // Invariant: every non-noise label resolves to an identity. A miss
        // here is a programming error; failing now keeps the store clean.
        for &label in &labels {
            if label != NOISE_LABEL && !identity_map.contains_key(&label) {
                bail!("label {label} missing from identity map");
            }
        }

        let noise = labels.iter().filter(|&&l| l == NOISE_LABEL).count();
        let windows = compute_snapshots(&labels, &valid, &identity_map, self.config.timedelta_days);
        let total_clusters: usize = windows.iter().map(|w| w.snapshots.len()).sum();
        info!(
            clusters = identity_map.len(),
            noise,
            windows = windows.len(),
            snapshots = total_clusters,
            "Clustering complete"
        );

        let observed: Vec<_> = windows
            .iter()
            .flat_map(|w| w.snapshots.iter().cloned())
            .collect();
        let predictions = predict_future_snapshots(
            &observed,
            &ForecastParams {
                steps: self.config.forecast_steps,
                max_lags: 1,
                min_observations: self.config.min_observations,
            },
        );

        let reports_map = cluster_reports_map(&labels, &valid, &identity_map);
        let mut parameters = serde_json::Map::new();
        parameters.insert("timedelta_days".to_string(), json!(self.config.timedelta_days));
        parameters.insert("forecast_steps".to_string(), json!(self.config.forecast_steps));
        parameters.insert(
            "min_observations".to_string(),
            json!(self.config.min_observations),
        );
        parameters.insert(
            "identity_map".to_string(),
            json!(identity_map
                .iter()
                .map(|(label, id)| (label.to_string(), id.clone()))
                .collect::<BTreeMap<String, String>>()),
        );

        let run_id = self
            .store
            .put_run(
                &windows,
                &predictions,
                &identity_map,
                &reports_map,
                RunParams {
                    total_reports: valid.len(),
                    eps_meters: self.config.eps_meters,
                    min_samples: self.config.min_samples,
                    max_time_gap_days: self.config.max_time_gap_days,
                    parameters,
                },
                identity_manager.counter(),
            )
            .context("persisting run")?;

        Ok(RunSummary {
            run_id,
            total_reports: valid.len(),
            total_clusters,
            skipped_reports: skipped,
            snapshot_windows: windows.len(),
            predictions: predictions.len(),
        })
    }
}

/// Drop reports with malformed embeddings, logging each one. Never aborts
/// the run.
fn partition_valid(reports: Vec<Report>) -> (Vec<Report>, usize) {
    let total = reports.len();
    let valid: Vec<Report> = reports
        .into_iter()
        .filter(|r| {
            if r.has_valid_embedding() {
                true
            } else {
                warn!(report_id = r.id, "Skipping report with malformed embedding");
                false
            }
        })
        .collect();
    let skipped = total - valid.len();
    (valid, skipped)
}

/// Invert the identity map over the labeled reports: persistent cluster id
/// -> member report ids, the structure next run's matching consumes.
fn cluster_reports_map(
    labels: &[i64],
    reports: &[Report],
    identity_map: &crate::types::IdentityMap,
) -> ClusterReportsMap {
    let mut map = ClusterReportsMap::new();
    for (&label, report) in labels.iter().zip(reports) {
        if label == NOISE_LABEL {
            continue;
        }
        if let Some(cluster_id) = identity_map.get(&label) {
            map.entry(cluster_id.clone()).or_default().push(report.id);
        }
    }
    map
}

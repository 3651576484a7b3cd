//! Persistent cluster identity
//!
//! Run-local integer labels are meaningless across recomputations, so every
//! run's clusters are matched against the previous run's membership by
//! report overlap. A matched cluster inherits the stored id; everything else
//! gets a fresh `cluster_<n>` from a counter persisted with the run.
//!
//! Matching is greedy in ascending label order. After a temporal split the
//! earliest segment carries the pre-split (smallest) label, so it is matched
//! first and keeps the prior identity; later segments mint fresh ids.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::storage::RunStore;
use crate::types::{ClusterReportsMap, IdentityMap, Report, NOISE_LABEL};

/// Minimum Jaccard overlap for a new cluster to inherit a stored id.
/// Fixed by contract, not operator-tunable.
const OVERLAP_THRESHOLD: f64 = 0.30;

/// Assigns stable string identifiers to run-local cluster labels.
pub struct IdentityManager {
    counter: u64,
    previous: ClusterReportsMap,
}

impl IdentityManager {
    /// Build from an explicit prior state (tests, replays).
    pub fn new(counter: u64, previous: ClusterReportsMap) -> Self {
        Self { counter, previous }
    }

    /// Load prior state from the store.
    ///
    /// A store failure degrades to "mint all fresh": the run still completes,
    /// continuity is lost for one cycle, and the operator sees a warning.
    pub fn from_store(store: &RunStore) -> Self {
        let counter = match store.cluster_counter() {
            Ok(counter) => counter,
            Err(e) => {
                warn!(error = %e, "Cluster counter unavailable, starting from 0");
                0
            }
        };
        let previous = match store.get_identity_map() {
            Ok((_, reports_map)) => reports_map,
            Err(e) => {
                warn!(error = %e, "Previous cluster membership unavailable, minting fresh ids");
                ClusterReportsMap::new()
            }
        };
        Self { counter, previous }
    }

    /// Map every non-noise label to a persistent cluster id.
    ///
    /// Each stored id is claimable at most once per run; candidates are
    /// scored by Jaccard overlap with ties broken toward the
    /// lexicographically smallest id.
    pub fn assign(&mut self, labels: &[i64], reports: &[Report]) -> IdentityMap {
        debug_assert_eq!(labels.len(), reports.len());

        let mut clusters: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for (&label, report) in labels.iter().zip(reports) {
            if label != NOISE_LABEL {
                clusters.entry(label).or_default().insert(report.id);
            }
        }

        let mut identity = IdentityMap::new();
        let mut claimed: BTreeSet<String> = BTreeSet::new();

        for (label, report_ids) in &clusters {
            let matched = self
                .best_match(report_ids, &claimed)
                .map(|(id, overlap)| (id.to_string(), overlap));
            let cluster_id = match matched {
                Some((id, overlap)) => {
                    debug!(label, cluster_id = %id, overlap, "Cluster matched to stored identity");
                    claimed.insert(id.clone());
                    id
                }
                None => {
                    let fresh = self.mint();
                    debug!(label, cluster_id = %fresh, "Minted fresh cluster identity");
                    fresh
                }
            };
            identity.insert(*label, cluster_id);
        }

        identity
    }

    /// Counter value after any minting this run; persisted atomically with
    /// the run write.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn mint(&mut self) -> String {
        let id = format!("cluster_{}", self.counter);
        self.counter += 1;
        id
    }

    /// Best unclaimed stored cluster by Jaccard overlap, if any clears the
    /// threshold. Iteration over the map is lexicographic, and the
    /// comparison is strict, so equal scores resolve to the smallest id.
    fn best_match<'a>(
        &'a self,
        report_ids: &BTreeSet<i64>,
        claimed: &BTreeSet<String>,
    ) -> Option<(&'a str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (cluster_id, prev_ids) in &self.previous {
            if claimed.contains(cluster_id) {
                continue;
            }
            let prev: BTreeSet<i64> = prev_ids.iter().copied().collect();
            let overlap = report_ids.intersection(&prev).count() as f64;
            let union = report_ids.union(&prev).count() as f64;
            if union == 0.0 {
                continue;
            }
            let jaccard = overlap / union;
            if jaccard > OVERLAP_THRESHOLD && best.map_or(true, |(_, b)| jaccard > b) {
                best = Some((cluster_id.as_str(), jaccard));
            }
        }
        best
    }
}

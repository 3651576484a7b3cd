//! Versioned run persistence
//!
//! Every pipeline invocation is stored as a `run`: the run record with its
//! parameters and totals, the full set of snapshots and predictions, and the
//! identity artifacts (label -> cluster id, cluster id -> report ids) the
//! next run matches against.
//!
//! Sled layout, one tree per record kind, JSON values:
//! - `runs`:            `run_id(BE u64)` -> RunRecord
//! - `snapshots`:       `run_id ++ seq(BE u32)` -> SnapshotRow
//! - `predictions`:     `run_id ++ seq` -> PredictedSnapshot
//! - `cluster_mappings`:`run_id ++ seq` -> MappingRow
//! - `cluster_reports`: `run_id ++ seq` -> ClusterReportsRow
//! - `meta`:            run-id allocator and cluster-id counter
//!
//! Write ordering inside `put_run`: rows first, the run record (status
//! `completed`) last. Readers skip runs without a completed record, so a
//! crash mid-write leaves nothing visible. `put_run` and `retain` serialize
//! on an internal lock so retention can never delete an in-flight run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{
    ClusterReportsMap, ClusterSnapshot, IdentityMap, PredictedSnapshot, RunRecord, RunStatus,
    TimedeltaSnapshot,
};

/// Storage error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One persisted cluster snapshot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRow {
    timedelta_days: i64,
    snapshot: ClusterSnapshot,
}

/// One persisted label -> cluster id row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingRow {
    label: i64,
    cluster_id: String,
    created_at: DateTime<Utc>,
}

/// One persisted cluster id -> report ids row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClusterReportsRow {
    cluster_id: String,
    report_ids: Vec<i64>,
    created_at: DateTime<Utc>,
}

/// Parameters recorded with a run.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub total_reports: usize,
    pub eps_meters: f64,
    pub min_samples: usize,
    pub max_time_gap_days: i64,
    /// Free-form provenance (window width, forecast settings, identity map).
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

const NEXT_RUN_ID_KEY: &[u8] = b"next_run_id";
const CLUSTER_COUNTER_KEY: &[u8] = b"cluster_id_counter";

/// Versioned persistence for clustering runs.
pub struct RunStore {
    runs: sled::Tree,
    snapshots: sled::Tree,
    predictions: sled::Tree,
    mappings: sled::Tree,
    cluster_reports: sled::Tree,
    meta: sled::Tree,
    /// Serializes `put_run` against `retain`.
    write_lock: Mutex<()>,
}

impl RunStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(&sled::open(path)?)
    }

    /// Open an in-memory store (tests and ephemeral runs).
    pub fn open_temp() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            runs: db.open_tree("runs")?,
            snapshots: db.open_tree("snapshots")?,
            predictions: db.open_tree("predictions")?,
            mappings: db.open_tree("cluster_mappings")?,
            cluster_reports: db.open_tree("cluster_reports")?,
            meta: db.open_tree("meta")?,
            write_lock: Mutex::new(()),
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Persist a complete run. Returns the allocated run id.
    ///
    /// Rows are written before the run record, which carries
    /// `status = completed`; readers ignore runs without that record, so the
    /// write is all-or-nothing from their perspective.
    pub fn put_run(
        &self,
        timedelta_snapshots: &[TimedeltaSnapshot],
        predictions: &[PredictedSnapshot],
        identity_map: &IdentityMap,
        reports_map: &ClusterReportsMap,
        params: RunParams,
        cluster_counter: u64,
    ) -> Result<u64, StoreError> {
        let _guard = self.lock_writes();
        let run_id = self.allocate_run_id()?;
        let created_at = Utc::now();

        let mut seq: u32 = 0;
        for window in timedelta_snapshots {
            for snapshot in &window.snapshots {
                let row = SnapshotRow {
                    timedelta_days: window.timedelta_days,
                    snapshot: snapshot.clone(),
                };
                self.snapshots
                    .insert(row_key(run_id, seq), serde_json::to_vec(&row)?)?;
                seq += 1;
            }
        }

        for (i, prediction) in predictions.iter().enumerate() {
            self.predictions
                .insert(row_key(run_id, i as u32), serde_json::to_vec(prediction)?)?;
        }

        for (i, (&label, cluster_id)) in identity_map.iter().enumerate() {
            let row = MappingRow {
                label,
                cluster_id: cluster_id.clone(),
                created_at,
            };
            self.mappings
                .insert(row_key(run_id, i as u32), serde_json::to_vec(&row)?)?;
        }

        for (i, (cluster_id, report_ids)) in reports_map.iter().enumerate() {
            let row = ClusterReportsRow {
                cluster_id: cluster_id.clone(),
                report_ids: report_ids.clone(),
                created_at,
            };
            self.cluster_reports
                .insert(row_key(run_id, i as u32), serde_json::to_vec(&row)?)?;
        }

        self.advance_counter_locked(cluster_counter)?;

        let total_clusters = timedelta_snapshots
            .iter()
            .map(|w| w.snapshots.len())
            .sum::<usize>();
        let record = RunRecord {
            run_id,
            created_at,
            total_reports: params.total_reports,
            total_clusters,
            eps_meters: params.eps_meters,
            min_samples: params.min_samples,
            max_time_gap_days: params.max_time_gap_days,
            parameters: params.parameters,
            status: RunStatus::Completed,
        };
        self.runs
            .insert(run_id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        self.runs.flush()?;

        info!(
            run_id,
            total_clusters,
            total_reports = record.total_reports,
            predictions = predictions.len(),
            "Stored clustering run"
        );
        Ok(run_id)
    }

    /// Advance the persistent cluster-id counter. Monotonic: a value below
    /// the stored one is ignored, so concurrent runs can leave id gaps but
    /// never regress into collisions.
    pub fn advance_counter(&self, next: u64) -> Result<(), StoreError> {
        let _guard = self.lock_writes();
        self.advance_counter_locked(next)
    }

    fn advance_counter_locked(&self, next: u64) -> Result<(), StoreError> {
        let current = read_counter(&self.meta)?;
        if next > current {
            self.meta
                .insert(CLUSTER_COUNTER_KEY, next.to_be_bytes().to_vec())?;
        }
        Ok(())
    }

    /// Purge all but the most recent `keep` runs. Cascades to snapshots,
    /// predictions and identity rows. Returns the number of purged runs.
    pub fn retain(&self, keep: usize) -> Result<usize, StoreError> {
        let _guard = self.lock_writes();

        let mut run_ids: Vec<u64> = Vec::new();
        for item in self.runs.iter() {
            let (key, _) = item?;
            run_ids.push(key_to_run_id(&key));
        }
        run_ids.sort_unstable_by(|a, b| b.cmp(a));

        let purged: Vec<u64> = run_ids.into_iter().skip(keep).collect();
        for &run_id in &purged {
            self.runs.remove(run_id.to_be_bytes())?;
            for tree in [
                &self.snapshots,
                &self.predictions,
                &self.mappings,
                &self.cluster_reports,
            ] {
                let keys: Vec<sled::IVec> = tree
                    .scan_prefix(run_id.to_be_bytes())
                    .keys()
                    .collect::<Result<_, _>>()?;
                for key in keys {
                    tree.remove(key)?;
                }
            }
        }
        self.runs.flush()?;

        debug!(purged = purged.len(), keep, "Retention pass complete");
        Ok(purged.len())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Snapshots of the latest completed run, grouped by window (newest
    /// window first). Empty when no completed run exists.
    pub fn get_latest(&self) -> Result<Vec<TimedeltaSnapshot>, StoreError> {
        match self.latest_completed_run_id()? {
            Some(run_id) => self.load_windows(run_id),
            None => Ok(Vec::new()),
        }
    }

    /// Snapshots of a specific run, or `None` when the run does not exist
    /// or never completed.
    pub fn get_run(&self, run_id: u64) -> Result<Option<Vec<TimedeltaSnapshot>>, StoreError> {
        match self.read_run_record(run_id)? {
            Some(record) if record.status == RunStatus::Completed => {
                Ok(Some(self.load_windows(run_id)?))
            }
            _ => Ok(None),
        }
    }

    /// Predictions of the latest completed run.
    pub fn get_latest_predictions(&self) -> Result<Vec<PredictedSnapshot>, StoreError> {
        let Some(run_id) = self.latest_completed_run_id()? else {
            return Ok(Vec::new());
        };
        let mut predictions = Vec::new();
        for item in self.predictions.scan_prefix(run_id.to_be_bytes()) {
            let (_, value) = item?;
            predictions.push(serde_json::from_slice(&value)?);
        }
        Ok(predictions)
    }

    /// The last `limit` run records, newest first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        let mut records = Vec::new();
        for item in self.runs.iter().rev() {
            if records.len() >= limit {
                break;
            }
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Identity artifacts of the latest completed run. Both maps are empty
    /// iff no completed run exists.
    pub fn get_identity_map(&self) -> Result<(IdentityMap, ClusterReportsMap), StoreError> {
        let Some(run_id) = self.latest_completed_run_id()? else {
            return Ok((IdentityMap::new(), ClusterReportsMap::new()));
        };

        let mut identity = IdentityMap::new();
        for item in self.mappings.scan_prefix(run_id.to_be_bytes()) {
            let (_, value) = item?;
            let row: MappingRow = serde_json::from_slice(&value)?;
            identity.insert(row.label, row.cluster_id);
        }

        let mut reports = ClusterReportsMap::new();
        for item in self.cluster_reports.scan_prefix(run_id.to_be_bytes()) {
            let (_, value) = item?;
            let row: ClusterReportsRow = serde_json::from_slice(&value)?;
            reports.insert(row.cluster_id, row.report_ids);
        }

        Ok((identity, reports))
    }

    /// Current value of the cluster-id counter.
    pub fn cluster_counter(&self) -> Result<u64, StoreError> {
        read_counter(&self.meta)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means another writer panicked mid-run; the
        // store itself stays consistent because run records are written last.
        self.write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn allocate_run_id(&self) -> Result<u64, StoreError> {
        let next = match self.meta.get(NEXT_RUN_ID_KEY)? {
            Some(raw) => ivec_to_u64(&raw) + 1,
            None => 1,
        };
        self.meta.insert(NEXT_RUN_ID_KEY, next.to_be_bytes().to_vec())?;
        Ok(next)
    }

    fn read_run_record(&self, run_id: u64) -> Result<Option<RunRecord>, StoreError> {
        match self.runs.get(run_id.to_be_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Highest run id with a completed record.
    fn latest_completed_run_id(&self) -> Result<Option<u64>, StoreError> {
        for item in self.runs.iter().rev() {
            let (key, value) = item?;
            let record: RunRecord = serde_json::from_slice(&value)?;
            if record.status == RunStatus::Completed {
                return Ok(Some(key_to_run_id(&key)));
            }
        }
        Ok(None)
    }

    /// Load a run's snapshot rows and regroup them by window, newest first.
    fn load_windows(&self, run_id: u64) -> Result<Vec<TimedeltaSnapshot>, StoreError> {
        let mut grouped: BTreeMap<(DateTime<Utc>, DateTime<Utc>), (i64, Vec<ClusterSnapshot>)> =
            BTreeMap::new();
        for item in self.snapshots.scan_prefix(run_id.to_be_bytes()) {
            let (_, value) = item?;
            let row: SnapshotRow = serde_json::from_slice(&value)?;
            let key = (
                row.snapshot.time_window_start,
                row.snapshot.time_window_end,
            );
            grouped
                .entry(key)
                .or_insert_with(|| (row.timedelta_days, Vec::new()))
                .1
                .push(row.snapshot);
        }

        Ok(grouped
            .into_iter()
            .rev()
            .map(|((start, end), (timedelta_days, snapshots))| TimedeltaSnapshot {
                timedelta_days,
                time_window_start: start,
                time_window_end: end,
                snapshots,
            })
            .collect())
    }
}

fn row_key(run_id: u64, seq: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&run_id.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn key_to_run_id(key: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&key[..8]);
    u64::from_be_bytes(raw)
}

fn ivec_to_u64(raw: &sled::IVec) -> u64 {
    let mut bytes = [0u8; 8];
    let n = raw.len().min(8);
    bytes[..n].copy_from_slice(&raw[..n]);
    u64::from_be_bytes(bytes)
}

fn read_counter(meta: &sled::Tree) -> Result<u64, StoreError> {
    Ok(meta
        .get(CLUSTER_COUNTER_KEY)?
        .map_or(0, |raw| ivec_to_u64(&raw)))
}

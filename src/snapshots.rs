//! Per-window cluster snapshots
//!
//! Clusters span multiple time windows, so their state is projected onto
//! fixed-width windows: reports are grouped by `(label, window)` and each
//! group is aggregated into a [`ClusterSnapshot`]. Windows are half-open
//! `[start, start + timedelta_days)` with the start truncated to the hour
//! rather than the day, so intra-day drift stays visible.

use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::geometry;
use crate::types::{ClusterSnapshot, IdentityMap, Report, TimedeltaSnapshot, NOISE_LABEL};

/// Truncate a timestamp to the start of its hour.
fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Project labeled reports into per-window cluster snapshots, grouped by
/// window into [`TimedeltaSnapshot`]s (newest window first).
///
/// Noise reports are ignored. A label missing from the identity map gets
/// the literal `temp_<label>` id; the pipeline treats that as an invariant
/// violation before anything is persisted, so the fallback only surfaces in
/// ad-hoc invocations.
pub fn compute_snapshots(
    labels: &[i64],
    reports: &[Report],
    identity_map: &IdentityMap,
    timedelta_days: i64,
) -> Vec<TimedeltaSnapshot> {
    debug_assert_eq!(labels.len(), reports.len());

    let mut groups: BTreeMap<(i64, DateTime<Utc>), Vec<&Report>> = BTreeMap::new();
    for (&label, report) in labels.iter().zip(reports) {
        if label == NOISE_LABEL {
            continue;
        }
        let window_start = truncate_to_hour(report.timestamp);
        groups.entry((label, window_start)).or_default().push(report);
    }

    let mut windows: BTreeMap<DateTime<Utc>, Vec<ClusterSnapshot>> = BTreeMap::new();
    for ((label, window_start), members) in groups {
        let cluster_id = identity_map
            .get(&label)
            .cloned()
            .unwrap_or_else(|| format!("temp_{label}"));
        let snapshot = build_snapshot(
            cluster_id,
            window_start,
            window_start + Duration::days(timedelta_days),
            &members,
        );
        windows.entry(window_start).or_default().push(snapshot);
    }

    windows
        .into_iter()
        .rev()
        .map(|(window_start, snapshots)| TimedeltaSnapshot {
            timedelta_days,
            time_window_start: window_start,
            time_window_end: window_start + Duration::days(timedelta_days),
            snapshots,
        })
        .collect()
}

/// Aggregate one `(label, window)` group.
fn build_snapshot(
    cluster_id: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    members: &[&Report],
) -> ClusterSnapshot {
    let positions: Vec<(f64, f64)> = members.iter().map(|r| (r.lat, r.lon)).collect();
    let centroid = geometry::geographic_centroid(&positions);

    let avg_embedding = mean_embedding(members);

    let mut symptom_sets = members
        .iter()
        .map(|r| r.symptoms.keys().cloned().collect::<BTreeSet<String>>());
    let common_symptoms = symptom_sets
        .next()
        .map(|first| {
            symptom_sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
        })
        .unwrap_or_default();

    ClusterSnapshot {
        cluster_id,
        time_window_start: window_start,
        time_window_end: window_end,
        centroid,
        avg_embedding,
        report_ids: members.iter().map(|r| r.id).collect(),
        common_symptoms,
        reports: members.iter().map(|&r| r.clone()).collect(),
    }
}

/// Elementwise arithmetic mean of member embeddings.
fn mean_embedding(members: &[&Report]) -> Vec<f64> {
    let Some(first) = members.first() else {
        return Vec::new();
    };
    let dim = first.embedding.len();
    let mut sum = vec![0.0; dim];
    for member in members {
        for (acc, &v) in sum.iter_mut().zip(&member.embedding) {
            *acc += v;
        }
    }
    let n = members.len() as f64;
    sum.iter_mut().for_each(|v| *v /= n);
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;
    use chrono::TimeZone;

    fn report_at(id: i64, day: u32, hour: u32, minute: u32) -> Report {
        Report {
            id,
            timestamp: Utc
                .with_ymd_and_hms(2025, 6, day, hour, minute, 30)
                .single()
                .unwrap(),
            lat: 40.7128,
            lon: -74.0060,
            symptoms: [("fever".to_string(), 2), ("cough".to_string(), 1)]
                .into_iter()
                .collect(),
            embedding: vec![0.5; EMBEDDING_DIM],
            utm_x: 0.0,
            utm_y: 0.0,
        }
    }

    fn identity(pairs: &[(i64, &str)]) -> IdentityMap {
        pairs.iter().map(|(l, id)| (*l, (*id).to_string())).collect()
    }

    #[test]
    fn test_window_start_truncates_to_hour() {
        let reports = vec![report_at(1, 1, 9, 45)];
        let windows = compute_snapshots(&[0], &reports, &identity(&[(0, "cluster_0")]), 1);
        assert_eq!(windows.len(), 1);
        assert_eq!(
            windows[0].time_window_start,
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).single().unwrap()
        );
        assert_eq!(
            windows[0].time_window_end,
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).single().unwrap()
        );
    }

    #[test]
    fn test_same_hour_reports_share_snapshot() {
        let reports = vec![report_at(1, 1, 9, 5), report_at(2, 1, 9, 55)];
        let windows = compute_snapshots(&[0, 0], &reports, &identity(&[(0, "cluster_0")]), 1);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].snapshots.len(), 1);
        assert_eq!(windows[0].snapshots[0].report_ids, vec![1, 2]);
    }

    #[test]
    fn test_noise_excluded_and_labels_separated() {
        let reports = vec![
            report_at(1, 1, 9, 0),
            report_at(2, 1, 9, 10),
            report_at(3, 1, 9, 20),
        ];
        let windows = compute_snapshots(
            &[0, 1, NOISE_LABEL],
            &reports,
            &identity(&[(0, "cluster_0"), (1, "cluster_1")]),
            1,
        );
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].snapshots.len(), 2);
        let total_ids: usize = windows[0].snapshots.iter().map(|s| s.report_ids.len()).sum();
        assert_eq!(total_ids, 2, "noise report 3 never appears");
    }

    #[test]
    fn test_avg_embedding_is_elementwise_mean() {
        let mut a = report_at(1, 1, 9, 0);
        let mut b = report_at(2, 1, 9, 10);
        a.embedding = vec![1.0; EMBEDDING_DIM];
        b.embedding = vec![0.0; EMBEDDING_DIM];
        let windows = compute_snapshots(&[0, 0], &[a, b], &identity(&[(0, "cluster_0")]), 1);
        let snapshot = &windows[0].snapshots[0];
        assert!(snapshot.avg_embedding.iter().all(|&v| (v - 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_common_symptoms_is_intersection() {
        let mut a = report_at(1, 1, 9, 0);
        let mut b = report_at(2, 1, 9, 10);
        a.symptoms = [("fever".to_string(), 2), ("cough".to_string(), 1)]
            .into_iter()
            .collect();
        b.symptoms = [("fever".to_string(), 3), ("nausea".to_string(), 2)]
            .into_iter()
            .collect();
        let windows = compute_snapshots(&[0, 0], &[a, b], &identity(&[(0, "cluster_0")]), 1);
        let snapshot = &windows[0].snapshots[0];
        assert_eq!(
            snapshot.common_symptoms,
            BTreeSet::from(["fever".to_string()])
        );
    }

    #[test]
    fn test_single_member_keeps_full_symptom_set() {
        let reports = vec![report_at(1, 1, 9, 0)];
        let windows = compute_snapshots(&[0], &reports, &identity(&[(0, "cluster_0")]), 1);
        assert_eq!(
            windows[0].snapshots[0].common_symptoms,
            BTreeSet::from(["cough".to_string(), "fever".to_string()])
        );
    }

    #[test]
    fn test_missing_identity_falls_back_to_temp_label() {
        let reports = vec![report_at(1, 1, 9, 0)];
        let windows = compute_snapshots(&[4], &reports, &IdentityMap::new(), 1);
        assert_eq!(windows[0].snapshots[0].cluster_id, "temp_4");
    }

    #[test]
    fn test_windows_ordered_newest_first() {
        let reports = vec![report_at(1, 1, 9, 0), report_at(2, 3, 9, 0)];
        let windows = compute_snapshots(&[0, 0], &reports, &identity(&[(0, "cluster_0")]), 1);
        assert_eq!(windows.len(), 2);
        assert!(windows[0].time_window_start > windows[1].time_window_start);
    }

    #[test]
    fn test_centroid_matches_member_positions() {
        let mut a = report_at(1, 1, 9, 0);
        let mut b = report_at(2, 1, 9, 10);
        a.lat = 40.0;
        a.lon = -74.0;
        b.lat = 41.0;
        b.lon = -74.0;
        let windows = compute_snapshots(&[0, 0], &[a, b], &identity(&[(0, "cluster_0")]), 1);
        let centroid = windows[0].snapshots[0].centroid;
        assert!((centroid[0] - 40.5).abs() < 0.01);
        assert!((centroid[1] - -74.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_input_yields_no_windows() {
        let windows = compute_snapshots(&[], &[], &IdentityMap::new(), 1);
        assert!(windows.is_empty());
    }
}

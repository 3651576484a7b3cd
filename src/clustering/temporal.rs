//! Temporal cluster splitting
//!
//! A density cluster can be spatially coherent yet temporally discontinuous,
//! e.g. an outbreak recurring at the same location months later. Snapshots
//! and identity tracking must not fuse such episodes, so any cluster with an
//! internal time gap above the threshold is cut into time-contiguous
//! segments. The first segment keeps the original label; later segments get
//! fresh labels past the current maximum.

use chrono::Duration;
use std::collections::BTreeMap;

use crate::types::{Report, NOISE_LABEL};

/// Split clusters whose member reports have consecutive time gaps strictly
/// greater than `max_time_gap_days`. Noise points are untouched; the output
/// has the same length as `labels`.
///
/// A threshold of zero days splits at every gap, however small.
pub fn split_clusters_through_time(
    labels: &[i64],
    reports: &[Report],
    max_time_gap_days: i64,
) -> Vec<i64> {
    debug_assert_eq!(labels.len(), reports.len());

    // Member indices per cluster, ordered by timestamp.
    let mut members: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        if label != NOISE_LABEL {
            members.entry(label).or_default().push(idx);
        }
    }
    for indices in members.values_mut() {
        indices.sort_by_key(|&i| reports[i].timestamp);
    }

    let max_gap = Duration::days(max_time_gap_days);
    let mut new_labels = labels.to_vec();
    let mut next_label = labels.iter().copied().max().unwrap_or(NOISE_LABEL) + 1;

    for (_, indices) in members {
        let mut current: Option<i64> = None; // None = first segment keeps its label
        for pair in indices.windows(2) {
            let gap = reports[pair[1]].timestamp - reports[pair[0]].timestamp;
            if gap > max_gap {
                current = Some(next_label);
                next_label += 1;
            }
            if let Some(fresh) = current {
                new_labels[pair[1]] = fresh;
            }
        }
    }

    new_labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn report_on_day(id: i64, day: u32) -> Report {
        Report {
            id,
            timestamp: Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).single().unwrap(),
            lat: 40.0,
            lon: -74.0,
            symptoms: BTreeMap::new(),
            embedding: vec![0.0; EMBEDDING_DIM],
            utm_x: 0.0,
            utm_y: 0.0,
        }
    }

    #[test]
    fn test_no_split_within_threshold() {
        let reports = vec![report_on_day(1, 1), report_on_day(2, 5), report_on_day(3, 10)];
        let labels = vec![0, 0, 0];
        assert_eq!(split_clusters_through_time(&labels, &reports, 14), labels);
    }

    #[test]
    fn test_gap_splits_and_first_segment_keeps_label() {
        let reports = vec![
            report_on_day(1, 1),
            report_on_day(2, 2),
            report_on_day(3, 25),
            report_on_day(4, 26),
        ];
        let labels = vec![0, 0, 0, 0];
        let out = split_clusters_through_time(&labels, &reports, 14);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 0);
        assert_eq!(out[2], 1);
        assert_eq!(out[3], 1);
    }

    #[test]
    fn test_multiple_gaps_mint_sequential_labels() {
        let reports = vec![
            report_on_day(1, 1),
            report_on_day(2, 10),
            report_on_day(3, 20),
        ];
        let labels = vec![0, 0, 0];
        let out = split_clusters_through_time(&labels, &reports, 5);
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn test_fresh_labels_start_past_global_max() {
        // Cluster 0 splits; cluster 3 exists, so the new segment must be 4.
        let reports = vec![
            report_on_day(1, 1),
            report_on_day(2, 25),
            report_on_day(3, 1),
        ];
        let labels = vec![0, 0, 3];
        let out = split_clusters_through_time(&labels, &reports, 14);
        assert_eq!(out, vec![0, 4, 3]);
    }

    #[test]
    fn test_noise_is_untouched() {
        let reports = vec![report_on_day(1, 1), report_on_day(2, 30)];
        let labels = vec![NOISE_LABEL, NOISE_LABEL];
        let out = split_clusters_through_time(&labels, &reports, 14);
        assert_eq!(out, labels);
    }

    #[test]
    fn test_zero_threshold_splits_every_gap() {
        // Sub-day gaps split too when the threshold is zero.
        let mut reports = vec![report_on_day(1, 1), report_on_day(2, 1)];
        reports[1].timestamp = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).single().unwrap();
        let labels = vec![0, 0];
        let out = split_clusters_through_time(&labels, &reports, 0);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 1);
    }

    #[test]
    fn test_unsorted_input_split_by_time_order() {
        // Membership order in the label vector is not time order; the split
        // must follow timestamps.
        let reports = vec![
            report_on_day(1, 25),
            report_on_day(2, 1),
            report_on_day(3, 26),
        ];
        let labels = vec![0, 0, 0];
        let out = split_clusters_through_time(&labels, &reports, 14);
        assert_eq!(out[1], 0, "earliest report keeps the label");
        assert_eq!(out[0], 1);
        assert_eq!(out[2], 1);
    }
}

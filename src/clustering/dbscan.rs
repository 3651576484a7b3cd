//! Density-based clustering under a composite spatial+semantic metric
//!
//! Canonical DBSCAN over the feature matrix from [`super::features`]. The
//! metric is a weighted sum rather than a max so that strong similarity on
//! one axis can partially compensate small dissimilarity on the other; on
//! sparse inputs this produces fewer spurious singletons.
//!
//! ```text
//! d(x, y) = 0.1 * (spatial_dist_m(x, y) / 1000) + 0.5 * cosine_dist(emb(x), emb(y))
//! ```
//!
//! The radius is `eps = 0.1 * (eps_meters / 1000)`, so `eps_meters` stays an
//! operator-facing quantity in meters.

use super::features::FeatureSet;
use crate::types::NOISE_LABEL;

/// Clustering parameters.
#[derive(Debug, Clone, Copy)]
pub struct DbscanParams {
    /// Spatial band of the composite metric, in meters.
    pub eps_meters: f64,
    /// Neighborhood size (the point itself included) required for a core
    /// point.
    pub min_samples: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            eps_meters: 5000.0,
            min_samples: 3,
        }
    }
}

/// Cluster the feature matrix, returning one label per row with
/// [`NOISE_LABEL`] for noise. Fewer rows than `min_samples` yields all
/// noise; this is not an error.
pub fn cluster_reports(set: &FeatureSet, params: &DbscanParams) -> Vec<i64> {
    let n = set.features.len();
    let mut labels = vec![NOISE_LABEL; n];
    if n == 0 {
        return labels;
    }

    let eps = 0.1 * (params.eps_meters / 1000.0);
    let range_m = set.scaler.data_range(0);
    let dist = |a: usize, b: usize| composite_distance(&set.features[a], &set.features[b], range_m);

    let region_query = |p: usize| -> Vec<usize> {
        (0..n).filter(|&q| dist(p, q) <= eps).collect()
    };

    let mut visited = vec![false; n];
    let mut next_cluster: i64 = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let neighbors = region_query(i);
        if neighbors.len() < params.min_samples {
            continue; // stays noise unless later claimed as a border point
        }

        labels[i] = next_cluster;
        let mut frontier = neighbors;
        let mut cursor = 0;
        while cursor < frontier.len() {
            let q = frontier[cursor];
            cursor += 1;

            if labels[q] == NOISE_LABEL {
                labels[q] = next_cluster;
            }
            if visited[q] {
                continue;
            }
            visited[q] = true;
            labels[q] = next_cluster;

            let q_neighbors = region_query(q);
            if q_neighbors.len() >= params.min_samples {
                frontier.extend(q_neighbors);
            }
        }

        next_cluster += 1;
    }

    labels
}

/// Composite distance between two feature rows.
///
/// The coordinate part is denormalized back to meters via the scaler's first
/// recorded span before weighting; the embedding part is cosine distance on
/// the weighted embedding subvector (cosine is scale-invariant, so the
/// feature weight does not perturb it).
fn composite_distance(x: &[f64], y: &[f64], coord_range_m: f64) -> f64 {
    let dx = x[0] - y[0];
    let dy = x[1] - y[1];
    let spatial_m = (dx * dx + dy * dy).sqrt() * coord_range_m;
    let cosine = cosine_distance(&x[2..], &y[2..]);
    0.1 * (spatial_m / 1000.0) + 0.5 * cosine
}

/// Cosine distance `1 - cos(a, b)`, with zero-vector handling: two zero
/// vectors are identical (0.0), a zero against a non-zero is maximally
/// dissimilar (1.0).
fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 && norm_b == 0.0 {
        return 0.0;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::features::build_features;
    use crate::types::{Report, EMBEDDING_DIM};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn report(id: i64, utm_x: f64, utm_y: f64, embedding: Vec<f64>) -> Report {
        Report {
            id,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap(),
            lat: 40.0,
            lon: -74.0,
            symptoms: BTreeMap::new(),
            embedding,
            utm_x,
            utm_y,
        }
    }

    fn embedding_axis(axis: usize, sign: f64) -> Vec<f64> {
        let mut e = vec![0.0; EMBEDDING_DIM];
        e[axis] = sign;
        e
    }

    #[test]
    fn test_two_spatial_groups_separate() {
        // Two tight groups 100 km apart with identical embeddings.
        let mut reports = Vec::new();
        for i in 0..3 {
            reports.push(report(i, i as f64 * 100.0, 0.0, embedding_axis(0, 1.0)));
        }
        for i in 3..6 {
            reports.push(report(
                i,
                100_000.0 + i as f64 * 100.0,
                0.0,
                embedding_axis(0, 1.0),
            ));
        }
        let set = build_features(&reports);
        let labels = cluster_reports(&set, &DbscanParams::default());

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert!(labels.iter().all(|&l| l != NOISE_LABEL));
    }

    #[test]
    fn test_opposed_embeddings_separate_despite_colocation() {
        // Same place, semantically opposite reports: cosine distance 2.0
        // contributes 1.0 to the metric, past the default eps of 0.5.
        let mut reports = Vec::new();
        for i in 0..3 {
            reports.push(report(i, i as f64 * 10.0, 0.0, embedding_axis(0, 1.0)));
        }
        for i in 3..6 {
            reports.push(report(i, i as f64 * 10.0, 0.0, embedding_axis(0, -1.0)));
        }
        let set = build_features(&reports);
        let labels = cluster_reports(&set, &DbscanParams::default());

        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[3], labels[4]);
    }

    #[test]
    fn test_fewer_than_min_samples_is_all_noise() {
        let reports = vec![
            report(1, 0.0, 0.0, embedding_axis(0, 1.0)),
            report(2, 10.0, 0.0, embedding_axis(0, 1.0)),
        ];
        let set = build_features(&reports);
        let labels = cluster_reports(&set, &DbscanParams::default());
        assert_eq!(labels, vec![NOISE_LABEL, NOISE_LABEL]);
    }

    #[test]
    fn test_min_samples_one_makes_singletons() {
        // Every point is its own core; isolated points become singleton
        // clusters, never noise.
        let reports = vec![
            report(1, 0.0, 0.0, embedding_axis(0, 1.0)),
            report(2, 500_000.0, 0.0, embedding_axis(1, 1.0)),
            report(3, 1_000_000.0, 0.0, embedding_axis(2, 1.0)),
        ];
        let set = build_features(&reports);
        let labels = cluster_reports(
            &set,
            &DbscanParams {
                eps_meters: 5000.0,
                min_samples: 1,
            },
        );
        assert!(labels.iter().all(|&l| l != NOISE_LABEL));
        let unique: std::collections::BTreeSet<i64> = labels.iter().copied().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_duplicate_reports_cluster_together() {
        let reports: Vec<Report> = (0..4)
            .map(|i| report(i, 100.0, 100.0, embedding_axis(0, 1.0)))
            .collect();
        let set = build_features(&reports);
        let labels = cluster_reports(&set, &DbscanParams::default());
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_empty_input() {
        let set = build_features(&[]);
        assert!(cluster_reports(&set, &DbscanParams::default()).is_empty());
    }

    #[test]
    fn test_cosine_distance_zero_vectors() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
    }
}

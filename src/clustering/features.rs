//! Feature matrix construction
//!
//! Turns a batch of reports into rows of `[scaled_x, scaled_y, weighted
//! embedding...]`. Coordinates are min-max scaled into [0,1] per axis;
//! embeddings are rescaled so both subspaces contribute comparable Euclidean
//! magnitudes under the composite clustering metric.

use statrs::statistics::Statistics;

use crate::types::{Report, EMBEDDING_DIM};

/// Min-max scaler for the projected coordinates.
///
/// Retains the original per-axis spans in meters; the clustering metric uses
/// the first span to denormalize scaled coordinate distances back to meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordScaler {
    mins: [f64; 2],
    ranges: [f64; 2],
}

impl CoordScaler {
    /// Fit to the `(utm_x, utm_y)` pairs of a batch.
    fn fit(reports: &[Report]) -> Self {
        let mut mins = [f64::INFINITY; 2];
        let mut maxs = [f64::NEG_INFINITY; 2];
        for r in reports {
            mins[0] = mins[0].min(r.utm_x);
            mins[1] = mins[1].min(r.utm_y);
            maxs[0] = maxs[0].max(r.utm_x);
            maxs[1] = maxs[1].max(r.utm_y);
        }
        Self {
            mins,
            ranges: [maxs[0] - mins[0], maxs[1] - mins[1]],
        }
    }

    /// Scale one coordinate into [0,1]. A degenerate axis (zero span) maps
    /// to 0.0.
    fn scale(&self, axis: usize, value: f64) -> f64 {
        if self.ranges[axis] > 0.0 {
            (value - self.mins[axis]) / self.ranges[axis]
        } else {
            0.0
        }
    }

    /// Original span of an axis in meters.
    pub fn data_range(&self, axis: usize) -> f64 {
        self.ranges[axis]
    }
}

/// Feature matrix plus the artifacts the clusterer needs alongside it.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    /// One row per report, `2 + EMBEDDING_DIM` columns, input order.
    pub features: Vec<Vec<f64>>,
    pub scaler: CoordScaler,
    /// Report ids parallel to `features`.
    pub report_ids: Vec<i64>,
}

/// Assemble the feature matrix for a batch of reports.
///
/// Callers must have filtered out reports with invalid embeddings
/// ([`Report::has_valid_embedding`]); rows align to the input order.
pub fn build_features(reports: &[Report]) -> FeatureSet {
    let scaler = CoordScaler::fit(reports);

    let scaled_coords: Vec<[f64; 2]> = reports
        .iter()
        .map(|r| [scaler.scale(0, r.utm_x), scaler.scale(1, r.utm_y)])
        .collect();

    // Mean per-axis peak-to-peak of each subspace. Scaled coordinates span
    // [0,1] per non-degenerate axis, so spatial_range is 1.0 in the common
    // case; the embedding span is whatever the model produces.
    let spatial_range = mean_ptp(&scaled_coords, 2, |row, axis| row[axis]);
    let embedding_range = mean_ptp(reports, EMBEDDING_DIM, |r, axis| r.embedding[axis]);
    let weight = if embedding_range > 0.0 {
        spatial_range / embedding_range
    } else {
        1.0
    };

    let features = reports
        .iter()
        .zip(&scaled_coords)
        .map(|(r, coords)| {
            let mut row = Vec::with_capacity(2 + EMBEDDING_DIM);
            row.extend_from_slice(coords);
            row.extend(r.embedding.iter().map(|&v| v * weight));
            row
        })
        .collect();

    FeatureSet {
        features,
        scaler,
        report_ids: reports.iter().map(|r| r.id).collect(),
    }
}

/// Mean over axes of the peak-to-peak span of `rows` along each axis.
fn mean_ptp<T>(rows: &[T], axes: usize, value: impl Fn(&T, usize) -> f64) -> f64 {
    if rows.is_empty() || axes == 0 {
        return 0.0;
    }
    let spans = (0..axes).map(|axis| {
        let min = rows
            .iter()
            .map(|r| value(r, axis))
            .fold(f64::INFINITY, f64::min);
        let max = rows
            .iter()
            .map(|r| value(r, axis))
            .fold(f64::NEG_INFINITY, f64::max);
        max - min
    });
    spans.collect::<Vec<f64>>().mean()
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn embedding_with(front: &[f64]) -> Vec<f64> {
        let mut e = vec![0.0; EMBEDDING_DIM];
        e[..front.len()].copy_from_slice(front);
        e
    }

    #[test]
    fn test_rows_align_to_input_order() {
        let reports = vec![
            report(7, 0.0, 0.0, embedding_with(&[1.0])),
            report(3, 1000.0, 500.0, embedding_with(&[0.5])),
            report(9, 2000.0, 1000.0, embedding_with(&[0.2])),
        ];
        let set = build_features(&reports);
        assert_eq!(set.report_ids, vec![7, 3, 9]);
        assert_eq!(set.features.len(), 3);
        assert_eq!(set.features[0].len(), 2 + EMBEDDING_DIM);
    }

    #[test]
    fn test_coordinates_scaled_to_unit_interval() {
        let reports = vec![
            report(1, 0.0, 0.0, embedding_with(&[1.0])),
            report(2, 4000.0, 2000.0, embedding_with(&[0.0])),
        ];
        let set = build_features(&reports);
        assert!((set.features[0][0] - 0.0).abs() < 1e-12);
        assert!((set.features[1][0] - 1.0).abs() < 1e-12);
        assert!((set.features[1][1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_records_meter_spans() {
        let reports = vec![
            report(1, 100.0, 0.0, embedding_with(&[1.0])),
            report(2, 5100.0, 2000.0, embedding_with(&[0.0])),
        ];
        let set = build_features(&reports);
        assert!((set.scaler.data_range(0) - 5000.0).abs() < 1e-9);
        assert!((set.scaler.data_range(1) - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_embedding_weight_balances_subspaces() {
        // Embedding spans 2.0 on one axis out of 768, so its mean ptp is
        // 2/768; spatial mean ptp is 1.0. The weight stretches the embedding
        // so both subspaces have the same mean span.
        let reports = vec![
            report(1, 0.0, 0.0, embedding_with(&[1.0])),
            report(2, 1000.0, 1000.0, embedding_with(&[-1.0])),
        ];
        let set = build_features(&reports);
        let weighted_span = set.features[0][2] - set.features[1][2];
        let expected = 2.0 * (1.0 / (2.0 / EMBEDDING_DIM as f64));
        assert!((weighted_span - expected).abs() < 1e-9);
    }

    #[test]
    fn test_identical_coordinates_are_degenerate_not_nan() {
        let reports = vec![
            report(1, 500.0, 500.0, embedding_with(&[1.0])),
            report(2, 500.0, 500.0, embedding_with(&[0.0])),
        ];
        let set = build_features(&reports);
        for row in &set.features {
            assert!(row.iter().all(|v| v.is_finite()));
        }
        assert_eq!(set.features[0][0], 0.0);
        assert_eq!(set.features[1][0], 0.0);
    }

    #[test]
    fn test_identical_embeddings_fall_back_to_unit_weight() {
        let reports = vec![
            report(1, 0.0, 0.0, embedding_with(&[0.5])),
            report(2, 1000.0, 0.0, embedding_with(&[0.5])),
        ];
        let set = build_features(&reports);
        assert!((set.features[0][2] - 0.5).abs() < 1e-12);
    }
}

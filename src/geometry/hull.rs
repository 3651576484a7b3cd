//! Cluster boundary geometry
//!
//! Builds the map-ready outline of a cluster snapshot: every member point is
//! buffered by a small radius, the buffered set is convex-hulled, and the
//! hull is smoothed and resampled into a fixed-length closed ring. Degenerate
//! inputs (fewer than three distinct points, collapsed geometry) yield no
//! ring; the caller falls back to a Point feature at the centroid.

use geo::{ChaikinSmoothing, ConvexHull, LineString, MultiPoint, Point};

use crate::types::PredictedSnapshot;

/// Number of vertices in an emitted ring (first == last).
pub const RING_POINTS: usize = 200;

/// Buffer radius around each member point, in degrees.
const BUFFER_RADIUS_DEG: f64 = 0.005;

/// Vertices used to approximate each buffer circle.
const BUFFER_CIRCLE_POINTS: usize = 16;

/// Chaikin corner-cutting passes applied to the hull before resampling.
const SMOOTHING_ITERATIONS: usize = 3;

/// Smoothed convex-hull ring of a set of member positions.
///
/// `points` are `(lat, lon)` pairs; the returned ring is `[lon, lat]`
/// coordinates (GeoJSON order), closed so the first and last vertex are
/// equal. Returns `None` when fewer than three distinct positions exist or
/// the geometry collapses numerically.
pub fn cluster_ring(points: &[(f64, f64)]) -> Option<Vec<[f64; 2]>> {
    let mut distinct: Vec<(f64, f64)> = Vec::new();
    for &p in points {
        if !p.0.is_finite() || !p.1.is_finite() {
            continue;
        }
        if !distinct
            .iter()
            .any(|q| (q.0 - p.0).abs() < 1e-12 && (q.1 - p.1).abs() < 1e-12)
        {
            distinct.push(p);
        }
    }
    if distinct.len() < 3 {
        return None;
    }

    // Buffer each point with a small circle so the hull has area even for
    // near-collinear members.
    let mut buffered: Vec<Point<f64>> = Vec::with_capacity(distinct.len() * BUFFER_CIRCLE_POINTS);
    for &(lat, lon) in &distinct {
        for k in 0..BUFFER_CIRCLE_POINTS {
            let theta = 2.0 * std::f64::consts::PI * k as f64 / BUFFER_CIRCLE_POINTS as f64;
            buffered.push(Point::new(
                lon + BUFFER_RADIUS_DEG * theta.cos(),
                lat + BUFFER_RADIUS_DEG * theta.sin(),
            ));
        }
    }

    let hull = MultiPoint::from(buffered).convex_hull();
    let smoothed = hull.chaikin_smoothing(SMOOTHING_ITERATIONS);
    resample_ring(smoothed.exterior())
}

/// Resample a closed line string to exactly [`RING_POINTS`] vertices spaced
/// evenly along its perimeter.
fn resample_ring(ring: &LineString<f64>) -> Option<Vec<[f64; 2]>> {
    let coords: Vec<_> = ring.coords().copied().collect();
    if coords.len() < 4 {
        return None;
    }

    let mut cumulative = Vec::with_capacity(coords.len());
    let mut total = 0.0;
    cumulative.push(0.0);
    for pair in coords.windows(2) {
        let dx = pair[1].x - pair[0].x;
        let dy = pair[1].y - pair[0].y;
        total += (dx * dx + dy * dy).sqrt();
        cumulative.push(total);
    }
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let mut out = Vec::with_capacity(RING_POINTS);
    let mut seg = 0;
    for k in 0..RING_POINTS - 1 {
        let target = total * k as f64 / (RING_POINTS - 1) as f64;
        while seg + 1 < cumulative.len() - 1 && cumulative[seg + 1] < target {
            seg += 1;
        }
        let seg_len = cumulative[seg + 1] - cumulative[seg];
        let t = if seg_len > 0.0 {
            (target - cumulative[seg]) / seg_len
        } else {
            0.0
        };
        let a = coords[seg];
        let b = coords[seg + 1];
        out.push([a.x + t * (b.x - a.x), a.y + t * (b.y - a.y)]);
    }
    out.push(out[0]);
    Some(out)
}

// ============================================================================
// Predicted-snapshot outline
// ============================================================================

/// Minimum predicted radius in meters.
const PREDICTED_BASE_M: f64 = 300.0;

/// Meters of radius per sqrt(report count).
const PREDICTED_COUNT_SCALE_M: f64 = 120.0;

/// How strongly intensity amplifies the radius.
const PREDICTED_INTENSITY_WEIGHT: f64 = 0.6;

/// Intensity saturation value for normalization.
const PREDICTED_MAX_INTENSITY: f64 = 5.0;

/// Circular outline approximating a predicted cluster.
///
/// The radius grows with `sqrt(report_count)` (area tracks count) and is
/// amplified by normalized intensity. Returns a closed `[lon, lat]` ring.
pub fn predicted_ring(prediction: &PredictedSnapshot) -> Vec<[f64; 2]> {
    let lat = prediction.centroid[0];
    let lon = prediction.centroid[1];

    let count_factor = if prediction.report_count == 0 {
        0.0
    } else {
        f64::from(prediction.report_count).sqrt()
    };
    let intensity_norm = (prediction.intensity / PREDICTED_MAX_INTENSITY).clamp(0.0, 1.0);
    let intensity_factor = 1.0 + PREDICTED_INTENSITY_WEIGHT * intensity_norm;
    let radius_m = PREDICTED_BASE_M + PREDICTED_COUNT_SCALE_M * count_factor * intensity_factor;

    // 1 degree latitude ~ 111,320 m; longitude shrinks with cos(lat).
    let deg_lat = radius_m / 111_320.0;
    let deg_lon = radius_m / (111_320.0 * lat.to_radians().cos().max(1e-6));

    let mut ring = Vec::with_capacity(RING_POINTS);
    for k in 0..RING_POINTS - 1 {
        let theta = 2.0 * std::f64::consts::PI * k as f64 / (RING_POINTS - 1) as f64;
        ring.push([lon + deg_lon * theta.cos(), lat + deg_lat * theta.sin()]);
    }
    ring.push(ring[0]);
    ring
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ny_points(n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| {
                let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                (
                    40.7128 + 0.01 * angle.sin(),
                    -74.0060 + 0.01 * angle.cos(),
                )
            })
            .collect()
    }

    #[test]
    fn test_ring_is_closed_with_fixed_length() {
        let ring = cluster_ring(&ny_points(6)).unwrap();
        assert_eq!(ring.len(), RING_POINTS);
        assert_eq!(ring[0], ring[RING_POINTS - 1]);
    }

    #[test]
    fn test_ring_encloses_members() {
        let points = ny_points(6);
        let ring = cluster_ring(&points).unwrap();
        let min_lon = ring.iter().map(|c| c[0]).fold(f64::INFINITY, f64::min);
        let max_lon = ring.iter().map(|c| c[0]).fold(f64::NEG_INFINITY, f64::max);
        for (_, lon) in points {
            assert!(lon >= min_lon && lon <= max_lon);
        }
    }

    #[test]
    fn test_two_points_yield_no_ring() {
        assert!(cluster_ring(&[(40.0, -74.0), (40.1, -74.1)]).is_none());
    }

    #[test]
    fn test_duplicate_points_collapse_to_none() {
        let p = (40.0, -74.0);
        assert!(cluster_ring(&[p, p, p, p]).is_none());
    }

    #[test]
    fn test_collinear_points_still_produce_ring() {
        // Buffering gives the hull area even when members are collinear.
        let points = vec![(40.0, -74.0), (40.0, -74.01), (40.0, -74.02)];
        let ring = cluster_ring(&points).unwrap();
        assert_eq!(ring.len(), RING_POINTS);
    }

    #[test]
    fn test_predicted_ring_scales_with_count() {
        let base = PredictedSnapshot {
            cluster_id: "cluster_0".to_string(),
            time_window_start: chrono::Utc::now(),
            time_window_end: chrono::Utc::now(),
            centroid: [40.0, -74.0],
            avg_embedding: vec![],
            common_symptoms: BTreeSet::new(),
            report_count: 1,
            intensity: 0.0,
        };
        let mut big = base.clone();
        big.report_count = 100;

        let small_ring = predicted_ring(&base);
        let big_ring = predicted_ring(&big);
        let span = |ring: &[[f64; 2]]| {
            let min = ring.iter().map(|c| c[1]).fold(f64::INFINITY, f64::min);
            let max = ring.iter().map(|c| c[1]).fold(f64::NEG_INFINITY, f64::max);
            max - min
        };
        assert!(span(&big_ring) > span(&small_ring));
        assert_eq!(big_ring[0], big_ring[big_ring.len() - 1]);
    }
}

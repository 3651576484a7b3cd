//! Geospatial primitives
//!
//! Pure lat/lon math used across the pipeline: the equal-area projection
//! applied at the ingest boundary, haversine distance, and the unit-sphere
//! geographic centroid consumed by the snapshot builder.

pub mod hull;

pub use hull::{cluster_ring, predicted_ring, RING_POINTS};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Sinusoidal equal-area projection of a lat/lon pair to meters.
///
/// Preserves area, which is what the spatial component of the clustering
/// metric needs; distortion is negligible at outbreak scale.
pub fn project_equal_area(lat: f64, lon: f64) -> (f64, f64) {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();
    let x = EARTH_RADIUS_M * lon_rad * lat_rad.cos();
    let y = EARTH_RADIUS_M * lat_rad;
    (x, y)
}

/// Great-circle distance between two lat/lon points, in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Convert a lat/lon pair to 3D unit-sphere coordinates.
fn latlon_to_unit_sphere(lat: f64, lon: f64) -> [f64; 3] {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();
    [
        lat_rad.cos() * lon_rad.cos(),
        lat_rad.cos() * lon_rad.sin(),
        lat_rad.sin(),
    ]
}

/// Geographic centroid of a set of lat/lon points: average the unit-sphere
/// vectors, renormalize, convert back. Returns `[lat, lon]`.
///
/// Returns `[0.0, 0.0]` for an empty input or a degenerate (antipodal)
/// vector sum.
pub fn geographic_centroid(points: &[(f64, f64)]) -> [f64; 2] {
    if points.is_empty() {
        return [0.0, 0.0];
    }

    let mut sum = [0.0_f64; 3];
    for &(lat, lon) in points {
        let v = latlon_to_unit_sphere(lat, lon);
        sum[0] += v[0];
        sum[1] += v[1];
        sum[2] += v[2];
    }

    let n = points.len() as f64;
    let avg = [sum[0] / n, sum[1] / n, sum[2] / n];
    let norm = (avg[0] * avg[0] + avg[1] * avg[1] + avg[2] * avg[2]).sqrt();
    if norm < 1e-12 {
        return [0.0, 0.0];
    }

    let (x, y, z) = (avg[0] / norm, avg[1] / norm, avg[2] / norm);
    [z.asin().to_degrees(), y.atan2(x).to_degrees()]
}

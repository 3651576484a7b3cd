//! GeoJSON projection of run output
//!
//! Serializes snapshot windows and predictions as `FeatureCollection`s for
//! map clients. Each cluster snapshot becomes one `Feature` whose geometry
//! is the smoothed convex hull of its member reports (lon/lat ring order,
//! closed); snapshots without enough distinct points fall back to a `Point`
//! at the centroid. A top-level `metadata` member carries collection-wide
//! totals.

use chrono::Utc;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;
use tracing::debug;

use crate::geometry::{cluster_ring, predicted_ring};
use crate::types::{ClusterSnapshot, PredictedSnapshot, TimedeltaSnapshot};

/// Build the feature collection for the latest run's snapshot windows.
pub fn snapshots_to_feature_collection(windows: &[TimedeltaSnapshot]) -> FeatureCollection {
    let features: Vec<Feature> = windows
        .iter()
        .flat_map(|window| {
            window
                .snapshots
                .iter()
                .map(|snapshot| snapshot_feature(window, snapshot))
        })
        .collect();

    let mut foreign = JsonObject::new();
    foreign.insert(
        "metadata".to_string(),
        json!({
            "total_clusters": features.len(),
            "generated_at": Utc::now().to_rfc3339(),
        }),
    );

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    }
}

fn snapshot_feature(window: &TimedeltaSnapshot, snapshot: &ClusterSnapshot) -> Feature {
    let positions: Vec<(f64, f64)> = snapshot.reports.iter().map(|r| (r.lat, r.lon)).collect();

    let geometry = match cluster_ring(&positions) {
        Some(ring) => {
            let ring: Vec<Vec<f64>> = ring.into_iter().map(|c| c.to_vec()).collect();
            Geometry::new(Value::Polygon(vec![ring]))
        }
        None => {
            debug!(
                cluster_id = %snapshot.cluster_id,
                members = snapshot.reports.len(),
                "Hull unavailable, emitting centroid point"
            );
            Geometry::new(Value::Point(vec![snapshot.centroid[1], snapshot.centroid[0]]))
        }
    };

    let mut properties = JsonObject::new();
    properties.insert("cluster_id".to_string(), json!(snapshot.cluster_id));
    properties.insert(
        "time_window_start".to_string(),
        json!(window.time_window_start.to_rfc3339()),
    );
    properties.insert(
        "time_window_end".to_string(),
        json!(window.time_window_end.to_rfc3339()),
    );
    properties.insert("timedelta".to_string(), json!(window.timedelta_days));
    properties.insert("report_count".to_string(), json!(snapshot.report_count()));
    properties.insert(
        "common_symptoms".to_string(),
        json!(snapshot.common_symptoms),
    );
    properties.insert("centroid".to_string(), json!(snapshot.centroid));

    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Build the feature collection for predicted snapshots. Predicted clusters
/// have no member reports, so their outline is a radius polygon scaled by
/// forecast count and intensity.
pub fn predictions_to_feature_collection(predictions: &[PredictedSnapshot]) -> FeatureCollection {
    let features: Vec<Feature> = predictions.iter().map(prediction_feature).collect();

    let mut foreign = JsonObject::new();
    foreign.insert(
        "metadata".to_string(),
        json!({
            "total_predictions": features.len(),
            "generated_at": Utc::now().to_rfc3339(),
        }),
    );

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    }
}

fn prediction_feature(prediction: &PredictedSnapshot) -> Feature {
    let ring: Vec<Vec<f64>> = predicted_ring(prediction)
        .into_iter()
        .map(|c| c.to_vec())
        .collect();

    let mut properties = JsonObject::new();
    properties.insert("cluster_id".to_string(), json!(prediction.cluster_id));
    properties.insert(
        "time_window_start".to_string(),
        json!(prediction.time_window_start.to_rfc3339()),
    );
    properties.insert(
        "time_window_end".to_string(),
        json!(prediction.time_window_end.to_rfc3339()),
    );
    properties.insert("report_count".to_string(), json!(prediction.report_count));
    properties.insert("intensity".to_string(), json!(prediction.intensity));
    properties.insert(
        "common_symptoms".to_string(),
        json!(prediction.common_symptoms),
    );
    properties.insert("centroid".to_string(), json!(prediction.centroid));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

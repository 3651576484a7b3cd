//! Ingest boundary and collaborator abstractions
//!
//! The engine treats symptom inference, text embedding and the report table
//! as external collaborators behind traits. This module defines those seams,
//! an in-memory report store (the production table lives elsewhere), and
//! deterministic local implementations used by the simulation binary and in
//! tests. HTTP-backed implementations live in [`remote`].

pub mod remote;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::geometry::project_equal_area;
use crate::types::{Report, EMBEDDING_DIM};

/// Collaborator-boundary error.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid report: {0}")]
    InvalidReport(String),
}

/// Inference output: the symptom map and the inferred cause.
#[derive(Debug, Clone)]
pub struct InferredSymptoms {
    /// Symptom name -> intensity (1..=3).
    pub symptoms: BTreeMap<String, u8>,
    pub cause: String,
}

/// Text-to-symptoms inference collaborator.
#[async_trait]
pub trait SymptomInference: Send + Sync {
    async fn infer(&self, text: &str) -> Result<InferredSymptoms, CollaboratorError>;
}

/// Text embedding collaborator.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, CollaboratorError>;
}

/// Report table abstraction: the pipeline reads, the report endpoint writes.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Report>, CollaboratorError>;
    /// Persist a report, assigning its id. Returns the stored report.
    async fn save(&self, report: Report) -> Result<Report, CollaboratorError>;
}

/// Assemble a complete report from collaborator outputs, stamped with the
/// current UTC time and projected coordinates. Rejects embeddings with the
/// wrong dimension or non-finite entries so nothing malformed reaches the
/// store.
pub fn complete_report(
    lat: f64,
    lon: f64,
    symptoms: BTreeMap<String, u8>,
    embedding: Vec<f64>,
) -> Result<Report, CollaboratorError> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(CollaboratorError::InvalidReport(format!(
            "embedding dimension {} != {}",
            embedding.len(),
            EMBEDDING_DIM
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(CollaboratorError::InvalidReport(
            "embedding contains non-finite values".to_string(),
        ));
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(CollaboratorError::InvalidReport(format!(
            "coordinates out of range: ({lat}, {lon})"
        )));
    }

    let (utm_x, utm_y) = project_equal_area(lat, lon);
    Ok(Report {
        id: 0, // assigned by the store
        timestamp: Utc::now(),
        lat,
        lon,
        symptoms,
        embedding,
        utm_x,
        utm_y,
    })
}

// ============================================================================
// In-memory report store
// ============================================================================

/// Report table kept in process memory. The production deployment swaps in
/// a database-backed implementation behind the same trait.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: RwLock<Vec<Report>>,
    next_id: AtomicI64,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Seed with pre-built reports (simulation, tests). Ids are taken as-is.
    pub async fn seed(&self, reports: Vec<Report>) {
        let max_id = reports.iter().map(|r| r.id).max().unwrap_or(0);
        self.next_id.store(max_id + 1, Ordering::SeqCst);
        *self.reports.write().await = reports;
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn fetch_all(&self) -> Result<Vec<Report>, CollaboratorError> {
        Ok(self.reports.read().await.clone())
    }

    async fn save(&self, mut report: Report) -> Result<Report, CollaboratorError> {
        report.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(report_id = report.id, "Stored report");
        self.reports.write().await.push(report.clone());
        Ok(report)
    }
}

// ============================================================================
// Deterministic local collaborators
// ============================================================================

/// Symptom vocabulary recognized by the local inference stub.
const KNOWN_SYMPTOMS: &[&str] = &[
    "fever", "cough", "headache", "nausea", "vomiting", "diarrhea", "fatigue", "rash", "chills",
    "dizziness",
];

/// Keyword-matching inference used offline. Real deployments point the
/// server at a remote model via [`remote::HttpSymptomInference`].
pub struct LocalSymptomInference;

#[async_trait]
impl SymptomInference for LocalSymptomInference {
    async fn infer(&self, text: &str) -> Result<InferredSymptoms, CollaboratorError> {
        let lowered = text.to_lowercase();
        let mut symptoms = BTreeMap::new();
        for &name in KNOWN_SYMPTOMS {
            if lowered.contains(name) {
                // Repeated mention reads as emphasis.
                let mentions = lowered.matches(name).count().min(3) as u8;
                symptoms.insert(name.to_string(), mentions.max(1));
            }
        }
        if symptoms.is_empty() {
            symptoms.insert("malaise".to_string(), 1);
        }
        Ok(InferredSymptoms {
            symptoms,
            cause: "unspecified".to_string(),
        })
    }
}

/// Deterministic token-hash embedding used offline: each token perturbs a
/// handful of dimensions, so shared vocabulary yields nearby vectors. Not a
/// semantic model, but stable and cheap.
pub struct LocalEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, CollaboratorError> {
        let mut embedding = vec![0.0_f64; EMBEDDING_DIM];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let mut state = hasher.finish();
            for _ in 0..4 {
                let index = (state % EMBEDDING_DIM as u64) as usize;
                let sign = if (state >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                embedding[index] += sign;
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            }
        }
        let norm = embedding.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            embedding.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_report_fills_projection_and_time() {
        let report = complete_report(
            40.7128,
            -74.0060,
            [("fever".to_string(), 2)].into_iter().collect(),
            vec![0.1; EMBEDDING_DIM],
        )
        .unwrap();
        assert!(report.utm_y > 0.0, "northern hemisphere projects to positive y");
        assert!(report.utm_x < 0.0, "western longitude projects to negative x");
        assert!(report.has_valid_embedding());
    }

    #[tokio::test]
    async fn test_complete_report_rejects_bad_embedding() {
        let short = complete_report(40.0, -74.0, BTreeMap::new(), vec![0.1; 10]);
        assert!(matches!(short, Err(CollaboratorError::InvalidReport(_))));

        let mut nan = vec![0.1; EMBEDDING_DIM];
        nan[0] = f64::NAN;
        let bad = complete_report(40.0, -74.0, BTreeMap::new(), nan);
        assert!(matches!(bad, Err(CollaboratorError::InvalidReport(_))));
    }

    #[tokio::test]
    async fn test_complete_report_rejects_out_of_range_coordinates() {
        let result = complete_report(95.0, 0.0, BTreeMap::new(), vec![0.0; EMBEDDING_DIM]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_assigns_sequential_ids() {
        let store = MemoryReportStore::new();
        let template = complete_report(40.0, -74.0, BTreeMap::new(), vec![0.0; EMBEDDING_DIM])
            .unwrap();
        let a = store.save(template.clone()).await.unwrap();
        let b = store.save(template).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.fetch_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_local_inference_matches_keywords() {
        let inferred = LocalSymptomInference
            .infer("High fever and a dry cough since Monday")
            .await
            .unwrap();
        assert!(inferred.symptoms.contains_key("fever"));
        assert!(inferred.symptoms.contains_key("cough"));
    }

    #[tokio::test]
    async fn test_local_inference_falls_back_to_malaise() {
        let inferred = LocalSymptomInference.infer("feeling off").await.unwrap();
        assert_eq!(inferred.symptoms.len(), 1);
        assert!(inferred.symptoms.contains_key("malaise"));
    }

    #[tokio::test]
    async fn test_local_embedding_is_deterministic_and_normalized() {
        let a = LocalEmbeddingProvider.embed("fever cough").await.unwrap();
        let b = LocalEmbeddingProvider.embed("fever cough").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
        let norm: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_local_embedding_separates_unrelated_text() {
        let a = LocalEmbeddingProvider.embed("fever cough chills").await.unwrap();
        let b = LocalEmbeddingProvider.embed("rash dizziness nausea").await.unwrap();
        let dot: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!(dot < 0.5, "unrelated texts should not align, dot = {dot}");
    }
}

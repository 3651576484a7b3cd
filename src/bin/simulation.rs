//! Synthetic outbreak simulation
//!
//! Seeds Gaussian clusters of symptom reports around a handful of city
//! centers, runs the clustering pipeline once against a throwaway store, and
//! prints the run summary plus the resulting GeoJSON. Exercises the whole
//! engine without live inference or embedding services.
//!
//! ```bash
//! cargo run --bin simulation -- --outbreaks 3 --reports-per-outbreak 20
//! ```

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use epiwatch::config::EngineConfig;
use epiwatch::geometry::project_equal_area;
use epiwatch::ingest::MemoryReportStore;
use epiwatch::pipeline::ClusterPipeline;
use epiwatch::storage::RunStore;
use epiwatch::types::{Report, EMBEDDING_DIM};
use epiwatch::{geojson_out, ingest::ReportStore};

/// Symptom themes per simulated outbreak; each theme points its embedding
/// along a distinct axis so the semantic metric separates causes.
const THEMES: &[(&str, &[&str])] = &[
    ("influenza", &["fever", "cough", "fatigue"]),
    ("gastroenteritis", &["nausea", "vomiting", "diarrhea"]),
    ("dengue", &["fever", "headache", "rash"]),
];

/// City centers reports scatter around.
const CITIES: &[(f64, f64)] = &[
    (-23.55, -46.63),
    (-30.03, -51.23),
    (-22.90, -43.20),
    (-19.92, -43.94),
];

#[derive(Parser, Debug)]
#[command(name = "simulation")]
#[command(about = "Seed synthetic outbreaks and run the clustering pipeline once")]
struct CliArgs {
    /// Number of simulated outbreaks
    #[arg(long, default_value = "3")]
    outbreaks: usize,

    /// Reports generated per outbreak
    #[arg(long, default_value = "20")]
    reports_per_outbreak: usize,

    /// Scatter radius around each outbreak center, in meters
    #[arg(long, default_value = "1500.0")]
    radius_m: f64,

    /// Days of history to spread reports over
    #[arg(long, default_value = "3")]
    days_back: i64,

    /// RNG seed for reproducible runs
    #[arg(long, default_value = "7")]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args))
}

async fn run(args: CliArgs) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let reports = generate_reports(&args, &mut rng)?;
    info!(reports = reports.len(), outbreaks = args.outbreaks, "Seeded synthetic reports");

    let report_store = Arc::new(MemoryReportStore::new());
    report_store.seed(reports).await;

    let run_store = Arc::new(RunStore::open_temp()?);
    let pipeline = ClusterPipeline::new(
        report_store.clone(),
        run_store.clone(),
        EngineConfig::default(),
    );

    let summary = pipeline.process().await?;
    info!(
        run_id = summary.run_id,
        clusters = summary.total_clusters,
        windows = summary.snapshot_windows,
        predictions = summary.predictions,
        "Simulation run complete"
    );

    let windows = run_store.get_latest()?;
    let collection = geojson_out::snapshots_to_feature_collection(&windows);
    println!("{}", serde_json::to_string_pretty(&collection)?);

    let total_stored: usize = report_store.fetch_all().await.map(|r| r.len()).unwrap_or(0);
    println!(
        "\n{} reports -> {} snapshots across {} windows, {} predictions (run {})",
        total_stored, summary.total_clusters, summary.snapshot_windows, summary.predictions,
        summary.run_id
    );
    Ok(())
}

/// Scatter themed reports around randomly chosen city centers.
fn generate_reports(args: &CliArgs, rng: &mut StdRng) -> Result<Vec<Report>> {
    let now = Utc::now();
    let mut reports = Vec::new();
    let mut next_id: i64 = 1;

    for outbreak in 0..args.outbreaks {
        let (city_lat, city_lon) = CITIES[outbreak % CITIES.len()];
        let (theme_name, theme_symptoms) = THEMES[outbreak % THEMES.len()];

        // Meters to degrees at this latitude.
        let lat_sigma = args.radius_m / 111_000.0;
        let lon_sigma = args.radius_m / (111_000.0 * city_lat.to_radians().cos());
        let lat_dist = Normal::new(city_lat, lat_sigma)?;
        let lon_dist = Normal::new(city_lon, lon_sigma)?;

        for _ in 0..args.reports_per_outbreak {
            let lat = lat_dist.sample(rng);
            let lon = lon_dist.sample(rng);
            let (utm_x, utm_y) = project_equal_area(lat, lon);

            let mut symptoms = BTreeMap::new();
            for &name in theme_symptoms {
                if rng.gen_bool(0.8) {
                    symptoms.insert(name.to_string(), rng.gen_range(1..=3));
                }
            }
            if symptoms.is_empty() {
                symptoms.insert(theme_symptoms[0].to_string(), 1);
            }

            let timestamp = now
                - Duration::days(rng.gen_range(0..=args.days_back))
                - Duration::minutes(rng.gen_range(0..=1439));

            reports.push(Report {
                id: next_id,
                timestamp,
                lat,
                lon,
                symptoms,
                embedding: theme_embedding(outbreak, rng),
                utm_x,
                utm_y,
            });
            next_id += 1;
        }
        info!(outbreak, theme = theme_name, city_lat, city_lon, "Generated outbreak");
    }

    Ok(reports)
}

/// A noisy unit vector pointing along the outbreak's theme axis.
fn theme_embedding(outbreak: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut embedding = vec![0.0; EMBEDDING_DIM];
    embedding[outbreak % EMBEDDING_DIM] = 1.0;
    for value in &mut embedding {
        *value += rng.gen_range(-0.01..0.01);
    }
    let norm = embedding.iter().map(|v| v * v).sum::<f64>().sqrt();
    embedding.iter_mut().for_each(|v| *v /= norm);
    embedding
}

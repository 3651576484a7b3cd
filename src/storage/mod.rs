//! Run persistence
//!
//! Versioned storage for clustering runs on an embedded Sled database.
//! Every run is written with full provenance so historical comparison and
//! retention are simple key-prefix operations.

pub mod run_store;

pub use run_store::{RunParams, RunStore, StoreError};

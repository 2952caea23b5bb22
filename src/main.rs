use astra_core::{LocalEphemerisEngine, Location, ReferenceTables};
use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Example usage: derive the chart for the current instant.
    let engine = LocalEphemerisEngine::new(Arc::new(ReferenceTables::builtin()));
    let snapshot = engine.snapshot(Utc::now(), Location::delhi());

    println!("{:#?}", snapshot);
}

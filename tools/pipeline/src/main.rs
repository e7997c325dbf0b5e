use anyhow::Context;
use pipeline::{Pipeline, PipelineConfig};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use storage::blob::{BlobMeta, BlobStore, PutCondition};
use storage::fs::FsBlobStore;
use types::clock::SystemClock;

fn coordinate(lat: &str, lon: &str) -> Result<Vec<Decimal>, anyhow::Error> {
    Ok(vec![
        lat.parse().context("latitude")?,
        lon.parse().context("longitude")?,
    ])
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    tracing::info!("Starting meter telemetry sync pipeline demo");

    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("artifacts"));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&root));

    // Neighborhood outline drawn under the markers
    let boundary = serde_json::json!({
        "type": "FeatureCollection",
        "name": "Crescenta Highlands",
        "features": [{
            "type": "Feature",
            "properties": { "name": "Crescenta Highlands" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [-118.246, 34.212],
                    [-118.222, 34.206],
                    [-118.208, 34.224],
                    [-118.232, 34.236],
                    [-118.246, 34.212]
                ]]
            }
        }]
    });
    blobs.put(
        "boundaries.geojson",
        serde_json::to_vec(&boundary)?,
        BlobMeta::json(),
        PutCondition::Overwrite,
    )?;

    let mut pipeline = Pipeline::new(blobs, Arc::new(SystemClock), PipelineConfig::default());

    for (device, value, zipcode, date, lat, lon) in [
        ("meter-1001", "6.5", "91020", "2024-07-15", "34.2210", "-118.2320"),
        ("meter-1002", "12.0", "91020", "2024-07-16", "34.2268", "-118.2411"),
        ("meter-1003", "3.75", "91214", "2024-07-18", "34.2151", "-118.2253"),
    ] {
        pipeline
            .ingest()
            .register_device(ingest::RegistrationRequest {
                device_id: device.to_string(),
                value: value.to_string(),
                zipcode: zipcode.to_string(),
                date: date.to_string(),
                coordinate: coordinate(lat, lon)?,
            })
            .with_context(|| format!("registering {device}"))?;
    }

    pipeline.ingest().record_reading(ingest::ReadingRequest {
        device_id: "meter-1001".to_string(),
        value: "7.25".to_string(),
        date: "2024-08-15".to_string(),
    })?;

    // Move one device and retire another so both cascade paths run
    pipeline
        .ingest()
        .update_device_location("meter-1002", "91214", coordinate("34.2305", "-118.2449")?)?;
    pipeline.ingest().deregister_device("meter-1003")?;

    let summary = pipeline.run_until_idle()?;
    tracing::info!(
        rounds = summary.rounds,
        reference = summary.reference_notifications,
        measurement = summary.measurement_notifications,
        document_batches = summary.document_batches,
        map_builds = summary.map_builds,
        report_builds = summary.report_builds,
        "Pipeline drained"
    );

    for artifact in ["readings.json", "devices.json", "meter-map.html", "service-age-report.html"] {
        tracing::info!(path = %root.join(artifact).display(), "Wrote artifact");
    }

    Ok(())
}

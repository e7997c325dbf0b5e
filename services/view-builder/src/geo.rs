//! Geographic map artifact
//!
//! Renders one marker per device at its latest reading, over an optional
//! boundary overlay, into a self-contained HTML page. The page carries
//! no external references so it renders identically wherever the blob is
//! served from.

use crate::dedup::latest_per_device;
use crate::input::resolve_snapshot;
use serde_json::{json, Value};
use std::sync::Arc;
use storage::blob::{BlobMeta, BlobStore, PutCondition, StorageError};
use tracing::{debug, info, warn};
use types::numeric::number_from_decimal;
use types::record::MeterReading;

/// Configuration for the map builder
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Canonical document to reload when a message payload is unusable
    pub document_key: String,
    /// GeoJSON feature collection drawn under the markers
    pub boundary_key: String,
    /// Rendered page, replaced wholesale on every rebuild
    pub artifact_key: String,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            document_key: "readings.json".to_string(),
            boundary_key: "boundaries.geojson".to_string(),
            artifact_key: "meter-map.html".to_string(),
        }
    }
}

/// Result of one map rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoReport {
    /// Markers plotted
    pub markers: usize,
    /// Readings dropped for lacking a `[lat, lon]` coordinate
    pub dropped: usize,
    /// Whether the boundary overlay was available
    pub overlay: bool,
    /// Version the artifact was written as
    pub version: u64,
}

/// Builds the meter map page from reading snapshots
pub struct GeoViewBuilder {
    store: Arc<dyn BlobStore>,
    config: GeoConfig,
    builds: u64,
    markers_dropped: u64,
}

impl GeoViewBuilder {
    pub fn new(store: Arc<dyn BlobStore>, config: GeoConfig) -> Self {
        info!(artifact = %config.artifact_key, "Geographic view builder initialized");
        Self {
            store,
            config,
            builds: 0,
            markers_dropped: 0,
        }
    }

    pub fn with_defaults(store: Arc<dyn BlobStore>) -> Self {
        Self::new(store, GeoConfig::default())
    }

    /// Rebuild the map from one fan-out message.
    pub fn handle_message(&mut self, body: &str) -> Result<GeoReport, StorageError> {
        let readings = resolve_snapshot(body, self.store.as_ref(), &self.config.document_key)?;
        self.rebuild(readings)
    }

    /// Rebuild the map from an explicit reading set.
    pub fn rebuild(&mut self, readings: Vec<MeterReading>) -> Result<GeoReport, StorageError> {
        let deduped = latest_per_device(readings);
        let devices = deduped.len();

        let markers: Vec<Value> = deduped.iter().filter_map(marker_feature).collect();
        let dropped = devices - markers.len();
        if dropped > 0 {
            warn!(dropped, "Dropped readings without a plottable coordinate");
        }
        self.markers_dropped += dropped as u64;

        let boundaries = self.load_boundaries()?;
        let page = render_map(&markers, boundaries.as_ref());
        let version = self.store.put(
            &self.config.artifact_key,
            page.into_bytes(),
            BlobMeta::html_no_cache(),
            PutCondition::Overwrite,
        )?;
        self.builds += 1;

        debug!(markers = markers.len(), dropped, version, "Rebuilt meter map");
        Ok(GeoReport {
            markers: markers.len(),
            dropped,
            overlay: boundaries.is_some(),
            version,
        })
    }

    /// Total rebuilds performed
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Total readings dropped for malformed coordinates
    pub fn markers_dropped(&self) -> u64 {
        self.markers_dropped
    }

    fn load_boundaries(&self) -> Result<Option<Value>, StorageError> {
        let blob = match self.store.get(&self.config.boundary_key)? {
            Some(blob) => blob,
            None => {
                warn!(key = %self.config.boundary_key, "Boundary collection absent, rendering without overlay");
                return Ok(None);
            }
        };
        match serde_json::from_slice::<Value>(&blob.body) {
            Ok(collection) => Ok(Some(collection)),
            Err(err) => {
                warn!(key = %self.config.boundary_key, error = %err, "Boundary collection unreadable, rendering without overlay");
                Ok(None)
            }
        }
    }
}

fn marker_feature(reading: &MeterReading) -> Option<Value> {
    let (lat, lon) = reading.coordinate.as_pair()?;
    let lat = number_from_decimal(&lat).ok()?;
    let lon = number_from_decimal(&lon).ok()?;
    let value = number_from_decimal(&reading.value).ok()?;
    Some(json!({
        "device": reading.device_id.as_str(),
        "value": value,
        "lat": lat,
        "lon": lon,
    }))
}

/// Encode a value for embedding inside a script block.
fn script_json(value: &Value) -> String {
    // A literal "</script>" in the data would close the block early
    value.to_string().replace('<', "\\u003c")
}

fn render_map(markers: &[Value], boundaries: Option<&Value>) -> String {
    let marker_data = script_json(&Value::Array(markers.to_vec()));
    let boundary_data = match boundaries {
        Some(collection) => script_json(collection),
        None => "null".to_string(),
    };

    let mut page = String::with_capacity(
        PAGE_HEAD.len() + MAP_SCRIPT.len() + marker_data.len() + boundary_data.len() + 64,
    );
    page.push_str(PAGE_HEAD);
    page.push_str("const MARKERS = ");
    page.push_str(&marker_data);
    page.push_str(";\nconst BOUNDARIES = ");
    page.push_str(&boundary_data);
    page.push_str(";\n");
    page.push_str(MAP_SCRIPT);
    page
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Water Meter Map</title>
<style>
body { margin: 0; font-family: sans-serif; }
header { padding: 10px 16px; background: #1a3c5e; color: #fff; font-size: 18px; }
#map { display: block; width: 100vw; height: calc(100vh - 42px); background: #eef3f7; }
.boundary { fill: #7fb3d5; fill-opacity: 0.25; }
.marker { fill: #c0392b; }
</style>
</head>
<body>
<header>Water Meter Map</header>
<svg id="map" xmlns="http://www.w3.org/2000/svg"></svg>
<script>
"#;

const MAP_SCRIPT: &str = r#"(function () {
  var svg = document.getElementById("map");
  var NS = "http://www.w3.org/2000/svg";
  var pts = MARKERS.map(function (m) { return [m.lon, m.lat]; });

  function eachRing(geometry, fn) {
    if (!geometry) return;
    if (geometry.type === "Polygon") geometry.coordinates.forEach(fn);
    if (geometry.type === "MultiPolygon") {
      geometry.coordinates.forEach(function (polygon) { polygon.forEach(fn); });
    }
  }

  var rings = [];
  if (BOUNDARIES && BOUNDARIES.features) {
    BOUNDARIES.features.forEach(function (feature) {
      eachRing(feature.geometry, function (ring) {
        rings.push(ring);
        ring.forEach(function (p) { pts.push([p[0], p[1]]); });
      });
    });
  }

  if (pts.length === 0) pts = [[0, 0]];
  var xs = pts.map(function (p) { return p[0]; });
  var ys = pts.map(function (p) { return p[1]; });
  var minX = Math.min.apply(null, xs);
  var maxX = Math.max.apply(null, xs);
  var minY = Math.min.apply(null, ys);
  var maxY = Math.max.apply(null, ys);
  var span = Math.max(maxX - minX, maxY - minY, 0.002);
  var pad = span * 0.1;
  svg.setAttribute("viewBox", [
    minX - pad,
    -maxY - pad,
    (maxX - minX) + 2 * pad,
    (maxY - minY) + 2 * pad
  ].join(" "));

  rings.forEach(function (ring) {
    var polygon = document.createElementNS(NS, "polygon");
    polygon.setAttribute("class", "boundary");
    polygon.setAttribute("points", ring.map(function (p) {
      return p[0] + "," + (-p[1]);
    }).join(" "));
    svg.appendChild(polygon);
  });

  var radius = span / 60;
  MARKERS.forEach(function (m) {
    var dot = document.createElementNS(NS, "circle");
    dot.setAttribute("class", "marker");
    dot.setAttribute("cx", m.lon);
    dot.setAttribute("cy", -m.lat);
    dot.setAttribute("r", radius);
    var tip = document.createElementNS(NS, "title");
    tip.textContent = "Device " + m.device + "\nValue " + m.value;
    dot.appendChild(tip);
    svg.appendChild(dot);
  });
})();
</script>
</body>
</html>
"#;

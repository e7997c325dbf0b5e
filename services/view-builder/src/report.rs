//! Service-age report artifact
//!
//! Groups devices by how long ago their latest reading was recorded and
//! renders one table per age band. Devices read within the last six
//! months are considered current and stay off the report.

use crate::dedup::latest_per_device;
use crate::input::resolve_snapshot;
use std::sync::Arc;
use storage::blob::{BlobMeta, BlobStore, PutCondition, StorageError};
use tracing::{debug, info};
use types::clock::Clock;
use types::record::MeterReading;

/// Nominal month used for age arithmetic, thirty days of seconds
pub const MONTH_SECONDS: i64 = 30 * 86_400;

/// Age band a stale device falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBucket {
    SixPlus,
    NinePlus,
    TwelvePlus,
}

impl AgeBucket {
    /// Heading shown above the band's table
    pub fn label(&self) -> &'static str {
        match self {
            AgeBucket::SixPlus => "6+ months old",
            AgeBucket::NinePlus => "9+ months old",
            AgeBucket::TwelvePlus => "12+ months old",
        }
    }
}

/// Assign a reading age to its band, oldest band first. Ages under six
/// months get no band at all.
pub fn bucket_for(age_seconds: i64) -> Option<AgeBucket> {
    if age_seconds >= 12 * MONTH_SECONDS {
        Some(AgeBucket::TwelvePlus)
    } else if age_seconds >= 9 * MONTH_SECONDS {
        Some(AgeBucket::NinePlus)
    } else if age_seconds >= 6 * MONTH_SECONDS {
        Some(AgeBucket::SixPlus)
    } else {
        None
    }
}

/// Configuration for the report builder
#[derive(Debug, Clone)]
pub struct AgeConfig {
    /// Canonical document to reload when a message payload is unusable
    pub document_key: String,
    /// Rendered page, replaced wholesale on every rebuild
    pub artifact_key: String,
}

impl Default for AgeConfig {
    fn default() -> Self {
        Self {
            document_key: "readings.json".to_string(),
            artifact_key: "service-age-report.html".to_string(),
        }
    }
}

/// Result of one report rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeReport {
    pub six_plus: usize,
    pub nine_plus: usize,
    pub twelve_plus: usize,
    /// Devices read within the last six months, left off the page
    pub current: usize,
    /// Version the artifact was written as
    pub version: u64,
}

/// Builds the service-age page from reading snapshots
pub struct AgeReportBuilder {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: AgeConfig,
    builds: u64,
}

impl AgeReportBuilder {
    pub fn new(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, config: AgeConfig) -> Self {
        info!(artifact = %config.artifact_key, "Service-age report builder initialized");
        Self {
            store,
            clock,
            config,
            builds: 0,
        }
    }

    pub fn with_defaults(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(store, clock, AgeConfig::default())
    }

    /// Rebuild the report from one fan-out message.
    pub fn handle_message(&mut self, body: &str) -> Result<AgeReport, StorageError> {
        let readings = resolve_snapshot(body, self.store.as_ref(), &self.config.document_key)?;
        self.rebuild(readings)
    }

    /// Rebuild the report from an explicit reading set.
    pub fn rebuild(&mut self, readings: Vec<MeterReading>) -> Result<AgeReport, StorageError> {
        let deduped = latest_per_device(readings);
        let now = self.clock.now();

        let mut six = Vec::new();
        let mut nine = Vec::new();
        let mut twelve = Vec::new();
        let mut current = 0usize;
        for reading in deduped {
            match bucket_for(now - reading.timestamp) {
                Some(AgeBucket::TwelvePlus) => twelve.push(reading),
                Some(AgeBucket::NinePlus) => nine.push(reading),
                Some(AgeBucket::SixPlus) => six.push(reading),
                None => current += 1,
            }
        }

        let page = render_report(&six, &nine, &twelve);
        let version = self.store.put(
            &self.config.artifact_key,
            page.into_bytes(),
            BlobMeta::html_no_cache(),
            PutCondition::Overwrite,
        )?;
        self.builds += 1;

        debug!(
            six_plus = six.len(),
            nine_plus = nine.len(),
            twelve_plus = twelve.len(),
            current,
            version,
            "Rebuilt service-age report"
        );
        Ok(AgeReport {
            six_plus: six.len(),
            nine_plus: nine.len(),
            twelve_plus: twelve.len(),
            current,
            version,
        })
    }

    /// Total rebuilds performed
    pub fn builds(&self) -> u64 {
        self.builds
    }
}

fn render_report(six: &[MeterReading], nine: &[MeterReading], twelve: &[MeterReading]) -> String {
    let mut page = String::from(REPORT_HEAD);
    for (bucket, readings) in [
        (AgeBucket::SixPlus, six),
        (AgeBucket::NinePlus, nine),
        (AgeBucket::TwelvePlus, twelve),
    ] {
        render_section(&mut page, bucket, readings);
    }
    page.push_str(REPORT_FOOT);
    page
}

fn render_section(page: &mut String, bucket: AgeBucket, readings: &[MeterReading]) {
    page.push_str(&format!(
        "<h2>{} ({})</h2>\n",
        bucket.label(),
        readings.len()
    ));
    if readings.is_empty() {
        page.push_str("<p class=\"empty\">No devices in this band.</p>\n");
        return;
    }
    page.push_str("<table>\n<tr><th>Device</th><th>Value</th><th>Timestamp</th></tr>\n");
    for reading in readings {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(reading.device_id.as_str()),
            reading.value.normalize(),
            reading.timestamp,
        ));
    }
    page.push_str("</table>\n");
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

const REPORT_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Meter Service Age Report</title>
<style>
body { margin: 0 auto; max-width: 720px; padding: 16px; font-family: sans-serif; }
h2 { border-bottom: 1px solid #ccc; padding-bottom: 4px; }
table { border-collapse: collapse; width: 100%; margin-bottom: 16px; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; }
.empty { color: #888; }
</style>
</head>
<body>
<h1>Meter Service Age Report</h1>
"#;

const REPORT_FOOT: &str = "</body>\n</html>\n";

//! View builders for the meter telemetry sync pipeline
//!
//! Consumes the reading snapshots fanned out by the document
//! synchronizer and renders the two public artifacts: a geographic
//! meter map and a service-age report. Every rebuild replaces its
//! artifact wholesale, so a redelivered snapshot just rewrites the
//! same page.

pub mod dedup;
pub mod geo;
pub mod input;
pub mod report;

pub use dedup::latest_per_device;
pub use geo::{GeoConfig, GeoReport, GeoViewBuilder};
pub use input::resolve_snapshot;
pub use report::{AgeBucket, AgeConfig, AgeReport, AgeReportBuilder};

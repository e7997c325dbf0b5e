//! Ingestion and registration producer
//!
//! The upstream writer for the live tables. Registrations, readings,
//! and registry maintenance land here, and the table outboxes turn
//! every accepted write into the change notifications that feed the
//! sync pipeline.

pub mod service;

pub use service::{
    IngestError, IngestService, ReadingRequest, Registration, RegistrationRequest,
};

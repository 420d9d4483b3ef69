//! Typed document models bound to a shared SQLite registry.
//!
//! A [`ModelDefinition`] supplies a schema; [`TypedModelAdapter::new`] turns it
//! into a ready [`Model`] handle by registering (or reusing) the named model in
//! a [`ModelRegistry`] that the application opens at startup and passes around.

pub mod adapter;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod registry;
pub mod repo;

pub use adapter::{AdapterError, AdapterResult, ModelDefinition, TypedModelAdapter};
pub use config::{ConfigError, DatabaseLocation, LogConfig, RegistryConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::document::{new_document_id, Document, DocumentId};
pub use model::schema::{
    DocumentViolation, FieldDef, FieldType, IndexDef, Schema, SchemaBuilder, SchemaError,
    SchemaResult,
};
pub use registry::{ModelRegistry, RegisteredModel, RegistryError, RegistryResult};
pub use repo::typed_model::{DocumentRepository, Model, ModelError, ModelQuery, ModelResult};

/// Minimal health-check API for integration probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Document model definitions shared by the registry and typed handles.
//!
//! # Responsibility
//! - Define the `Document` capability user types implement.
//! - Define the schema descriptor that shapes a registered model.
//!
//! # Invariants
//! - Every stored document is identified by a stable `DocumentId`.
//! - Schemas compare by value; equal schemas fingerprint identically.

pub mod document;
pub mod schema;

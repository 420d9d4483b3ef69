//! Data access for registered models.
//!
//! # Responsibility
//! - Define the repository contract consumers program against.
//! - Isolate SQLite/JSON details from adapter and registry code.
//!
//! # Invariants
//! - Repository writes check documents against the model schema first.
//! - Repository APIs return semantic errors (`NotFound`, `DuplicateId`) in
//!   addition to DB transport errors.

pub mod typed_model;

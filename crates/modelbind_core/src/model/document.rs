//! Document capability required by typed models.
//!
//! # Responsibility
//! - Define what a Rust type must provide to be stored through a `Model<T>`.
//!
//! # Invariants
//! - `id()` is stable for the lifetime of the stored document.
//! - The serialized form is a JSON object.

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Stable identifier of one stored document.
pub type DocumentId = Uuid;

/// A value with identity that can be serialized to the store's document shape.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Key holding the identity in the serialized object, if the type
    /// serializes it at all. Exempt from strict schema checks.
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> DocumentId;
}

/// Generates a fresh random document id.
pub fn new_document_id() -> DocumentId {
    Uuid::new_v4()
}

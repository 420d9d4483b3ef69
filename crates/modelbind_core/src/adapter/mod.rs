//! Construction-time binding of a typed model handle.
//!
//! # Responsibility
//! - Ask a model definition for its schema.
//! - Obtain (or create) the matching model from a registry.
//! - Expose the resulting handle read-only for the adapter's lifetime.
//!
//! # Invariants
//! - An adapter exists only in the bound state; construction either binds a
//!   handle or returns an error, never a partial value.
//! - The bound handle is never replaced; no `&mut` access is exposed.
//! - Collaborator errors are passed through unchanged.
//!
//! # Example
//!
//! ```
//! use modelbind_core::{
//!     Document, DocumentId, FieldType, ModelDefinition, ModelRegistry, Schema, SchemaResult,
//!     TypedModelAdapter,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     id: DocumentId,
//!     name: String,
//!     age: u32,
//! }
//!
//! impl Document for User {
//!     fn id(&self) -> DocumentId {
//!         self.id
//!     }
//! }
//!
//! struct UserDefinition;
//!
//! impl ModelDefinition for UserDefinition {
//!     type Doc = User;
//!
//!     fn define_schema(&self) -> SchemaResult<Schema> {
//!         Schema::builder()
//!             .required("name", FieldType::String)
//!             .required("age", FieldType::Number)
//!             .build()
//!     }
//! }
//!
//! let registry = ModelRegistry::open_in_memory().unwrap();
//! let users = TypedModelAdapter::new(&registry, "User", &UserDefinition).unwrap();
//! assert_eq!(users.model().name(), "User");
//! ```

use crate::model::document::Document;
use crate::model::schema::{Schema, SchemaError, SchemaResult};
use crate::registry::{ModelRegistry, RegistryError};
use crate::repo::typed_model::Model;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Construction failure; wraps the collaborator error as-is.
#[derive(Debug)]
pub enum AdapterError {
    Schema(SchemaError),
    Registry(RegistryError),
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AdapterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Registry(err) => Some(err),
        }
    }
}

impl From<SchemaError> for AdapterError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<RegistryError> for AdapterError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

/// Schema factory for one document type.
///
/// Implementations must describe the same shape on every call: the registry
/// caches compiled models by name, so a changing schema surfaces as a
/// conflict on the next construction.
pub trait ModelDefinition {
    type Doc: Document;

    fn define_schema(&self) -> SchemaResult<Schema>;
}

/// Holds the typed handle bound at construction.
pub struct TypedModelAdapter<T: Document> {
    model: Model<T>,
}

impl<T: Document> TypedModelAdapter<T> {
    /// Binds the model named `model_name` using the schema from `definition`.
    ///
    /// # Side effects
    /// - May register `model_name` in `registry` (and its store) if absent.
    pub fn new<D>(registry: &ModelRegistry, model_name: &str, definition: &D) -> AdapterResult<Self>
    where
        D: ModelDefinition<Doc = T> + ?Sized,
    {
        let model = Self::create_model(registry, model_name, definition)?;
        Ok(Self { model })
    }

    fn create_model<D>(
        registry: &ModelRegistry,
        model_name: &str,
        definition: &D,
    ) -> AdapterResult<Model<T>>
    where
        D: ModelDefinition<Doc = T> + ?Sized,
    {
        let schema = definition.define_schema()?;
        Ok(registry.model::<T>(model_name, schema)?)
    }

    /// The bound data-access handle.
    pub fn model(&self) -> &Model<T> {
        &self.model
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn into_model(self) -> Model<T> {
        self.model
    }
}

impl<T: Document> Clone for TypedModelAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
        }
    }
}

impl<T: Document> std::fmt::Debug for TypedModelAdapter<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedModelAdapter")
            .field("model", &self.model)
            .finish()
    }
}

impl<T: Document> AsRef<Model<T>> for TypedModelAdapter<T> {
    fn as_ref(&self) -> &Model<T> {
        &self.model
    }
}

//! Schema descriptors for registered document models.
//!
//! # Responsibility
//! - Describe the field shape, requiredness and indexes of one model.
//! - Check serialized documents against that shape.
//! - Produce a stable fingerprint so schemas can be compared across processes.
//!
//! # Invariants
//! - Field names are non-empty and unique (keys of a `BTreeMap`).
//! - Every index references declared fields only.
//! - Indexes are kept sorted and deduplicated, so declaration order never
//!   affects equality or the fingerprint.
//! - Equal schemas always produce equal fingerprints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Value kind accepted by one schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Accepts any JSON value, including `null`.
    Any,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Index over one or more top-level fields.
///
/// Field order inside one index is significant; the order in which indexes
/// are declared is not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexDef {
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Schema descriptor consumed by the model registry.
///
/// The registry treats this as opaque apart from equality and fingerprinting;
/// documents are checked against it by the typed model handle on every write
/// and read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, FieldDef>,
    #[serde(default)]
    indexes: Vec<IndexDef>,
    /// Rejects undeclared fields when `true`.
    #[serde(default = "default_strict")]
    strict: bool,
}

fn default_strict() -> bool {
    true
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parses a schema from its JSON form and validates it.
    pub fn from_json_str(value: &str) -> SchemaResult<Self> {
        let schema = serde_json::from_str::<Self>(value)
            .map_err(SchemaError::Serialization)?
            .normalized();
        schema.validate()?;
        Ok(schema)
    }

    /// Sorts and deduplicates indexes. Applied by the builder, the JSON
    /// loader and the registry.
    pub(crate) fn normalized(mut self) -> Self {
        self.indexes.sort();
        self.indexes.dedup();
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldDef> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes.iter().filter(|index| index.unique)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Checks structural invariants of the descriptor itself.
    pub fn validate(&self) -> SchemaResult<()> {
        if self.fields.keys().any(|name| name.trim().is_empty()) {
            return Err(SchemaError::EmptyFieldName);
        }

        for index in &self.indexes {
            if index.fields.is_empty() {
                return Err(SchemaError::EmptyIndex);
            }
            if let Some(missing) = index
                .fields
                .iter()
                .find(|field| !self.fields.contains_key(field.as_str()))
            {
                return Err(SchemaError::UnknownIndexField(missing.clone()));
            }
        }

        Ok(())
    }

    /// Canonical JSON form; field order is fixed by the `BTreeMap`.
    pub fn canonical_json(&self) -> SchemaResult<String> {
        serde_json::to_string(self).map_err(SchemaError::Serialization)
    }

    /// Hex SHA-256 of [`Schema::canonical_json`].
    pub fn fingerprint(&self) -> SchemaResult<String> {
        let canonical = self.canonical_json()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Checks one serialized document against this schema.
    ///
    /// `id_field` names the identity key, which is stored out of band and is
    /// therefore exempt from the undeclared-field check.
    pub fn check_document(&self, value: &Value, id_field: &str) -> Result<(), DocumentViolation> {
        let object = value.as_object().ok_or(DocumentViolation::NotAnObject)?;

        for (name, def) in &self.fields {
            match object.get(name) {
                None | Some(Value::Null) if def.required => {
                    return Err(DocumentViolation::MissingField(name.clone()));
                }
                None | Some(Value::Null) => {}
                Some(field_value) if !def.kind.accepts(field_value) => {
                    return Err(DocumentViolation::WrongType {
                        field: name.clone(),
                        expected: def.kind,
                    });
                }
                Some(_) => {}
            }
        }

        if self.strict {
            if let Some(unknown) = object
                .keys()
                .find(|key| key.as_str() != id_field && !self.fields.contains_key(key.as_str()))
            {
                return Err(DocumentViolation::UnknownField(unknown.clone()));
            }
        }

        Ok(())
    }
}

/// Fluent builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    fields: BTreeMap<String, FieldDef>,
    indexes: Vec<IndexDef>,
    strict: bool,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            indexes: Vec::new(),
            strict: default_strict(),
        }
    }
}

impl SchemaBuilder {
    /// Declares an optional field. Redeclaring a name replaces it.
    pub fn field(mut self, name: impl Into<String>, kind: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldDef {
                kind,
                required: false,
            },
        );
        self
    }

    /// Declares a field that must be present and non-null.
    pub fn required(mut self, name: impl Into<String>, kind: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldDef {
                kind,
                required: true,
            },
        );
        self
    }

    /// Declares a non-unique index.
    ///
    /// Descriptive only: it takes part in schema identity and the fingerprint,
    /// but creates no SQL index and never rejects a write.
    pub fn index<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.push(IndexDef {
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        });
        self
    }

    /// Declares a unique index, enforced on insert and update. Documents with
    /// any indexed field absent or `null` never clash.
    pub fn unique_index<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.push(IndexDef {
            fields: fields.into_iter().map(Into::into).collect(),
            unique: true,
        });
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> SchemaResult<Schema> {
        let schema = Schema {
            fields: self.fields,
            indexes: self.indexes,
            strict: self.strict,
        }
        .normalized();
        schema.validate()?;
        Ok(schema)
    }
}

/// Schema definition errors.
#[derive(Debug)]
pub enum SchemaError {
    EmptyFieldName,
    EmptyIndex,
    UnknownIndexField(String),
    /// Raised by model definitions that cannot produce a schema.
    InvalidDefinition(String),
    Serialization(serde_json::Error),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFieldName => write!(f, "schema field name cannot be empty"),
            Self::EmptyIndex => write!(f, "schema index must reference at least one field"),
            Self::UnknownIndexField(field) => {
                write!(f, "schema index references undeclared field `{field}`")
            }
            Self::InvalidDefinition(message) => write!(f, "invalid schema definition: {message}"),
            Self::Serialization(err) => write!(f, "schema serialization failed: {err}"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

/// Reason a document does not match its model schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentViolation {
    NotAnObject,
    MissingField(String),
    WrongType { field: String, expected: FieldType },
    UnknownField(String),
}

impl Display for DocumentViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "document must serialize to an object"),
            Self::MissingField(field) => write!(f, "required field `{field}` is missing"),
            Self::WrongType { field, expected } => {
                write!(f, "field `{field}` must be of type {}", expected.as_str())
            }
            Self::UnknownField(field) => write!(f, "field `{field}` is not declared in schema"),
        }
    }
}

impl Error for DocumentViolation {}

#[cfg(test)]
mod tests {
    use super::{DocumentViolation, FieldType, Schema, SchemaError};
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::builder()
            .required("name", FieldType::String)
            .field("age", FieldType::Number)
            .unique_index(["name"])
            .build()
            .expect("user schema should build")
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_declaration_order() {
        let first = Schema::builder()
            .field("a", FieldType::String)
            .field("b", FieldType::Number)
            .build()
            .unwrap();
        let second = Schema::builder()
            .field("b", FieldType::Number)
            .field("a", FieldType::String)
            .build()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn index_declaration_order_does_not_change_identity() {
        let first = Schema::builder()
            .field("a", FieldType::String)
            .field("b", FieldType::String)
            .index(["a"])
            .unique_index(["b"])
            .index(["a"])
            .build()
            .unwrap();
        let second = Schema::builder()
            .field("a", FieldType::String)
            .field("b", FieldType::String)
            .unique_index(["b"])
            .index(["a"])
            .build()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.indexes().len(), 2);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());

        let from_json = Schema::from_json_str(
            r#"{"fields":{"a":{"type":"string"},"b":{"type":"string"}},"indexes":[{"fields":["b"],"unique":true},{"fields":["a"]}]}"#,
        )
        .unwrap();
        assert_eq!(from_json, first);
    }

    #[test]
    fn field_order_inside_one_index_is_significant() {
        let ab = Schema::builder()
            .field("a", FieldType::String)
            .field("b", FieldType::String)
            .index(["a", "b"])
            .build()
            .unwrap();
        let ba = Schema::builder()
            .field("a", FieldType::String)
            .field("b", FieldType::String)
            .index(["b", "a"])
            .build()
            .unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn fingerprint_changes_with_field_type() {
        let first = Schema::builder()
            .field("age", FieldType::Number)
            .build()
            .unwrap();
        let second = Schema::builder()
            .field("age", FieldType::String)
            .build()
            .unwrap();

        assert_ne!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn build_rejects_index_on_undeclared_field() {
        let err = Schema::builder()
            .field("name", FieldType::String)
            .index(["email"])
            .build()
            .expect_err("unknown index field must be rejected");
        assert!(matches!(err, SchemaError::UnknownIndexField(field) if field == "email"));
    }

    #[test]
    fn build_rejects_blank_field_name() {
        let err = Schema::builder()
            .field("  ", FieldType::String)
            .build()
            .expect_err("blank field must be rejected");
        assert!(matches!(err, SchemaError::EmptyFieldName));
    }

    #[test]
    fn check_document_accepts_matching_shape_and_id_field() {
        let schema = user_schema();
        let doc = json!({"id": "abc", "name": "Ada", "age": 36});
        schema.check_document(&doc, "id").expect("document should match");

        let without_optional = json!({"name": "Ada", "age": null});
        schema
            .check_document(&without_optional, "id")
            .expect("null optional field should be accepted");
    }

    #[test]
    fn check_document_reports_first_violation() {
        let schema = user_schema();

        assert_eq!(
            schema.check_document(&json!([1, 2]), "id"),
            Err(DocumentViolation::NotAnObject)
        );
        assert_eq!(
            schema.check_document(&json!({"age": 3}), "id"),
            Err(DocumentViolation::MissingField("name".to_string()))
        );
        assert_eq!(
            schema.check_document(&json!({"name": "Ada", "age": "old"}), "id"),
            Err(DocumentViolation::WrongType {
                field: "age".to_string(),
                expected: FieldType::Number,
            })
        );
        assert_eq!(
            schema.check_document(&json!({"name": "Ada", "email": "a@b"}), "id"),
            Err(DocumentViolation::UnknownField("email".to_string()))
        );
    }

    #[test]
    fn non_strict_schema_allows_undeclared_fields() {
        let schema = Schema::builder()
            .required("name", FieldType::String)
            .strict(false)
            .build()
            .unwrap();
        schema
            .check_document(&json!({"name": "Ada", "email": "a@b"}), "id")
            .expect("non-strict schema should accept extra fields");
    }

    #[test]
    fn from_json_str_parses_and_validates() {
        let schema = Schema::from_json_str(
            r#"{"fields":{"name":{"type":"string","required":true}},"indexes":[{"fields":["name"],"unique":true}]}"#,
        )
        .expect("schema json should parse");
        assert!(schema.is_strict());
        assert_eq!(schema.unique_indexes().count(), 1);

        let err = Schema::from_json_str(r#"{"fields":{},"indexes":[{"fields":["x"]}]}"#)
            .expect_err("index on missing field should fail");
        assert!(matches!(err, SchemaError::UnknownIndexField(_)));
    }
}

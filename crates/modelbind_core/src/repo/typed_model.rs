//! Typed data-access handle for one registered model.
//!
//! # Responsibility
//! - Provide CRUD APIs over the `documents` table scoped to one model name.
//! - Keep JSON/SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths check the document against the model schema before SQL.
//! - Read paths reject persisted bodies that no longer match the schema.
//! - Unique indexes declared by the schema are enforced on insert and update.
//! - Handles obtained for the same compiled model share one `Arc<CompiledModel>`.

use crate::db::{DbError, SharedConnection};
use crate::model::document::{Document, DocumentId};
use crate::model::schema::{DocumentViolation, IndexDef, Schema};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by typed model operations.
#[derive(Debug)]
pub enum ModelError {
    Validation {
        model: String,
        violation: DocumentViolation,
    },
    Db(DbError),
    NotFound(DocumentId),
    DuplicateId(DocumentId),
    UniqueViolation {
        model: String,
        fields: Vec<String>,
    },
    InvalidQuery(String),
    InvalidData(String),
    Serialization(serde_json::Error),
    /// The owning registry has disconnected.
    Disconnected,
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { model, violation } => {
                write!(f, "document rejected by model `{model}`: {violation}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "document not found: {id}"),
            Self::DuplicateId(id) => write!(f, "document id already exists: {id}"),
            Self::UniqueViolation { model, fields } => write!(
                f,
                "unique index ({}) violated in model `{model}`",
                fields.join(", ")
            ),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted document: {message}"),
            Self::Serialization(err) => write!(f, "document serialization failed: {err}"),
            Self::Disconnected => write!(f, "model registry connection is closed"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation { violation, .. } => Some(violation),
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ModelError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ModelError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing documents of one model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelQuery {
    /// Top-level field equality filters; a `null` value matches absent fields.
    /// A filter on `Document::ID_FIELD` matches the stored document id.
    pub filter: BTreeMap<String, Value>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl ModelQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// Repository interface every typed model handle exposes.
pub trait DocumentRepository<T: Document> {
    fn insert(&self, doc: &T) -> ModelResult<DocumentId>;
    fn find_by_id(&self, id: DocumentId) -> ModelResult<Option<T>>;
    fn find(&self, query: &ModelQuery) -> ModelResult<Vec<T>>;
    fn update(&self, doc: &T) -> ModelResult<()>;
    fn delete(&self, id: DocumentId) -> ModelResult<bool>;
    fn count(&self) -> ModelResult<u64>;
}

/// Registry-side record of one compiled model.
#[derive(Debug)]
pub(crate) struct CompiledModel {
    pub(crate) name: String,
    pub(crate) schema: Schema,
    pub(crate) fingerprint: String,
}

/// Typed handle bound to one registered model.
///
/// Cheap to clone. All clones, and every handle the registry returns for the
/// same name, point at the same compiled model.
pub struct Model<T: Document> {
    compiled: Arc<CompiledModel>,
    conn: SharedConnection,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Document> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self {
            compiled: Arc::clone(&self.compiled),
            conn: self.conn.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T: Document> Debug for Model<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.compiled.name)
            .field("fingerprint", &self.compiled.fingerprint)
            .finish()
    }
}

impl<T: Document> Model<T> {
    pub(crate) fn bind(compiled: Arc<CompiledModel>, conn: SharedConnection) -> Self {
        Self {
            compiled,
            conn,
            _doc: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.compiled.name
    }

    pub fn schema(&self) -> &Schema {
        &self.compiled.schema
    }

    pub fn fingerprint(&self) -> &str {
        &self.compiled.fingerprint
    }

    /// Returns whether both handles are bound to the same compiled model.
    pub fn same_model<U: Document>(&self, other: &Model<U>) -> bool {
        Arc::ptr_eq(&self.compiled, &other.compiled)
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> ModelResult<R>) -> ModelResult<R> {
        self.conn.with(f).unwrap_or(Err(ModelError::Disconnected))
    }

    fn to_checked_body(&self, doc: &T) -> ModelResult<Value> {
        let body = serde_json::to_value(doc).map_err(ModelError::Serialization)?;
        self.compiled
            .schema
            .check_document(&body, T::ID_FIELD)
            .map_err(|violation| ModelError::Validation {
                model: self.compiled.name.clone(),
                violation,
            })?;
        Ok(body)
    }

    fn ensure_unique(&self, conn: &Connection, id: DocumentId, body: &Value) -> ModelResult<()> {
        for index in self.compiled.schema.unique_indexes() {
            if let Some((sql, binds)) = unique_probe(&self.compiled.name, id, index, body) {
                let clash: Option<String> = conn
                    .query_row(&sql, params_from_iter(binds), |row| row.get(0))
                    .optional()?;
                if clash.is_some() {
                    return Err(ModelError::UniqueViolation {
                        model: self.compiled.name.clone(),
                        fields: index.fields.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn parse_row(&self, id_text: &str, body_text: &str) -> ModelResult<T> {
        let name = &self.compiled.name;
        let id = Uuid::parse_str(id_text).map_err(|_| {
            ModelError::InvalidData(format!("invalid id `{id_text}` in model `{name}`"))
        })?;
        let body: Value = serde_json::from_str(body_text).map_err(|err| {
            ModelError::InvalidData(format!("unreadable body for `{name}/{id}`: {err}"))
        })?;
        self.compiled
            .schema
            .check_document(&body, T::ID_FIELD)
            .map_err(|violation| {
                ModelError::InvalidData(format!("`{name}/{id}` no longer matches schema: {violation}"))
            })?;
        let doc: T = serde_json::from_value(body).map_err(|err| {
            ModelError::InvalidData(format!("`{name}/{id}` cannot be decoded: {err}"))
        })?;
        if doc.id() != id {
            return Err(ModelError::InvalidData(format!(
                "`{name}/{id}` decodes to mismatched id {}",
                doc.id()
            )));
        }
        Ok(doc)
    }
}

impl<T: Document> DocumentRepository<T> for Model<T> {
    fn insert(&self, doc: &T) -> ModelResult<DocumentId> {
        let id = doc.id();
        let body = self.to_checked_body(doc)?;

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if document_exists(&tx, self.name(), id)? {
                return Err(ModelError::DuplicateId(id));
            }
            self.ensure_unique(&tx, id, &body)?;
            tx.execute(
                "INSERT INTO documents (model, id, body) VALUES (?1, ?2, ?3);",
                params![self.name(), id.to_string(), body.to_string()],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    fn find_by_id(&self, id: DocumentId) -> ModelResult<Option<T>> {
        let body: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT body FROM documents WHERE model = ?1 AND id = ?2;",
                    params![self.name(), id.to_string()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        body.map(|body| self.parse_row(&id.to_string(), &body))
            .transpose()
    }

    fn find(&self, query: &ModelQuery) -> ModelResult<Vec<T>> {
        let mut sql = String::from("SELECT id, body FROM documents WHERE model = ?");
        let mut binds = vec![SqlValue::Text(self.name().to_string())];

        for (field, value) in &query.filter {
            if field.as_str() == T::ID_FIELD {
                let id = value
                    .as_str()
                    .and_then(|text| Uuid::parse_str(text).ok())
                    .ok_or_else(|| {
                        ModelError::InvalidQuery(format!("`{field}` filter must be a document id"))
                    })?;
                sql.push_str(" AND id = ?");
                binds.push(SqlValue::Text(id.to_string()));
                continue;
            }
            if self.schema().is_strict() && self.schema().field(field).is_none() {
                return Err(ModelError::InvalidQuery(format!(
                    "field `{field}` is not declared in model `{}`",
                    self.name()
                )));
            }
            binds.push(SqlValue::Text(json_path(field)));
            match to_sql_value(value) {
                Some(bound) => {
                    sql.push_str(" AND json_extract(body, ?) = ?");
                    binds.push(bound);
                }
                None => sql.push_str(" AND json_extract(body, ?) IS NULL"),
            }
        }

        sql.push_str(" ORDER BY created_at ASC, rowid ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            binds.push(SqlValue::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                binds.push(SqlValue::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            binds.push(SqlValue::Integer(i64::from(query.offset)));
        }

        let rows: Vec<(String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(params_from_iter(binds), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row?);
            }
            Ok(rows)
        })?;

        rows.iter()
            .map(|(id, body)| self.parse_row(id, body))
            .collect()
    }

    fn update(&self, doc: &T) -> ModelResult<()> {
        let id = doc.id();
        let body = self.to_checked_body(doc)?;

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if !document_exists(&tx, self.name(), id)? {
                return Err(ModelError::NotFound(id));
            }
            self.ensure_unique(&tx, id, &body)?;
            tx.execute(
                "UPDATE documents
                 SET
                    body = ?1,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE model = ?2 AND id = ?3;",
                params![body.to_string(), self.name(), id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn delete(&self, id: DocumentId) -> ModelResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM documents WHERE model = ?1 AND id = ?2;",
                params![self.name(), id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    fn count(&self) -> ModelResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE model = ?1;",
                [self.name()],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
    }
}

fn document_exists(conn: &Connection, model: &str, id: DocumentId) -> ModelResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM documents WHERE model = ?1 AND id = ?2);",
        params![model, id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Builds the clash lookup for one unique index, or `None` when the document
/// leaves any indexed field empty (empty values never clash).
fn unique_probe(
    model: &str,
    id: DocumentId,
    index: &IndexDef,
    body: &Value,
) -> Option<(String, Vec<SqlValue>)> {
    let mut sql = String::from("SELECT id FROM documents WHERE model = ? AND id <> ?");
    let mut binds = vec![
        SqlValue::Text(model.to_string()),
        SqlValue::Text(id.to_string()),
    ];

    for field in &index.fields {
        let bound = body.get(field).and_then(to_sql_value)?;
        sql.push_str(" AND json_extract(body, ?) = ?");
        binds.push(SqlValue::Text(json_path(field)));
        binds.push(bound);
    }
    sql.push_str(" LIMIT 1");

    Some((sql, binds))
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// Maps a JSON value to what `json_extract` yields for it; `None` for null.
fn to_sql_value(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(SqlValue::Integer(i64::from(*flag))),
        Value::Number(number) => Some(match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        }),
        Value::String(text) => Some(SqlValue::Text(text.clone())),
        Value::Array(_) | Value::Object(_) => Some(SqlValue::Text(value.to_string())),
    }
}

//! Connection-bound model registry.
//!
//! # Responsibility
//! - Own the connection every model handle of this registry shares.
//! - Compile a name + schema into a model once and hand out typed handles.
//! - Record the latest schema compiled per name for store inspection.
//!
//! # Invariants
//! - One name maps to at most one schema for the lifetime of a registry.
//! - Re-registering a name with an identical schema reuses the compiled model.
//! - Re-registering a name with a different schema fails; nothing is overwritten.
//! - The `models` table mirrors the latest schema compiled for each name; it
//!   never blocks a new registry from compiling an evolved schema.
//! - After `disconnect`, registration and every handle fail with a
//!   disconnected error.

use crate::config::{DatabaseLocation, RegistryConfig};
use crate::db::{open_db, open_db_in_memory, open_db_with_timeout, DbError, SharedConnection};
use crate::model::document::Document;
use crate::model::schema::{Schema, SchemaError};
use crate::repo::typed_model::{CompiledModel, Model};
use log::{error, info};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Model registration errors.
#[derive(Debug)]
pub enum RegistryError {
    InvalidModelName(String),
    Schema(SchemaError),
    SchemaConflict {
        model: String,
        registered_fingerprint: String,
        requested_fingerprint: String,
    },
    Disconnected,
    Db(DbError),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidModelName(value) => write!(f, "model name is invalid: `{value}`"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::SchemaConflict {
                model,
                registered_fingerprint,
                requested_fingerprint,
            } => write!(
                f,
                "model `{model}` is already registered with schema {registered_fingerprint}; refusing schema {requested_fingerprint}"
            ),
            Self::Disconnected => write!(f, "model registry connection is closed"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for RegistryError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<DbError> for RegistryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Name -> compiled model table bound to one open connection.
///
/// Applications create one registry at startup and pass it (usually behind
/// an `Arc`) to whatever constructs model adapters.
pub struct ModelRegistry {
    conn: SharedConnection,
    models: Mutex<BTreeMap<String, Arc<CompiledModel>>>,
}

impl ModelRegistry {
    /// Wraps an already bootstrapped connection (see [`crate::db::open_db`]).
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: SharedConnection::new(conn),
            models: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> RegistryResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    pub fn from_config(config: &RegistryConfig) -> RegistryResult<Self> {
        let timeout = Duration::from_millis(config.busy_timeout_ms);
        let conn = match &config.database {
            DatabaseLocation::Memory => open_db_with_timeout(None, timeout)?,
            DatabaseLocation::File { path } => open_db_with_timeout(Some(path.as_path()), timeout)?,
        };
        Ok(Self::new(conn))
    }

    /// Returns a typed handle for `name`, compiling the model on first use.
    ///
    /// # Errors
    /// - `InvalidModelName` when `name` is blank or contains whitespace/control chars.
    /// - `Schema` when `schema` fails its own validation.
    /// - `SchemaConflict` when `name` is already bound to a different schema
    ///   in this registry.
    /// - `Disconnected` after [`ModelRegistry::disconnect`].
    pub fn model<T: Document>(&self, name: &str, schema: Schema) -> RegistryResult<Model<T>> {
        let name = name.trim();
        if !is_valid_model_name(name) {
            return Err(RegistryError::InvalidModelName(name.to_string()));
        }
        let schema = schema.normalized();
        schema.validate()?;
        let fingerprint = schema.fingerprint()?;

        let mut models = self.lock_models();
        if !self.conn.is_open() {
            return Err(RegistryError::Disconnected);
        }

        if let Some(existing) = models.get(name) {
            if existing.schema != schema {
                error!(
                    "event=model_register module=registry status=error model={} error_code=schema_conflict",
                    name
                );
                return Err(RegistryError::SchemaConflict {
                    model: name.to_string(),
                    registered_fingerprint: existing.fingerprint.clone(),
                    requested_fingerprint: fingerprint,
                });
            }
            info!(
                "event=model_register module=registry status=reused model={}",
                name
            );
            return Ok(Model::bind(Arc::clone(existing), self.conn.clone()));
        }

        let schema_json = schema.canonical_json()?;
        let persisted = self
            .conn
            .with(|conn| persist_registration(conn, name, &fingerprint, &schema_json))
            .unwrap_or(Err(RegistryError::Disconnected));
        if let Err(err) = persisted {
            error!(
                "event=model_register module=registry status=error model={} error={}",
                name, err
            );
            return Err(err);
        }

        let compiled = Arc::new(CompiledModel {
            name: name.to_string(),
            schema,
            fingerprint,
        });
        models.insert(name.to_string(), Arc::clone(&compiled));
        info!(
            "event=model_register module=registry status=ok model={} fingerprint={}",
            name, compiled.fingerprint
        );

        Ok(Model::bind(compiled, self.conn.clone()))
    }

    /// Returns whether `name` has been compiled by this registry.
    pub fn contains(&self, name: &str) -> bool {
        self.lock_models().contains_key(name.trim())
    }

    /// Returns sorted names compiled by this registry.
    pub fn model_names(&self) -> Vec<String> {
        self.lock_models().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_models().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_models().is_empty()
    }

    /// Lists every registration persisted in the store, including ones made
    /// by other processes.
    pub fn registered_models(&self) -> RegistryResult<Vec<RegisteredModel>> {
        self.conn
            .with(list_registered_models)
            .unwrap_or(Err(RegistryError::Disconnected))
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_open()
    }

    /// Closes the shared connection. Idempotent.
    ///
    /// Handles that outlive this call fail with `Disconnected`.
    pub fn disconnect(&self) -> RegistryResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, err)| RegistryError::from(err))?;
        info!("event=db_close module=registry status=ok");
        Ok(())
    }

    fn lock_models(&self) -> MutexGuard<'_, BTreeMap<String, Arc<CompiledModel>>> {
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One persisted registration as stored in the `models` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModel {
    pub name: String,
    pub fingerprint: String,
    pub schema: Schema,
}

/// Lists registrations persisted in the store, sorted by name.
pub fn list_registered_models(conn: &Connection) -> RegistryResult<Vec<RegisteredModel>> {
    let mut stmt =
        conn.prepare("SELECT name, fingerprint, schema_json FROM models ORDER BY name ASC;")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut registered = Vec::new();
    for row in rows {
        let (name, fingerprint, schema_json) = row?;
        let schema = Schema::from_json_str(&schema_json)?;
        registered.push(RegisteredModel {
            name,
            fingerprint,
            schema,
        });
    }
    Ok(registered)
}

/// Records the schema this process compiled for `name`.
///
/// Conflicts are decided by the in-memory table only; a row left by an
/// earlier process is replaced, and documents that no longer match the new
/// schema surface as `InvalidData` when read.
fn persist_registration(
    conn: &Connection,
    name: &str,
    fingerprint: &str,
    schema_json: &str,
) -> RegistryResult<()> {
    conn.execute(
        "INSERT INTO models (name, fingerprint, schema_json) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            schema_json = excluded.schema_json;",
        params![name, fingerprint, schema_json],
    )?;
    Ok(())
}

fn is_valid_model_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control())
}

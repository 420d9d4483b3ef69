//! SQLite store bootstrap for the model registry.
//!
//! # Responsibility
//! - Open and configure the connection every registered model shares.
//! - Apply store migrations before any model is compiled against it.
//!
//! # Invariants
//! - Store layout version is tracked via `PRAGMA user_version`.
//! - Registry code must not touch `models`/`documents` before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;
mod shared;

pub use open::{open_db, open_db_in_memory, open_db_with_timeout, DEFAULT_BUSY_TIMEOUT};
pub(crate) use shared::SharedConnection;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store layout version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

//! Connection shared between the registry and every model handle.

use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process connection slot. `None` once the owner has disconnected.
///
/// Cloning shares the same slot; every access is serialized by one mutex.
#[derive(Clone)]
pub(crate) struct SharedConnection {
    slot: Arc<Mutex<Option<Connection>>>,
}

impl SharedConnection {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Runs `f` against the open connection; returns `None` when closed.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&Connection) -> R) -> Option<R> {
        let guard = self.lock();
        guard.as_ref().map(f)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Takes the connection out of the slot. Later `with` calls return `None`.
    pub(crate) fn take(&self) -> Option<Connection> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // Poison is ignored: SQLite owns the transactional state.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

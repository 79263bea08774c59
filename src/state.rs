use rusqlite::Connection;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::LedgerConfig;
use crate::ledger::Result;
use crate::service::FeeService;

/// Shared by both transports. The single connection sits behind a mutex, so
/// each ledger read-modify-write runs alone.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<LedgerConfig>,
}

impl AppState {
    pub fn new(conn: Connection, config: LedgerConfig) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// A panic in an earlier holder leaves the lock poisoned but the
    /// connection intact: any open transaction was rolled back when it was
    /// dropped during unwinding.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    pub fn with_service<T>(&self, f: impl FnOnce(&FeeService<'_>) -> Result<T>) -> Result<T> {
        self.with_connection(|conn| f(&FeeService::new(conn, &self.config)))
    }
}

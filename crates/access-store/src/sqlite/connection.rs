//! Shared SQLite connection.
//!
//! One connection behind a mutex: SQLite allows a single writer anyway, and
//! holding the lock for the length of a transaction is what serializes token
//! acquisitions.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::errors::{StoreError, StoreResult};
use crate::sqlite::schema;

#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
    config: StorageConfig,
}

impl SqlitePool {
    pub fn new(config: StorageConfig) -> StoreResult<Self> {
        info!(path = ?config.path, "opening access control database");

        let conn = if config.is_in_memory_sqlite() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        StoreError::Connection(format!("failed to create directory: {err}"))
                    })?;
                }
            }
            Connection::open(&config.path)?
        };

        let pool = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        };
        pool.initialize()?;
        Ok(pool)
    }

    pub fn memory() -> StoreResult<Self> {
        Self::new(StorageConfig::sqlite_memory())
    }

    pub fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn with_connection_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    fn initialize(&self) -> StoreResult<()> {
        self.with_connection(|conn| {
            self.configure_pragmas(conn)?;
            schema::apply_migrations(conn)
        })
    }

    fn configure_pragmas(&self, conn: &Connection) -> StoreResult<()> {
        debug!("configuring sqlite pragmas");
        if self.config.wal_mode && !self.config.is_in_memory_sqlite() {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }
        // token rows cascade from their rule
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};",
            self.config.busy_timeout_ms
        ))?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        Ok(())
    }
}

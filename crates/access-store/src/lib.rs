//! Persistence for the access control engine.
//!
//! Three logical tables: permissions `(service, subject) -> allow`, rate-limit
//! rules and the token ledger. [`MemoryStore`] keeps them in process,
//! [`SqliteStore`] persists them.

pub mod api;
pub mod config;
pub mod errors;
pub mod memory;
pub mod model;
pub mod sqlite;

use std::sync::Arc;

pub use api::{AccessStore, LedgerWork, TokenLedger};
pub use config::{StorageBackend, StorageConfig};
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use model::{
    Admission, NewRateLimitRule, PermissionRecord, RateLimitRuleRecord, RuleId, TokenId,
    TokenRecord,
};
pub use sqlite::{SqlitePool, SqliteStore};

/// Opens the backend selected by `config`.
pub fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn AccessStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Sqlite => {
            let pool = SqlitePool::new(config.clone())?;
            Ok(Arc::new(SqliteStore::new(pool)))
        }
    }
}
